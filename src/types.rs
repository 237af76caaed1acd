use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use crate::ast::{CType, FloatRank, IntRank, Member};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineModel {
    /// ILP32
    Linux32,
    /// LP64
    Linux64,
}

impl Default for MachineModel {
    fn default() -> Self {
        MachineModel::Linux64
    }
}

impl MachineModel {
    pub fn sizeof_int(&self, rank: IntRank) -> u64 {
        match (self, rank) {
            (_, IntRank::Char)                      => 1,
            (_, IntRank::Short)                     => 2,
            (_, IntRank::Int)                       => 4,
            (MachineModel::Linux32, IntRank::Long)  => 4,
            (MachineModel::Linux64, IntRank::Long)  => 8,
            (_, IntRank::LongLong)                  => 8,
        }
    }

    pub fn sizeof_float(&self, rank: FloatRank) -> u64 {
        match (self, rank) {
            (_, FloatRank::Float)                       => 4,
            (_, FloatRank::Double)                      => 8,
            (MachineModel::Linux32, FloatRank::LongDouble) => 12,
            (MachineModel::Linux64, FloatRank::LongDouble) => 16,
        }
    }

    pub fn sizeof_pointer(&self) -> u64 {
        match self {
            MachineModel::Linux32 => 4,
            MachineModel::Linux64 => 8,
        }
    }

    pub fn pointer_width(&self) -> u32 {
        self.sizeof_pointer() as u32 * 8
    }
}


/// Position of a member inside the bitvector of its owner.
/// Members are packed in declaration order without padding, the first
/// member occupying the least significant bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub name:           String,
    pub typ:            CType,
    pub byte_offset:    u64,
    pub msb:            u32,
    pub lsb:            u32,
}

impl FieldLayout {
    pub fn width(&self) -> u32 {
        self.msb - self.lsb + 1
    }
}

#[derive(Clone, Debug)]
struct Composite {
    union:      bool,
    members:    Vec<Member>,
}

pub struct TypeSystem {
    pub machine:    MachineModel,
    composites:     BTreeMap<String, Composite>,
}

impl TypeSystem {
    pub fn new(machine: MachineModel) -> Self {
        Self {
            machine,
            composites: BTreeMap::new(),
        }
    }

    pub fn register_composite(&mut self, name: &str, union: bool, members: Vec<Member>) {
        if let Some(existing) = self.composites.get(name) {
            if existing.members != members || existing.union != union {
                warn!("conflicting definitions of composite '{}', keeping the first", name);
            }
            return;
        }
        debug!("composite {} with {} members", name, members.len());
        self.composites.insert(name.to_string(), Composite{union, members});
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.composites.contains_key(name)
    }

    /// members of a struct or union, completed from the table if the type
    /// only names it
    pub fn members<'a>(&'a self, t: &'a CType) -> Option<(bool, &'a [Member])> {
        match t.unqualified() {
            CType::Struct{members: Some(m), ..} => Some((false, &m[..])),
            CType::Union{members: Some(m), ..}  => Some((true, &m[..])),
            CType::Struct{name, members: None} | CType::Union{name, members: None} => {
                self.composites.get(name).map(|c|(c.union, &c.members[..]))
            }
            _ => None,
        }
    }

    /// size in bytes. None for void, functions and incomplete types
    pub fn size_of(&self, t: &CType) -> Option<u64> {
        match t.unqualified() {
            CType::Void | CType::Function{..} => None,
            CType::Bool                     => Some(1),
            CType::Int{rank, ..}            => Some(self.machine.sizeof_int(*rank)),
            CType::Enum{..}                 => Some(self.machine.sizeof_int(IntRank::Int)),
            CType::Float{rank}              => Some(self.machine.sizeof_float(*rank)),
            CType::Pointer{..}              => Some(self.machine.sizeof_pointer()),
            CType::Array{element, length}   => self.size_of(element)?.checked_mul((*length)?),
            CType::Struct{..} | CType::Union{..} => {
                let (union, members) = self.members(t)?;
                let mut size = 0;
                for m in members {
                    let s = self.size_of(&m.typ)?;
                    if union {
                        size = std::cmp::max(size, s);
                    } else {
                        size = size.checked_add(s)?;
                    }
                }
                Some(size)
            }
            CType::Qualified{..} => unreachable!(),
        }
    }

    /// None also when the width does not fit a bitvector sort
    pub fn bit_width(&self, t: &CType) -> Option<u32> {
        match self.size_of(t)? {
            0 => None,
            n => bits(n),
        }
    }

    pub fn pointer_width(&self) -> u32 {
        self.machine.pointer_width()
    }

    /// byte offset and type of a member
    pub fn field_offset<'a>(&'a self, owner: &'a CType, field: &str) -> Option<(u64, &'a Member)> {
        let (union, members) = self.members(owner)?;
        let mut offset : u64 = 0;
        for m in members {
            if m.name == field {
                return Some((offset, m));
            }
            if !union {
                offset = offset.checked_add(self.size_of(&m.typ)?)?;
            }
        }
        None
    }

    pub fn field_layout(&self, owner: &CType, field: &str) -> Option<FieldLayout> {
        let (offset, m) = self.field_offset(owner, field)?;
        let size = self.size_of(&m.typ)?;
        if size == 0 {
            return None;
        }
        let lsb = bits(offset)?;
        let msb = bits(offset.checked_add(size)?)?.checked_sub(1)?;
        Some(FieldLayout {
            name:           m.name.clone(),
            typ:            m.typ.clone(),
            byte_offset:    offset,
            msb,
            lsb,
        })
    }

    /// integer promotion: everything ranking below int becomes int
    pub fn promote(&self, t: &CType) -> CType {
        match t.unqualified() {
            CType::Bool | CType::Enum{..} => CType::int(),
            CType::Int{rank, ..} if *rank < IntRank::Int => CType::int(),
            t => t.clone(),
        }
    }

    /// the usual arithmetic conversions, applied after promotion
    pub fn arithmetic_conversion(&self, a: &CType, b: &CType) -> CType {
        let a = self.promote(a);
        let b = self.promote(b);

        match (&a, &b) {
            (CType::Float{rank: ra}, CType::Float{rank: rb}) => return CType::Float{rank: std::cmp::max(*ra, *rb)},
            (CType::Float{..}, _) => return a,
            (_, CType::Float{..}) => return b,
            _ => (),
        }

        let (ra, sa) = match &a {
            CType::Int{rank, signed} => (*rank, *signed),
            _ => return a,
        };
        let (rb, sb) = match &b {
            CType::Int{rank, signed} => (*rank, *signed),
            _ => return b,
        };

        if sa == sb {
            return CType::Int{rank: std::cmp::max(ra, rb), signed: sa};
        }

        let (ru, rs) = if sa { (rb, ra) } else { (ra, rb) };
        if ru >= rs {
            return CType::Int{rank: ru, signed: false};
        }
        // the signed type can hold every value of the unsigned one
        if self.machine.sizeof_int(rs) > self.machine.sizeof_int(ru) {
            return CType::Int{rank: rs, signed: true};
        }
        CType::Int{rank: rs, signed: false}
    }

    /// Two types recorded for the same key must occupy the same storage.
    /// Qualifiers, signedness and pointer targets do not change the size.
    pub fn same_size_class(a: &CType, b: &CType) -> bool {
        match (a.unqualified(), b.unqualified()) {
            (CType::Int{rank: ra, ..}, CType::Int{rank: rb, ..}) => ra == rb,
            (CType::Enum{..}, CType::Int{rank: IntRank::Int, ..})
            | (CType::Int{rank: IntRank::Int, ..}, CType::Enum{..})
            | (CType::Enum{..}, CType::Enum{..})
            => true,
            (CType::Pointer{..}, CType::Pointer{..}) => true,
            (CType::Array{element: ea, length: la}, CType::Array{element: eb, length: lb}) => {
                Self::same_size_class(ea, eb) && (la.is_none() || lb.is_none() || la == lb)
            }
            (CType::Struct{name: na, ..}, CType::Struct{name: nb, ..}) => na == nb,
            (CType::Union{name: na, ..}, CType::Union{name: nb, ..}) => na == nb,
            (x, y) => x == y,
        }
    }

    /// Of two types of one family, the one carrying more information:
    /// a known array length, a complete composite, a non-void pointer target.
    /// None if they are not of the same family.
    pub fn more_specific(a: &CType, b: &CType) -> Option<CType> {
        if a == b {
            return Some(a.clone());
        }
        match (a.unqualified(), b.unqualified()) {
            (x, y) if x == y => Some(a.clone()),
            (CType::Array{element: ea, length: la}, CType::Array{element: eb, length: lb}) => {
                let element = Self::more_specific(ea, eb)?;
                let length = match (la, lb) {
                    (Some(x), Some(y)) if x != y => return None,
                    (Some(x), _) | (_, Some(x)) => Some(*x),
                    (None, None) => None,
                };
                Some(CType::array(element, length))
            }
            (CType::Pointer{target: ta}, CType::Pointer{target: tb}) => {
                if ta.is_void() {
                    Some(b.clone())
                } else if tb.is_void() {
                    Some(a.clone())
                } else {
                    Some(CType::pointer(Self::more_specific(ta, tb)?))
                }
            }
            (CType::Struct{name: na, members: ma}, CType::Struct{name: nb, members: mb})
            | (CType::Union{name: na, members: ma}, CType::Union{name: nb, members: mb})
            => {
                if na != nb {
                    return None;
                }
                match (ma, mb) {
                    (Some(_), None) => Some(a.clone()),
                    (None, Some(_)) => Some(b.clone()),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}


/// bytes to bits, if that fits a bitvector width
fn bits(bytes: u64) -> Option<u32> {
    u32::try_from(bytes.checked_mul(8)?).ok()
}


#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> TypeSystem {
        TypeSystem::new(MachineModel::Linux64)
    }

    #[test]
    fn sizes() {
        let t = ts();
        assert_eq!(t.bit_width(&CType::int()), Some(32));
        assert_eq!(t.bit_width(&CType::long()), Some(64));
        assert_eq!(t.bit_width(&CType::pointer(CType::Void)), Some(64));
        assert_eq!(t.bit_width(&CType::array(CType::short(), Some(3))), Some(48));
        assert_eq!(t.bit_width(&CType::Void), None);
        assert_eq!(t.bit_width(&CType::array(CType::int(), None)), None);

        let t32 = TypeSystem::new(MachineModel::Linux32);
        assert_eq!(t32.bit_width(&CType::long()), Some(32));
        assert_eq!(t32.bit_width(&CType::pointer(CType::int())), Some(32));
    }

    // member packing is consecutive without padding. this pins the layout
    // formulas depend on, changing it changes every struct encoding.
    #[test]
    fn struct_layout_has_no_padding() {
        let s = CType::structure("s", vec![("c", CType::char()), ("i", CType::int())]);
        let t = ts();
        assert_eq!(t.bit_width(&s), Some(40));

        let c = t.field_layout(&s, "c").unwrap();
        assert_eq!((c.msb, c.lsb, c.byte_offset), (7, 0, 0));
        let i = t.field_layout(&s, "i").unwrap();
        assert_eq!((i.msb, i.lsb, i.byte_offset), (39, 8, 1));
        assert_eq!(i.width(), 32);
        assert!(t.field_layout(&s, "nope").is_none());
    }

    #[test]
    fn oversized_objects_have_no_width() {
        let s = CType::structure("big", vec![
            ("data", CType::array(CType::char(), Some(1 << 29))),
            ("n", CType::int()),
        ]);
        let t = ts();
        assert_eq!(t.size_of(&s), Some((1 << 29) + 4));
        assert_eq!(t.bit_width(&s), None);
        assert!(t.field_layout(&s, "n").is_none());
        assert_eq!(t.field_offset(&s, "n").map(|(o, _)| o), Some(1 << 29));

        let data = t.field_layout(&s, "data");
        assert!(data.is_none(), "{:?}", data);

        let huge = CType::array(CType::long(), Some(u64::max_value()));
        assert_eq!(t.size_of(&huge), None);
        assert_eq!(t.bit_width(&huge), None);
    }

    #[test]
    fn unions_overlap() {
        let mut t = ts();
        t.register_composite("u", true, vec![
            Member{name: "c".to_string(), typ: CType::char()},
            Member{name: "l".to_string(), typ: CType::long()},
        ]);
        let u = CType::Union{name: "u".to_string(), members: None};
        assert_eq!(t.bit_width(&u), Some(64));
        assert_eq!(t.field_layout(&u, "l").unwrap().lsb, 0);
        assert_eq!(t.field_layout(&u, "c").unwrap().msb, 7);
    }

    #[test]
    fn incomplete_struct_resolves_by_name() {
        let mut t = ts();
        let s = CType::struct_ref("node");
        assert_eq!(t.bit_width(&s), None);
        t.register_composite("node", false, vec![
            Member{name: "value".to_string(), typ: CType::int()},
            Member{name: "next".to_string(), typ: CType::pointer(CType::struct_ref("node"))},
        ]);
        assert_eq!(t.bit_width(&s), Some(96));
        assert_eq!(t.field_layout(&s, "next").unwrap().lsb, 32);
    }

    #[test]
    fn promotion() {
        let t = ts();
        assert_eq!(t.promote(&CType::char()), CType::int());
        assert_eq!(t.promote(&CType::uchar()), CType::int());
        assert_eq!(t.promote(&CType::Bool), CType::int());
        assert_eq!(t.promote(&CType::uint()), CType::uint());
        assert_eq!(t.promote(&CType::constant(CType::short())), CType::int());
    }

    #[test]
    fn usual_arithmetic_conversions() {
        let t = ts();
        assert_eq!(t.arithmetic_conversion(&CType::char(), &CType::short()), CType::int());
        assert_eq!(t.arithmetic_conversion(&CType::int(), &CType::uint()), CType::uint());
        assert_eq!(t.arithmetic_conversion(&CType::long(), &CType::uint()), CType::long());
        assert_eq!(t.arithmetic_conversion(&CType::ulong(), &CType::int()), CType::ulong());
        assert_eq!(t.arithmetic_conversion(&CType::int(), &CType::double()), CType::double());

        // same size: the signed type cannot represent the unsigned one
        let t32 = TypeSystem::new(MachineModel::Linux32);
        assert_eq!(t32.arithmetic_conversion(&CType::long(), &CType::uint()), CType::ulong());
    }

    #[test]
    fn specificity() {
        let open   = CType::array(CType::int(), None);
        let closed = CType::array(CType::int(), Some(4));
        assert_eq!(TypeSystem::more_specific(&open, &closed), Some(closed.clone()));
        assert_eq!(TypeSystem::more_specific(&closed, &open), Some(closed.clone()));

        let vp = CType::pointer(CType::Void);
        let ip = CType::pointer(CType::int());
        assert_eq!(TypeSystem::more_specific(&vp, &ip), Some(ip.clone()));
        assert_eq!(TypeSystem::more_specific(&CType::int(), &CType::long()), None);
        assert_eq!(TypeSystem::more_specific(&CType::int(), &CType::constant(CType::int())), Some(CType::int()));
    }

    #[test]
    fn size_classes() {
        assert!(TypeSystem::same_size_class(&CType::int(), &CType::uint()));
        assert!(TypeSystem::same_size_class(&CType::pointer(CType::int()), &CType::pointer(CType::char())));
        assert!(!TypeSystem::same_size_class(&CType::int(), &CType::long()));
        assert!(!TypeSystem::same_size_class(&CType::int(), &CType::pointer(CType::int())));
    }
}
