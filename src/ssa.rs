use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use crate::ast::CType;
use crate::formula::Term;
use crate::name::Key;
use crate::types::TypeSystem;


/// an indexed function application, `a(i)` for array `a` at index term `i`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncKey {
    pub key:    Key,
    pub args:   Vec<Term>,
}

/// Latest SSA index per key, plus the type each key was first seen with.
///
/// Maps are immutable and share their tables. Edits go through
/// [`SSAMapBuilder`], which copies a table only when it actually changes.
#[derive(Clone, Default)]
pub struct SSAMap {
    vars:       Rc<BTreeMap<Key, u32>>,
    funcs:      Rc<BTreeMap<FuncKey, u32>>,
    types:      Rc<BTreeMap<Key, CType>>,
    func_types: Rc<BTreeMap<Key, CType>>,
}

impl SSAMap {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_index(&self, key: &Key) -> Option<u32> {
        self.vars.get(key).cloned()
    }

    pub fn get_func_index(&self, key: &Key, args: &[Term]) -> Option<u32> {
        self.funcs.get(&FuncKey{key: key.clone(), args: args.to_vec()}).cloned()
    }

    pub fn get_type(&self, key: &Key) -> Option<&CType> {
        self.types.get(key)
    }

    /// result type of the indexed function `key`
    pub fn get_func_type(&self, key: &Key) -> Option<&CType> {
        self.func_types.get(key)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&Key, u32)> {
        self.vars.iter().map(|(k, i)|(k, *i))
    }

    pub fn funcs(&self) -> impl Iterator<Item = (&FuncKey, u32)> {
        self.funcs.iter().map(|(k, i)|(k, *i))
    }

    pub fn len(&self) -> usize {
        self.vars.len() + self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.funcs.is_empty()
    }

    pub fn builder(&self) -> SSAMapBuilder {
        SSAMapBuilder {
            base:       self.clone(),
            current:    self.clone(),
            changed:    false,
        }
    }

    /// Per key maximum of both maps. Both sides must agree on every key's
    /// type family; which of two compatible types wins is decided by
    /// [`TypeSystem::more_specific`].
    pub fn merge(a: &SSAMap, b: &SSAMap) -> SSAMap {
        if a.ptr_eq(b) {
            return a.clone();
        }

        let mut vars = (*a.vars).clone();
        for (k, i) in b.vars.iter() {
            let e = vars.entry(k.clone()).or_insert(*i);
            if *e < *i {
                *e = *i;
            }
        }

        let mut funcs = (*a.funcs).clone();
        for (k, i) in b.funcs.iter() {
            let e = funcs.entry(k.clone()).or_insert(*i);
            if *e < *i {
                *e = *i;
            }
        }

        SSAMap {
            vars:       Rc::new(vars),
            funcs:      Rc::new(funcs),
            types:      Rc::new(merge_types(&a.types, &b.types)),
            func_types: Rc::new(merge_types(&a.func_types, &b.func_types)),
        }
    }

    fn ptr_eq(&self, other: &SSAMap) -> bool {
        Rc::ptr_eq(&self.vars, &other.vars)
            && Rc::ptr_eq(&self.funcs, &other.funcs)
            && Rc::ptr_eq(&self.types, &other.types)
            && Rc::ptr_eq(&self.func_types, &other.func_types)
    }
}

fn merge_types(a: &BTreeMap<Key, CType>, b: &BTreeMap<Key, CType>) -> BTreeMap<Key, CType> {
    let mut r = a.clone();
    for (k, tb) in b {
        let merged = match r.get(k) {
            None => tb.clone(),
            Some(ta) if ta == tb => continue,
            Some(ta) => match TypeSystem::more_specific(ta, tb) {
                Some(t) => t,
                None if TypeSystem::same_size_class(ta, tb) => {
                    debug!("merging {} with types '{}' and '{}', keeping the first", k, ta, tb);
                    continue;
                }
                None => panic!("ICE: merging ssa maps with conflicting types '{}' and '{}' for {}", ta, tb, k),
            },
        };
        r.insert(k.clone(), merged);
    }
    r
}

impl PartialEq for SSAMap {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (
            self.vars == other.vars
            && self.funcs == other.funcs
            && self.types == other.types
            && self.func_types == other.func_types
        )
    }
}

impl Eq for SSAMap {}

impl Hash for SSAMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vars.hash(state);
        self.funcs.hash(state);
    }
}

impl std::fmt::Display for SSAMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (k, i) in self.vars.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", k.instance(*i))?;
        }
        for (k, i) in self.funcs.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let args : Vec<String> = k.args.iter().map(|a|a.to_string()).collect();
            write!(f, "{}({})", k.key.instance(*i), args.join(", "))?;
        }
        write!(f, "}}")
    }
}

impl std::fmt::Debug for SSAMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}


#[derive(Serialize, Deserialize)]
struct Snapshot {
    vars:       Vec<(Key, u32, CType)>,
    #[serde(default)]
    funcs:      Vec<(Key, Vec<Term>, u32)>,
    #[serde(default)]
    func_types: Vec<(Key, CType)>,
}

impl Serialize for SSAMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut vars = Vec::new();
        for (k, i) in self.vars.iter() {
            let t = self.types.get(k).cloned().unwrap_or(CType::Void);
            vars.push((k.clone(), *i, t));
        }
        let snapshot = Snapshot {
            vars,
            funcs:      self.funcs.iter().map(|(k, i)|(k.key.clone(), k.args.clone(), *i)).collect(),
            func_types: self.func_types.iter().map(|(k, t)|(k.clone(), t.clone())).collect(),
        };
        snapshot.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SSAMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Snapshot::deserialize(deserializer)?;
        let mut vars  = BTreeMap::new();
        let mut types = BTreeMap::new();
        for (k, i, t) in s.vars {
            types.insert(k.clone(), t);
            vars.insert(k, i);
        }
        let funcs = s.funcs.into_iter().map(|(key, args, i)|(FuncKey{key, args}, i)).collect();
        Ok(SSAMap {
            vars:       Rc::new(vars),
            funcs:      Rc::new(funcs),
            types:      Rc::new(types),
            func_types: Rc::new(s.func_types.into_iter().collect()),
        })
    }
}


/// Scoped editor over an [`SSAMap`]. Lives for one edge translation.
pub struct SSAMapBuilder {
    base:       SSAMap,
    current:    SSAMap,
    changed:    bool,
}

impl SSAMapBuilder {
    pub fn get_index(&self, key: &Key) -> Option<u32> {
        self.current.get_index(key)
    }

    pub fn get_type(&self, key: &Key) -> Option<&CType> {
        self.current.get_type(key)
    }

    pub fn get_func_index(&self, key: &Key, args: &[Term]) -> Option<u32> {
        self.current.get_func_index(key, args)
    }

    pub fn get_func_type(&self, key: &Key) -> Option<&CType> {
        self.current.get_func_type(key)
    }

    /// Records `key` at `index`. Indices only ever grow, and a key keeps
    /// the storage size it was first seen with.
    pub fn set_index(&mut self, key: &Key, typ: &CType, index: u32) {
        if let Some(old) = self.current.vars.get(key) {
            if index <= *old {
                panic!("ICE: ssa index of {} would go from {} to {}", key, old, index);
            }
        }
        check_type(&mut self.current.types, key, typ);
        Rc::make_mut(&mut self.current.vars).insert(key.clone(), index);
        self.changed = true;
    }

    pub fn set_func_index(&mut self, key: &Key, args: &[Term], typ: &CType, index: u32) {
        let fk = FuncKey{key: key.clone(), args: args.to_vec()};
        if let Some(old) = self.current.funcs.get(&fk) {
            if index <= *old {
                panic!("ICE: ssa index of {}({:?}) would go from {} to {}", key, args, old, index);
            }
        }
        check_type(&mut self.current.func_types, key, typ);
        Rc::make_mut(&mut self.current.funcs).insert(fk, index);
        self.changed = true;
    }

    pub fn keys(&self) -> Vec<Key> {
        self.current.vars.keys().cloned().collect()
    }

    /// every known application of `key` with its index
    pub fn func_entries(&self, key: &Key) -> Vec<(Vec<Term>, u32)> {
        self.current.funcs.iter()
            .filter(|(k, _)| &k.key == key)
            .map(|(k, i)|(k.args.clone(), *i))
            .collect()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn build(self) -> SSAMap {
        if self.changed {
            self.current
        } else {
            self.base
        }
    }
}

fn check_type(types: &mut Rc<BTreeMap<Key, CType>>, key: &Key, typ: &CType) {
    match types.get(key) {
        None => {
            Rc::make_mut(types).insert(key.clone(), typ.clone());
        }
        Some(old) if old == typ => (),
        Some(old) => {
            if !TypeSystem::same_size_class(old, typ) {
                panic!("ICE: {} recorded as '{}' cannot become '{}'", key, old, typ);
            }
            if old.unqualified() != typ.unqualified() && !old.is_pointer() {
                warn!("{} recorded as '{}' is used as '{}'", key, old, typ);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaManager;
    use proptest::prelude::*;

    fn x() -> Key {
        Key::scoped("main", "x")
    }

    #[test]
    fn builder_shares_unchanged_maps() {
        let m = SSAMap::empty();
        let b = m.builder();
        assert!(!b.changed());
        assert!(b.build().ptr_eq(&m));

        let mut b = m.builder();
        b.set_index(&x(), &CType::int(), 2);
        let m2 = b.build();
        assert_eq!(m2.get_index(&x()), Some(2));
        assert_eq!(m.get_index(&x()), None);
        assert_eq!(m2.to_string(), "{main::x@2}");
    }

    #[test]
    #[should_panic(expected = "ICE")]
    fn indices_never_decrease() {
        let mut b = SSAMap::empty().builder();
        b.set_index(&x(), &CType::int(), 3);
        b.set_index(&x(), &CType::int(), 3);
    }

    #[test]
    #[should_panic(expected = "ICE")]
    fn sizes_never_change() {
        let mut b = SSAMap::empty().builder();
        b.set_index(&x(), &CType::int(), 1);
        b.set_index(&x(), &CType::long(), 2);
    }

    #[test]
    fn signedness_is_tolerated() {
        let mut b = SSAMap::empty().builder();
        b.set_index(&x(), &CType::int(), 1);
        b.set_index(&x(), &CType::uint(), 2);
        assert_eq!(b.get_type(&x()), Some(&CType::int()));
    }

    #[test]
    fn function_entries() {
        let f = FormulaManager::new();
        let a = Key::scoped("main", "a");
        let i0 = vec![f.make_zero(64)];
        let i1 = vec![f.make_bitvector(1, 64)];
        let mut b = SSAMap::empty().builder();
        b.set_func_index(&a, &i0, &CType::int(), 2);
        b.set_func_index(&a, &i1, &CType::int(), 3);
        b.set_func_index(&a, &i0, &CType::int(), 4);
        let m = b.build();
        assert_eq!(m.get_func_index(&a, &i0), Some(4));
        assert_eq!(m.builder().func_entries(&a).len(), 2);
        assert_eq!(m.get_func_type(&a), Some(&CType::int()));
    }

    #[test]
    fn merge_picks_the_more_specific_type() {
        let mut a = SSAMap::empty().builder();
        a.set_index(&x(), &CType::array(CType::int(), None), 1);
        let mut b = SSAMap::empty().builder();
        b.set_index(&x(), &CType::array(CType::int(), Some(3)), 2);
        let m = SSAMap::merge(&a.build(), &b.build());
        assert_eq!(m.get_index(&x()), Some(2));
        assert_eq!(m.get_type(&x()), Some(&CType::array(CType::int(), Some(3))));
    }

    #[test]
    #[should_panic(expected = "ICE")]
    fn merge_rejects_conflicting_families() {
        let mut a = SSAMap::empty().builder();
        a.set_index(&x(), &CType::int(), 1);
        let mut b = SSAMap::empty().builder();
        b.set_index(&x(), &CType::pointer(CType::int()), 1);
        SSAMap::merge(&a.build(), &b.build());
    }

    #[test]
    fn json_snapshot() {
        let f = FormulaManager::new();
        let mut b = SSAMap::empty().builder();
        b.set_index(&x(), &CType::int(), 4);
        b.set_index(&Key::content(x(), 4), &CType::char(), 2);
        b.set_func_index(&Key::global("a"), &[f.make_bitvector(3, 64)], &CType::long(), 2);
        let m = b.build();
        let json = serde_json::to_string(&m).unwrap();
        let back : SSAMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.get_type(&Key::content(x(), 4)), Some(&CType::char()));
    }

    fn map_of(entries: &[(u8, u32)]) -> SSAMap {
        let mut b = SSAMap::empty().builder();
        for (k, i) in entries {
            let key = Key::global(&format!("v{}", k % 8));
            if b.get_index(&key).map(|old| old < *i).unwrap_or(true) {
                b.set_index(&key, &CType::int(), *i);
            }
        }
        b.build()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn merge_laws(a in prop::collection::vec((0u8..16, 1u32..20), 0..12),
                      b in prop::collection::vec((0u8..16, 1u32..20), 0..12))
        {
            let a = map_of(&a);
            let b = map_of(&b);
            let ab = SSAMap::merge(&a, &b);
            prop_assert_eq!(&SSAMap::merge(&a, &a), &a);
            prop_assert_eq!(&ab, &SSAMap::merge(&b, &a));
            for (k, i) in ab.vars() {
                let expected = std::cmp::max(a.get_index(k), b.get_index(k));
                prop_assert_eq!(Some(i), expected);
            }
            for (k, _) in a.vars().chain(b.vars()) {
                prop_assert!(ab.get_index(k).is_some());
            }
        }
    }
}
