use serde::{Serialize, Deserialize};


#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub file:   String,
    #[serde(default)]
    pub line:   usize,
}

impl Location {
    pub fn new(file: &str, line: usize) -> Self {
        Location {
            file: file.to_string(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.file.is_empty() {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntRank {
    Char,
    Short,
    Int,
    Long,
    LongLong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatRank {
    Float,
    Double,
    LongDouble,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub name:   String,
    #[serde(rename = "type")]
    pub typ:    CType,
}

/// C types as the frontend resolved them. Typedefs are already expanded.
/// A composite with `members: None` is incomplete here and gets completed
/// from the composite table by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CType {
    Void,
    Bool,
    Int {
        rank:       IntRank,
        signed:     bool,
    },
    Float {
        rank:       FloatRank,
    },
    Enum {
        name:       String,
    },
    Pointer {
        target:     Box<CType>,
    },
    Array {
        element:    Box<CType>,
        #[serde(default)]
        length:     Option<u64>,
    },
    Struct {
        name:       String,
        #[serde(default)]
        members:    Option<Vec<Member>>,
    },
    Union {
        name:       String,
        #[serde(default)]
        members:    Option<Vec<Member>>,
    },
    Function {
        ret:        Box<CType>,
        #[serde(default)]
        params:     Vec<CType>,
        #[serde(default)]
        vararg:     bool,
    },
    Qualified {
        #[serde(default)]
        is_const:   bool,
        #[serde(default)]
        is_volatile: bool,
        inner:      Box<CType>,
    },
}

impl CType {
    pub fn int() -> Self {
        CType::Int{rank: IntRank::Int, signed: true}
    }

    pub fn uint() -> Self {
        CType::Int{rank: IntRank::Int, signed: false}
    }

    pub fn char() -> Self {
        CType::Int{rank: IntRank::Char, signed: true}
    }

    pub fn uchar() -> Self {
        CType::Int{rank: IntRank::Char, signed: false}
    }

    pub fn short() -> Self {
        CType::Int{rank: IntRank::Short, signed: true}
    }

    pub fn long() -> Self {
        CType::Int{rank: IntRank::Long, signed: true}
    }

    pub fn ulong() -> Self {
        CType::Int{rank: IntRank::Long, signed: false}
    }

    pub fn double() -> Self {
        CType::Float{rank: FloatRank::Double}
    }

    pub fn pointer(target: CType) -> Self {
        CType::Pointer{target: Box::new(target)}
    }

    pub fn array(element: CType, length: Option<u64>) -> Self {
        CType::Array{element: Box::new(element), length}
    }

    pub fn struct_ref(name: &str) -> Self {
        CType::Struct{name: name.to_string(), members: None}
    }

    pub fn structure(name: &str, members: Vec<(&str, CType)>) -> Self {
        CType::Struct {
            name:       name.to_string(),
            members:    Some(members.into_iter().map(|(n, t)|Member{name: n.to_string(), typ: t}).collect()),
        }
    }

    pub fn constant(inner: CType) -> Self {
        CType::Qualified{is_const: true, is_volatile: false, inner: Box::new(inner)}
    }

    pub fn unqualified(&self) -> &CType {
        match self {
            CType::Qualified{inner, ..} => inner.unqualified(),
            t => t,
        }
    }

    pub fn is_qualified(&self) -> bool {
        match self {
            CType::Qualified{..} => true,
            _ => false,
        }
    }

    pub fn is_void(&self) -> bool {
        match self.unqualified() {
            CType::Void => true,
            _ => false,
        }
    }

    pub fn is_pointer(&self) -> bool {
        match self.unqualified() {
            CType::Pointer{..} => true,
            _ => false,
        }
    }

    pub fn is_array(&self) -> bool {
        match self.unqualified() {
            CType::Array{..} => true,
            _ => false,
        }
    }

    pub fn is_function(&self) -> bool {
        match self.unqualified() {
            CType::Function{..} => true,
            _ => false,
        }
    }

    pub fn pointee(&self) -> Option<&CType> {
        match self.unqualified() {
            CType::Pointer{target} => Some(target),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&CType> {
        match self.unqualified() {
            CType::Array{element, ..} => Some(element),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        match self.unqualified() {
            CType::Bool | CType::Int{..} | CType::Enum{..} => true,
            _ => false,
        }
    }

    pub fn is_float(&self) -> bool {
        match self.unqualified() {
            CType::Float{..} => true,
            _ => false,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || self.is_pointer()
    }

    pub fn is_aggregate(&self) -> bool {
        match self.unqualified() {
            CType::Struct{..} | CType::Union{..} | CType::Array{..} => true,
            _ => false,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self.unqualified() {
            CType::Int{signed, ..} => *signed,
            CType::Enum{..} | CType::Float{..} => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Bool => write!(f, "_Bool"),
            CType::Int{rank, signed} => {
                if !signed {
                    write!(f, "unsigned ")?;
                }
                match rank {
                    IntRank::Char       => write!(f, "char"),
                    IntRank::Short      => write!(f, "short"),
                    IntRank::Int        => write!(f, "int"),
                    IntRank::Long       => write!(f, "long"),
                    IntRank::LongLong   => write!(f, "long long"),
                }
            }
            CType::Float{rank: FloatRank::Float}        => write!(f, "float"),
            CType::Float{rank: FloatRank::Double}       => write!(f, "double"),
            CType::Float{rank: FloatRank::LongDouble}   => write!(f, "long double"),
            CType::Enum{name}   => write!(f, "enum {}", name),
            CType::Pointer{target} => write!(f, "{}*", target),
            CType::Array{element, length: Some(n)} => write!(f, "{}[{}]", element, n),
            CType::Array{element, length: None} => write!(f, "{}[]", element),
            CType::Struct{name, ..} => write!(f, "struct {}", name),
            CType::Union{name, ..}  => write!(f, "union {}", name),
            CType::Function{ret, params, vararg} => {
                let mut p : Vec<String> = params.iter().map(|p|p.to_string()).collect();
                if *vararg {
                    p.push("...".to_string());
                }
                write!(f, "{}({})", ret, p.join(", "))
            }
            CType::Qualified{is_const, is_volatile, inner} => {
                if *is_const {
                    write!(f, "const ")?;
                }
                if *is_volatile {
                    write!(f, "volatile ")?;
                }
                write!(f, "{}", inner)
            }
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Multiply,
    Divide,
    Modulo,
    Plus,
    Minus,
    ShiftLeft,
    ShiftRight,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
    BitwiseAnd,
    BitwiseXor,
    BitwiseOr,
    Equals,
    NotEquals,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        match self {
            BinaryOperator::LessThan
            | BinaryOperator::GreaterThan
            | BinaryOperator::LessEqual
            | BinaryOperator::GreaterEqual
            | BinaryOperator::Equals
            | BinaryOperator::NotEquals
            => true,
            _ => false,
        }
    }

    pub fn is_logical(&self) -> bool {
        match self {
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => true,
            _ => false,
        }
    }

    pub fn is_shift(&self) -> bool {
        match self {
            BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight => true,
            _ => false,
        }
    }

    pub fn returns_boolean(&self) -> bool {
        self.is_comparison() || self.is_logical()
    }
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            BinaryOperator::Multiply        => "*",
            BinaryOperator::Divide          => "/",
            BinaryOperator::Modulo          => "%",
            BinaryOperator::Plus            => "+",
            BinaryOperator::Minus           => "-",
            BinaryOperator::ShiftLeft       => "<<",
            BinaryOperator::ShiftRight      => ">>",
            BinaryOperator::LessThan        => "<",
            BinaryOperator::GreaterThan     => ">",
            BinaryOperator::LessEqual       => "<=",
            BinaryOperator::GreaterEqual    => ">=",
            BinaryOperator::BitwiseAnd      => "&",
            BinaryOperator::BitwiseXor      => "^",
            BinaryOperator::BitwiseOr       => "|",
            BinaryOperator::Equals          => "==",
            BinaryOperator::NotEquals       => "!=",
            BinaryOperator::LogicalAnd      => "&&",
            BinaryOperator::LogicalOr       => "||",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Minus,
    Plus,
    Not,
    Tilde,
}


/// Side effect free C expressions. Every node carries the type the
/// frontend computed for it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    IntLiteral {
        value:      u64,
        #[serde(rename = "type")]
        typ:        CType,
    },
    CharLiteral {
        value:      u8,
    },
    FloatLiteral {
        value:      String,
        #[serde(rename = "type")]
        typ:        CType,
    },
    StringLiteral {
        value:      String,
    },
    Id {
        name:       String,
        #[serde(default)]
        global:     bool,
        #[serde(rename = "type")]
        typ:        CType,
    },
    Binary {
        op:         BinaryOperator,
        lhs:        Box<Expression>,
        rhs:        Box<Expression>,
        #[serde(rename = "type")]
        typ:        CType,
    },
    Unary {
        op:         UnaryOperator,
        operand:    Box<Expression>,
        #[serde(rename = "type")]
        typ:        CType,
    },
    Deref {
        operand:    Box<Expression>,
        #[serde(rename = "type")]
        typ:        CType,
    },
    AddressOf {
        operand:    Box<Expression>,
        #[serde(rename = "type")]
        typ:        CType,
    },
    /// `owner.field`, or `owner->field` when `deref` is set
    Field {
        owner:      Box<Expression>,
        field:      String,
        #[serde(default)]
        deref:      bool,
        #[serde(rename = "type")]
        typ:        CType,
    },
    Subscript {
        array:      Box<Expression>,
        index:      Box<Expression>,
        #[serde(rename = "type")]
        typ:        CType,
    },
    Cast {
        operand:    Box<Expression>,
        #[serde(rename = "type")]
        typ:        CType,
    },
    SizeOf {
        of:         CType,
    },
}

impl Expression {
    pub fn typ(&self) -> CType {
        match self {
            Expression::CharLiteral{..}     => CType::char(),
            Expression::StringLiteral{..}   => CType::pointer(CType::char()),
            Expression::SizeOf{..}          => CType::ulong(),
            Expression::IntLiteral{typ, ..}
            | Expression::FloatLiteral{typ, ..}
            | Expression::Id{typ, ..}
            | Expression::Binary{typ, ..}
            | Expression::Unary{typ, ..}
            | Expression::Deref{typ, ..}
            | Expression::AddressOf{typ, ..}
            | Expression::Field{typ, ..}
            | Expression::Subscript{typ, ..}
            | Expression::Cast{typ, ..}
            => typ.clone(),
        }
    }

    pub fn int(value: u64) -> Self {
        Expression::IntLiteral{value, typ: CType::int()}
    }

    pub fn literal(value: u64, typ: CType) -> Self {
        Expression::IntLiteral{value, typ}
    }

    pub fn var(name: &str, typ: CType) -> Self {
        Expression::Id{name: name.to_string(), global: false, typ}
    }

    pub fn global(name: &str, typ: CType) -> Self {
        Expression::Id{name: name.to_string(), global: true, typ}
    }

    pub fn binary(op: BinaryOperator, lhs: Expression, rhs: Expression, typ: CType) -> Self {
        Expression::Binary{op, lhs: Box::new(lhs), rhs: Box::new(rhs), typ}
    }

    pub fn unary(op: UnaryOperator, operand: Expression, typ: CType) -> Self {
        Expression::Unary{op, operand: Box::new(operand), typ}
    }

    pub fn deref(operand: Expression) -> Self {
        let typ = operand.typ().pointee().cloned().unwrap_or_else(CType::int);
        Expression::Deref{operand: Box::new(operand), typ}
    }

    pub fn address_of(operand: Expression) -> Self {
        let typ = CType::pointer(operand.typ());
        Expression::AddressOf{operand: Box::new(operand), typ}
    }

    pub fn field(owner: Expression, field: &str, typ: CType) -> Self {
        Expression::Field{owner: Box::new(owner), field: field.to_string(), deref: false, typ}
    }

    pub fn arrow(owner: Expression, field: &str, typ: CType) -> Self {
        Expression::Field{owner: Box::new(owner), field: field.to_string(), deref: true, typ}
    }

    pub fn subscript(array: Expression, index: Expression) -> Self {
        let t = array.typ();
        let typ = t.element().or_else(||t.pointee()).cloned().unwrap_or_else(CType::int);
        Expression::Subscript{array: Box::new(array), index: Box::new(index), typ}
    }

    pub fn cast(operand: Expression, typ: CType) -> Self {
        Expression::Cast{operand: Box::new(operand), typ}
    }

    /// casts the frontend inserted do not change which object is meant
    pub fn strip_casts(&self) -> &Expression {
        match self {
            Expression::Cast{operand, ..} => operand.strip_casts(),
            e => e,
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::IntLiteral{value, ..}   => write!(f, "{}", value),
            Expression::CharLiteral{value}      => write!(f, "'\\x{:02x}'", value),
            Expression::FloatLiteral{value, ..} => write!(f, "{}", value),
            Expression::StringLiteral{value}    => write!(f, "{:?}", value),
            Expression::Id{name, ..}            => write!(f, "{}", name),
            Expression::Binary{op, lhs, rhs, ..} => write!(f, "({} {} {})", lhs, op, rhs),
            Expression::Unary{op, operand, ..}  => write!(f, "{}{}", match op {
                UnaryOperator::Minus    => "-",
                UnaryOperator::Plus     => "+",
                UnaryOperator::Not      => "!",
                UnaryOperator::Tilde    => "~",
            }, operand),
            Expression::Deref{operand, ..}      => write!(f, "*{}", operand),
            Expression::AddressOf{operand, ..}  => write!(f, "&{}", operand),
            Expression::Field{owner, field, deref, ..} => {
                write!(f, "{}{}{}", owner, if *deref {"->"} else {"."}, field)
            }
            Expression::Subscript{array, index, ..} => write!(f, "{}[{}]", array, index),
            Expression::Cast{operand, typ}      => write!(f, "({}){}", typ, operand),
            Expression::SizeOf{of}              => write!(f, "sizeof({})", of),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_json() {
        let json = r#"{
            "kind": "binary",
            "op":   "plus",
            "lhs":  {"kind": "id", "name": "x", "type": {"kind": "int", "rank": "int", "signed": true}},
            "rhs":  {"kind": "int_literal", "value": 1, "type": {"kind": "int", "rank": "int", "signed": true}},
            "type": {"kind": "int", "rank": "int", "signed": true}
        }"#;
        let e : Expression = serde_json::from_str(json).unwrap();
        assert_eq!(e, Expression::binary(BinaryOperator::Plus,
            Expression::var("x", CType::int()), Expression::int(1), CType::int()));
        assert_eq!(e.to_string(), "(x + 1)");
    }

    #[test]
    fn derived_types() {
        let p = Expression::var("p", CType::pointer(CType::char()));
        assert_eq!(Expression::deref(p.clone()).typ(), CType::char());
        assert_eq!(Expression::address_of(p.clone()).typ(), CType::pointer(CType::pointer(CType::char())));
        let a = Expression::var("a", CType::array(CType::long(), Some(4)));
        assert_eq!(Expression::subscript(a, Expression::int(2)).typ(), CType::long());
    }

    #[test]
    fn type_spelling() {
        assert_eq!(CType::pointer(CType::constant(CType::uchar())).to_string(), "const unsigned char*");
        assert_eq!(CType::array(CType::int(), None).to_string(), "int[]");
        assert!(CType::constant(CType::pointer(CType::Void)).is_pointer());
        assert!(!CType::uint().is_signed());
    }
}
