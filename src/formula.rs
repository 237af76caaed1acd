use metrohash::MetroHash64;
use serde::{Serialize, Serializer, Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::rc::Rc;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sort {
    Bool,
    BitVec(u32),
}

impl Sort {
    pub fn width(&self) -> Option<u32> {
        match self {
            Sort::Bool => None,
            Sort::BitVec(w) => Some(*w),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BvOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    Concat,
}

impl BvOp {
    pub fn smt_name(&self) -> &'static str {
        match self {
            BvOp::Add       => "bvadd",
            BvOp::Sub       => "bvsub",
            BvOp::Mul       => "bvmul",
            BvOp::UDiv      => "bvudiv",
            BvOp::SDiv      => "bvsdiv",
            BvOp::URem      => "bvurem",
            BvOp::SRem      => "bvsrem",
            BvOp::Shl       => "bvshl",
            BvOp::LShr      => "bvlshr",
            BvOp::AShr      => "bvashr",
            BvOp::And       => "bvand",
            BvOp::Or        => "bvor",
            BvOp::Xor       => "bvxor",
            BvOp::Concat    => "concat",
        }
    }

    pub fn from_smt_name(s: &str) -> Option<Self> {
        Some(match s {
            "bvadd"     => BvOp::Add,
            "bvsub"     => BvOp::Sub,
            "bvmul"     => BvOp::Mul,
            "bvudiv"    => BvOp::UDiv,
            "bvsdiv"    => BvOp::SDiv,
            "bvurem"    => BvOp::URem,
            "bvsrem"    => BvOp::SRem,
            "bvshl"     => BvOp::Shl,
            "bvlshr"    => BvOp::LShr,
            "bvashr"    => BvOp::AShr,
            "bvand"     => BvOp::And,
            "bvor"      => BvOp::Or,
            "bvxor"     => BvOp::Xor,
            "concat"    => BvOp::Concat,
            _ => return None,
        })
    }
}

/// ordered comparisons. greater-than is expressed by swapping operands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BvCmp {
    Ult,
    Ule,
    Slt,
    Sle,
}

impl BvCmp {
    pub fn smt_name(&self) -> &'static str {
        match self {
            BvCmp::Ult => "bvult",
            BvCmp::Ule => "bvule",
            BvCmp::Slt => "bvslt",
            BvCmp::Sle => "bvsle",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Node {
    Bool(bool),
    BitVec {
        value:  u128,
        width:  u32,
    },
    Var {
        name:   String,
        index:  Option<u32>,
        sort:   Sort,
    },
    App {
        func:   String,
        index:  Option<u32>,
        args:   Vec<Term>,
        sort:   Sort,
    },
    Not(Term),
    And(Term, Term),
    Or(Term, Term),
    Implies(Term, Term),
    Eq(Term, Term),
    Ite(Term, Term, Term),
    BvNeg(Term),
    BvNot(Term),
    Bv(BvOp, Term, Term),
    Cmp(BvCmp, Term, Term),
    Extract {
        hi:     u32,
        lo:     u32,
        arg:    Term,
    },
    Extend {
        signed: bool,
        by:     u32,
        arg:    Term,
    },
}

struct TermData {
    hash:   u64,
    node:   Node,
}

/// Immutable, shared formula node. Equality and hashing use a structural
/// hash computed once at construction, so whole path formulas are cheap
/// map keys.
#[derive(Clone)]
pub struct Term(Rc<TermData>);

impl Term {
    pub fn new(node: Node) -> Self {
        let mut h = MetroHash64::default();
        node.hash(&mut h);
        Term(Rc::new(TermData{hash: h.finish(), node}))
    }

    pub fn node(&self) -> &Node {
        &self.0.node
    }

    pub fn ptr_eq(a: &Term, b: &Term) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    fn id(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    pub fn sort(&self) -> Sort {
        match self.node() {
            Node::Bool(_)
            | Node::Not(_)
            | Node::And(..)
            | Node::Or(..)
            | Node::Implies(..)
            | Node::Eq(..)
            | Node::Cmp(..)
            => Sort::Bool,
            Node::BitVec{width, ..} => Sort::BitVec(*width),
            Node::Var{sort, ..} | Node::App{sort, ..} => *sort,
            Node::Ite(_, t, _) => t.sort(),
            Node::BvNeg(a) | Node::BvNot(a) => a.sort(),
            Node::Bv(BvOp::Concat, a, b) => Sort::BitVec(a.width() + b.width()),
            Node::Bv(_, a, _) => a.sort(),
            Node::Extract{hi, lo, ..} => Sort::BitVec(hi - lo + 1),
            Node::Extend{by, arg, ..} => Sort::BitVec(arg.width() + by),
        }
    }

    pub fn is_bool(&self) -> bool {
        self.sort() == Sort::Bool
    }

    pub fn width(&self) -> u32 {
        match self.sort() {
            Sort::BitVec(w) => w,
            Sort::Bool => panic!("ICE: bit width of boolean term {}", self),
        }
    }

    /// rendered symbol of a variable, `name@index` or `name`
    pub fn symbol(&self) -> Option<String> {
        match self.node() {
            Node::Var{name, index: Some(i), ..} => Some(format!("{}@{}", name, i)),
            Node::Var{name, index: None, ..} => Some(name.clone()),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Term> {
        match self.node() {
            Node::Bool(_) | Node::BitVec{..} | Node::Var{..} => Vec::new(),
            Node::App{args, ..} => args.iter().collect(),
            Node::Not(a) | Node::BvNeg(a) | Node::BvNot(a) => vec![a],
            Node::Extract{arg, ..} | Node::Extend{arg, ..} => vec![arg],
            Node::And(a, b)
            | Node::Or(a, b)
            | Node::Implies(a, b)
            | Node::Eq(a, b)
            | Node::Bv(_, a, b)
            | Node::Cmp(_, a, b)
            => vec![a, b],
            Node::Ite(c, t, e) => vec![c, t, e],
        }
    }

    /// every variable occurring in the term, by rendered symbol
    pub fn variables(&self) -> BTreeMap<String, Sort> {
        let mut out = BTreeMap::new();
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![self];
        while let Some(t) = stack.pop() {
            if !seen.insert(t.id()) {
                continue;
            }
            if let Some(sym) = t.symbol() {
                out.insert(sym, t.sort());
            }
            stack.extend(t.children());
        }
        out
    }

    pub fn evaluate(&self, model: &Model) -> Option<Value> {
        let mut memo = HashMap::new();
        eval(self, model, &mut memo)
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || (self.0.hash == other.0.hash && self.0.node == other.0.node)
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if Rc::ptr_eq(&self.0, &other.0) {
            return std::cmp::Ordering::Equal;
        }
        self.0.node.cmp(&other.0.node)
    }
}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Node::deserialize(deserializer).map(Term::new)
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    BitVec {
        value:  u128,
        width:  u32,
    },
}

impl Value {
    pub fn bv(value: u128, width: u32) -> Self {
        Value::BitVec{value: value & mask(width), width}
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            Value::BitVec{value, ..} => Some(*value),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::BitVec{value, width} => write!(f, "(_ bv{} {})", value, width),
        }
    }
}

/// an assignment of values to rendered variable symbols
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    values: BTreeMap<String, Value>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, symbol: S, value: Value) {
        self.values.insert(symbol.into(), value);
    }

    pub fn get(&self, symbol: &str) -> Option<&Value> {
        self.values.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.values.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}


fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::max_value()
    } else {
        (1u128 << width) - 1
    }
}

fn to_signed(value: u128, width: u32) -> i128 {
    if width == 0 || width >= 128 {
        return value as i128;
    }
    if value & (1u128 << (width - 1)) != 0 {
        (value | !mask(width)) as i128
    } else {
        value as i128
    }
}

fn eval_bv(op: BvOp, a: u128, b: u128, width: u32, bwidth: u32) -> Option<Value> {
    let m = mask(width);
    let v = match op {
        BvOp::Add   => a.wrapping_add(b),
        BvOp::Sub   => a.wrapping_sub(b),
        BvOp::Mul   => a.wrapping_mul(b),
        BvOp::UDiv  => if b == 0 { m } else { a / b },
        BvOp::URem  => if b == 0 { a } else { a % b },
        BvOp::SDiv  => {
            let (sa, sb) = (to_signed(a, width), to_signed(b, width));
            if sb == 0 {
                if sa < 0 { 1 } else { m }
            } else {
                sa.wrapping_div(sb) as u128
            }
        }
        BvOp::SRem  => {
            let (sa, sb) = (to_signed(a, width), to_signed(b, width));
            if sb == 0 { a } else { sa.wrapping_rem(sb) as u128 }
        }
        BvOp::Shl   => if b >= width as u128 { 0 } else { a << b },
        BvOp::LShr  => if b >= width as u128 { 0 } else { a >> b },
        BvOp::AShr  => {
            let sa = to_signed(a, width);
            let shift = std::cmp::min(b, width as u128 - 1) as u32;
            (sa >> shift) as u128
        }
        BvOp::And   => a & b,
        BvOp::Or    => a | b,
        BvOp::Xor   => a ^ b,
        BvOp::Concat => {
            if width + bwidth > 128 {
                return None;
            }
            return Some(Value::bv((a << bwidth) | b, width + bwidth));
        }
    };
    Some(Value::bv(v, width))
}

fn eval(t: &Term, model: &Model, memo: &mut HashMap<*const (), Option<Value>>) -> Option<Value> {
    if let Some(v) = memo.get(&t.id()) {
        return *v;
    }
    let bv = |v: Option<Value>| match v {
        Some(Value::BitVec{value, width}) if width <= 128 => Some((value, width)),
        _ => None,
    };
    let bl = |v: Option<Value>| v.and_then(|v|v.as_bool());

    let r = match t.node() {
        Node::Bool(b) => Some(Value::Bool(*b)),
        Node::BitVec{value, width} => if *width <= 128 { Some(Value::bv(*value, *width)) } else { None },
        Node::Var{..} => t.symbol().and_then(|s|model.get(&s).cloned()),
        Node::App{..} => None,
        Node::Not(a) => bl(eval(a, model, memo)).map(|a|Value::Bool(!a)),
        Node::And(a, b) => match bl(eval(a, model, memo)) {
            Some(false) => Some(Value::Bool(false)),
            Some(true) => bl(eval(b, model, memo)).map(Value::Bool),
            None => match bl(eval(b, model, memo)) {
                Some(false) => Some(Value::Bool(false)),
                _ => None,
            },
        },
        Node::Or(a, b) => match bl(eval(a, model, memo)) {
            Some(true) => Some(Value::Bool(true)),
            Some(false) => bl(eval(b, model, memo)).map(Value::Bool),
            None => match bl(eval(b, model, memo)) {
                Some(true) => Some(Value::Bool(true)),
                _ => None,
            },
        },
        Node::Implies(a, b) => match bl(eval(a, model, memo)) {
            Some(false) => Some(Value::Bool(true)),
            Some(true) => bl(eval(b, model, memo)).map(Value::Bool),
            None => match bl(eval(b, model, memo)) {
                Some(true) => Some(Value::Bool(true)),
                _ => None,
            },
        },
        Node::Eq(a, b) => {
            match (eval(a, model, memo), eval(b, model, memo)) {
                (Some(x), Some(y)) => Some(Value::Bool(x == y)),
                _ => None,
            }
        }
        Node::Ite(c, x, y) => match bl(eval(c, model, memo)) {
            Some(true) => eval(x, model, memo),
            Some(false) => eval(y, model, memo),
            None => None,
        },
        Node::BvNeg(a) => bv(eval(a, model, memo)).map(|(v, w)|Value::bv(v.wrapping_neg(), w)),
        Node::BvNot(a) => bv(eval(a, model, memo)).map(|(v, w)|Value::bv(!v, w)),
        Node::Bv(op, a, b) => {
            match (bv(eval(a, model, memo)), bv(eval(b, model, memo))) {
                (Some((va, wa)), Some((vb, wb))) => eval_bv(*op, va, vb, wa, wb),
                _ => None,
            }
        }
        Node::Cmp(op, a, b) => {
            match (bv(eval(a, model, memo)), bv(eval(b, model, memo))) {
                (Some((va, w)), Some((vb, _))) => Some(Value::Bool(match op {
                    BvCmp::Ult => va < vb,
                    BvCmp::Ule => va <= vb,
                    BvCmp::Slt => to_signed(va, w) < to_signed(vb, w),
                    BvCmp::Sle => to_signed(va, w) <= to_signed(vb, w),
                })),
                _ => None,
            }
        }
        Node::Extract{hi, lo, arg} => {
            bv(eval(arg, model, memo)).map(|(v, _)|Value::bv(v >> lo, hi - lo + 1))
        }
        Node::Extend{signed, by, arg} => {
            match bv(eval(arg, model, memo)) {
                Some((v, w)) if w + by <= 128 => {
                    if *signed {
                        Some(Value::bv(to_signed(v, w) as u128, w + by))
                    } else {
                        Some(Value::bv(v, w + by))
                    }
                }
                _ => None,
            }
        }
    };
    memo.insert(t.id(), r);
    r
}


/// The term factory. Constructors fold constants and drop neutral
/// elements, so equal inputs always produce structurally equal terms.
#[derive(Clone, Default)]
pub struct FormulaManager {
    _private: (),
}

impl FormulaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_true(&self) -> Term {
        Term::new(Node::Bool(true))
    }

    pub fn make_false(&self) -> Term {
        Term::new(Node::Bool(false))
    }

    pub fn make_bool(&self, b: bool) -> Term {
        Term::new(Node::Bool(b))
    }

    pub fn is_true(&self, t: &Term) -> bool {
        match t.node() {
            Node::Bool(true) => true,
            _ => false,
        }
    }

    pub fn is_false(&self, t: &Term) -> bool {
        match t.node() {
            Node::Bool(false) => true,
            _ => false,
        }
    }

    /// two's complement constant of the given width
    pub fn make_bitvector(&self, value: i128, width: u32) -> Term {
        Term::new(Node::BitVec{value: (value as u128) & mask(width), width})
    }

    pub fn make_zero(&self, width: u32) -> Term {
        self.make_bitvector(0, width)
    }

    pub fn make_variable(&self, name: &str, index: Option<u32>, sort: Sort) -> Term {
        Term::new(Node::Var{name: name.to_string(), index, sort})
    }

    pub fn make_uf(&self, func: &str, index: Option<u32>, args: Vec<Term>, sort: Sort) -> Term {
        Term::new(Node::App{func: func.to_string(), index, args, sort})
    }

    fn constant(&self, t: &Term) -> Option<Value> {
        match t.node() {
            Node::Bool(b) => Some(Value::Bool(*b)),
            Node::BitVec{value, width} if *width <= 128 => Some(Value::bv(*value, *width)),
            _ => None,
        }
    }

    fn folded(&self, node: Node) -> Term {
        let t = Term::new(node);
        if t.children().iter().all(|c|self.constant(c).is_some()) {
            match t.evaluate(&Model::new()) {
                Some(Value::Bool(b)) => return self.make_bool(b),
                Some(Value::BitVec{value, width}) => return Term::new(Node::BitVec{value, width}),
                None => (),
            }
        }
        t
    }

    pub fn not(&self, a: &Term) -> Term {
        match a.node() {
            Node::Bool(b) => self.make_bool(!b),
            Node::Not(inner) => inner.clone(),
            _ => Term::new(Node::Not(a.clone())),
        }
    }

    pub fn and(&self, a: &Term, b: &Term) -> Term {
        if self.is_false(a) || self.is_true(b) {
            return a.clone();
        }
        if self.is_false(b) || self.is_true(a) {
            return b.clone();
        }
        if a == b {
            return a.clone();
        }
        Term::new(Node::And(a.clone(), b.clone()))
    }

    pub fn or(&self, a: &Term, b: &Term) -> Term {
        if self.is_true(a) || self.is_false(b) {
            return a.clone();
        }
        if self.is_true(b) || self.is_false(a) {
            return b.clone();
        }
        if a == b {
            return a.clone();
        }
        Term::new(Node::Or(a.clone(), b.clone()))
    }

    pub fn implies(&self, a: &Term, b: &Term) -> Term {
        if self.is_false(a) || self.is_true(b) {
            return self.make_true();
        }
        if self.is_true(a) {
            return b.clone();
        }
        Term::new(Node::Implies(a.clone(), b.clone()))
    }

    pub fn and_all<'a, I: IntoIterator<Item = &'a Term>>(&self, terms: I) -> Term {
        let mut r = self.make_true();
        for t in terms {
            r = self.and(&r, t);
        }
        r
    }

    pub fn or_all<'a, I: IntoIterator<Item = &'a Term>>(&self, terms: I) -> Term {
        let mut r = self.make_false();
        for t in terms {
            r = self.or(&r, t);
        }
        r
    }

    pub fn equal(&self, a: &Term, b: &Term) -> Term {
        if a.sort() != b.sort() {
            panic!("ICE: equality between {:?} and {:?} sorted terms {} and {}", a.sort(), b.sort(), a, b);
        }
        if a == b {
            return self.make_true();
        }
        self.folded(Node::Eq(a.clone(), b.clone()))
    }

    pub fn not_equal(&self, a: &Term, b: &Term) -> Term {
        let e = self.equal(a, b);
        self.not(&e)
    }

    pub fn ite(&self, c: &Term, t: &Term, e: &Term) -> Term {
        if self.is_true(c) || t == e {
            return t.clone();
        }
        if self.is_false(c) {
            return e.clone();
        }
        Term::new(Node::Ite(c.clone(), t.clone(), e.clone()))
    }

    pub fn neg(&self, a: &Term) -> Term {
        self.folded(Node::BvNeg(a.clone()))
    }

    pub fn bvnot(&self, a: &Term) -> Term {
        self.folded(Node::BvNot(a.clone()))
    }

    pub fn bv(&self, op: BvOp, a: &Term, b: &Term) -> Term {
        if op != BvOp::Concat && a.width() != b.width() {
            panic!("ICE: {} on {} and {} bit operands", op.smt_name(), a.width(), b.width());
        }
        self.folded(Node::Bv(op, a.clone(), b.clone()))
    }

    pub fn add(&self, a: &Term, b: &Term) -> Term {
        self.bv(BvOp::Add, a, b)
    }

    pub fn sub(&self, a: &Term, b: &Term) -> Term {
        self.bv(BvOp::Sub, a, b)
    }

    pub fn mul(&self, a: &Term, b: &Term) -> Term {
        self.bv(BvOp::Mul, a, b)
    }

    pub fn div(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.bv(if signed { BvOp::SDiv } else { BvOp::UDiv }, a, b)
    }

    pub fn rem(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.bv(if signed { BvOp::SRem } else { BvOp::URem }, a, b)
    }

    pub fn shl(&self, a: &Term, b: &Term) -> Term {
        self.bv(BvOp::Shl, a, b)
    }

    pub fn shr(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.bv(if signed { BvOp::AShr } else { BvOp::LShr }, a, b)
    }

    pub fn concat(&self, high: &Term, low: &Term) -> Term {
        self.bv(BvOp::Concat, high, low)
    }

    pub fn less_than(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.folded(Node::Cmp(if signed { BvCmp::Slt } else { BvCmp::Ult }, a.clone(), b.clone()))
    }

    pub fn less_equal(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.folded(Node::Cmp(if signed { BvCmp::Sle } else { BvCmp::Ule }, a.clone(), b.clone()))
    }

    pub fn greater_than(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.less_than(b, a, signed)
    }

    pub fn greater_equal(&self, a: &Term, b: &Term, signed: bool) -> Term {
        self.less_equal(b, a, signed)
    }

    pub fn extract(&self, a: &Term, hi: u32, lo: u32) -> Term {
        if hi < lo || hi >= a.width() {
            panic!("ICE: extract [{}:{}] from {} bit term", hi, lo, a.width());
        }
        if lo == 0 && hi + 1 == a.width() {
            return a.clone();
        }
        self.folded(Node::Extract{hi, lo, arg: a.clone()})
    }

    pub fn zero_extend(&self, a: &Term, by: u32) -> Term {
        if by == 0 {
            return a.clone();
        }
        self.folded(Node::Extend{signed: false, by, arg: a.clone()})
    }

    pub fn sign_extend(&self, a: &Term, by: u32) -> Term {
        if by == 0 {
            return a.clone();
        }
        self.folded(Node::Extend{signed: true, by, arg: a.clone()})
    }

    /// Rebuilds `t` with every variable passed through `f`. Variables `f`
    /// returns None for stay as they are. Shared subterms are visited once.
    pub fn substitute<F>(&self, t: &Term, f: &mut F) -> Term
        where F: FnMut(&str, Option<u32>, Sort) -> Option<Term>
    {
        let mut memo = HashMap::new();
        self.substitute_inner(t, f, &mut memo)
    }

    fn substitute_inner<F>(&self, t: &Term, f: &mut F, memo: &mut HashMap<*const (), Term>) -> Term
        where F: FnMut(&str, Option<u32>, Sort) -> Option<Term>
    {
        if let Some(r) = memo.get(&t.id()) {
            return r.clone();
        }
        let sub = |x: &Term, f: &mut F, memo: &mut HashMap<*const (), Term>| self.substitute_inner(x, f, memo);
        let r = match t.node() {
            Node::Bool(_) | Node::BitVec{..} => t.clone(),
            Node::Var{name, index, sort} => f(name, *index, *sort).unwrap_or_else(||t.clone()),
            Node::App{func, index, args, sort} => {
                let args = args.iter().map(|a|sub(a, f, memo)).collect();
                Term::new(Node::App{func: func.clone(), index: *index, args, sort: *sort})
            }
            Node::Not(a)        => { let a = sub(a, f, memo); self.not(&a) }
            Node::And(a, b)     => { let a = sub(a, f, memo); let b = sub(b, f, memo); self.and(&a, &b) }
            Node::Or(a, b)      => { let a = sub(a, f, memo); let b = sub(b, f, memo); self.or(&a, &b) }
            Node::Implies(a, b) => { let a = sub(a, f, memo); let b = sub(b, f, memo); self.implies(&a, &b) }
            Node::Eq(a, b)      => { let a = sub(a, f, memo); let b = sub(b, f, memo); self.equal(&a, &b) }
            Node::Ite(c, a, b)  => {
                let c = sub(c, f, memo);
                let a = sub(a, f, memo);
                let b = sub(b, f, memo);
                self.ite(&c, &a, &b)
            }
            Node::BvNeg(a)      => { let a = sub(a, f, memo); self.neg(&a) }
            Node::BvNot(a)      => { let a = sub(a, f, memo); self.bvnot(&a) }
            Node::Bv(op, a, b)  => { let a = sub(a, f, memo); let b = sub(b, f, memo); self.bv(*op, &a, &b) }
            Node::Cmp(op, a, b) => {
                let a = sub(a, f, memo);
                let b = sub(b, f, memo);
                self.folded(Node::Cmp(*op, a, b))
            }
            Node::Extract{hi, lo, arg} => { let a = sub(arg, f, memo); self.extract(&a, *hi, *lo) }
            Node::Extend{signed, by, arg} => {
                let a = sub(arg, f, memo);
                if *signed { self.sign_extend(&a, *by) } else { self.zero_extend(&a, *by) }
            }
        };
        memo.insert(t.id(), r.clone());
        r
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn x(i: u32) -> Term {
        FormulaManager::new().make_variable("x", Some(i), Sort::BitVec(32))
    }

    #[test]
    fn neutral_elements() {
        let f = FormulaManager::new();
        let a = f.equal(&x(2), &x(1));
        assert!(Term::ptr_eq(&f.and(&f.make_true(), &a), &a));
        assert!(f.is_false(&f.and(&a, &f.make_false())));
        assert!(f.is_true(&f.or(&a, &f.make_true())));
        assert_eq!(f.not(&f.not(&a)), a);
        assert!(f.is_true(&f.equal(&x(1), &x(1))));
        assert_eq!(f.ite(&f.make_true(), &x(1), &x(2)), x(1));
    }

    #[test]
    fn constants_fold() {
        let f = FormulaManager::new();
        let three = f.make_bitvector(3, 8);
        let five  = f.make_bitvector(5, 8);
        assert_eq!(f.add(&three, &five), f.make_bitvector(8, 8));
        assert_eq!(f.neg(&three), f.make_bitvector(-3, 8));
        assert!(f.is_true(&f.less_than(&f.make_bitvector(-1, 8), &three, true)));
        assert!(f.is_false(&f.less_than(&f.make_bitvector(-1, 8), &three, false)));
        assert_eq!(f.concat(&three, &five), f.make_bitvector(0x0305, 16));
        assert_eq!(f.sign_extend(&f.make_bitvector(-2, 8), 8), f.make_bitvector(-2, 16));
        assert_eq!(f.extract(&f.make_bitvector(0x1234, 16), 15, 8), f.make_bitvector(0x12, 8));
    }

    #[test]
    fn structural_equality_and_hash() {
        use std::collections::HashSet;
        let f = FormulaManager::new();
        let a = f.add(&x(3), &f.make_bitvector(1, 32));
        let b = f.add(&x(3), &f.make_bitvector(1, 32));
        assert!(!Term::ptr_eq(&a, &b));
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&f.add(&x(4), &f.make_bitvector(1, 32))));
    }

    #[test]
    fn evaluation() {
        let f = FormulaManager::new();
        let e = f.equal(&x(4), &f.add(&x(3), &f.make_bitvector(1, 32)));
        let mut m = Model::new();
        m.insert("x@3", Value::bv(41, 32));
        m.insert("x@4", Value::bv(42, 32));
        assert_eq!(e.evaluate(&m), Some(Value::Bool(true)));
        m.insert("x@4", Value::bv(43, 32));
        assert_eq!(e.evaluate(&m), Some(Value::Bool(false)));
        assert_eq!(e.evaluate(&Model::new()), None);
    }

    #[test]
    fn signed_division_truncates() {
        let f = FormulaManager::new();
        let q = f.div(&f.make_bitvector(-7, 32), &f.make_bitvector(2, 32), true);
        let r = f.rem(&f.make_bitvector(-7, 32), &f.make_bitvector(2, 32), true);
        assert_eq!(q, f.make_bitvector(-3, 32));
        assert_eq!(r, f.make_bitvector(-1, 32));
    }

    #[test]
    fn substitution() {
        let f = FormulaManager::new();
        let t = f.less_than(&x(1), &x(2), true);
        let r = f.substitute(&t, &mut |name, index, sort| {
            Some(f.make_variable(name, index.map(|i|i + 10), sort))
        });
        assert_eq!(r, f.less_than(&x(11), &x(12), true));
        assert_eq!(r.variables().keys().cloned().collect::<Vec<_>>(), vec!["x@11", "x@12"]);
    }
}
