use crate::formula::{Node, Sort, Term};
use rsmt2::print::{Expr2Smt, Sort2Smt, Sym2Smt};
use rsmt2::SmtRes;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write as FmtWrite};
use std::io::Write;

pub const LOGIC: &str = "QF_UFBV";


impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::BitVec(w) => write!(f, "(_ BitVec {})", w),
        }
    }
}

/// symbols carry `::`, `@` and brackets, none of which SMT-LIB allows bare
pub fn quote(symbol: &str) -> String {
    let simple = symbol.chars().all(|c| c.is_ascii_alphanumeric() || "~!$%^&*_-+=<>.?/".contains(c))
        && !symbol.chars().next().map(|c|c.is_ascii_digit()).unwrap_or(true);
    if simple {
        symbol.to_string()
    } else {
        format!("|{}|", symbol)
    }
}

fn symbol_of(name: &str, index: Option<u32>) -> String {
    match index {
        Some(i) => quote(&format!("{}@{}", name, i)),
        None => quote(name),
    }
}

fn write_term<W: FmtWrite>(w: &mut W, t: &Term) -> fmt::Result {
    match t.node() {
        Node::Bool(b) => write!(w, "{}", b),
        Node::BitVec{value, width} => write!(w, "(_ bv{} {})", value, width),
        Node::Var{name, index, ..} => write!(w, "{}", symbol_of(name, *index)),
        Node::App{func, index, args, ..} => {
            write!(w, "({}", symbol_of(func, *index))?;
            for a in args {
                write!(w, " ")?;
                write_term(w, a)?;
            }
            write!(w, ")")
        }
        Node::Not(a) => {
            write!(w, "(not ")?;
            write_term(w, a)?;
            write!(w, ")")
        }
        Node::And(a, b)     => write_app(w, "and", &[a, b]),
        Node::Or(a, b)      => write_app(w, "or", &[a, b]),
        Node::Implies(a, b) => write_app(w, "=>", &[a, b]),
        Node::Eq(a, b)      => write_app(w, "=", &[a, b]),
        Node::Ite(c, a, b)  => write_app(w, "ite", &[c, a, b]),
        Node::BvNeg(a)      => write_app(w, "bvneg", &[a]),
        Node::BvNot(a)      => write_app(w, "bvnot", &[a]),
        Node::Bv(op, a, b)  => write_app(w, op.smt_name(), &[a, b]),
        Node::Cmp(op, a, b) => write_app(w, op.smt_name(), &[a, b]),
        Node::Extract{hi, lo, arg} => {
            write!(w, "((_ extract {} {}) ", hi, lo)?;
            write_term(w, arg)?;
            write!(w, ")")
        }
        Node::Extend{signed, by, arg} => {
            write!(w, "((_ {} {}) ", if *signed {"sign_extend"} else {"zero_extend"}, by)?;
            write_term(w, arg)?;
            write!(w, ")")
        }
    }
}

fn write_app<W: FmtWrite>(w: &mut W, op: &str, args: &[&Term]) -> fmt::Result {
    write!(w, "({}", op)?;
    for a in args {
        write!(w, " ")?;
        write_term(w, a)?;
    }
    write!(w, ")")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self)
    }
}


/// a free symbol with its signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub symbol: String,
    pub args:   Vec<Sort>,
    pub sort:   Sort,
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args : Vec<String> = self.args.iter().map(|s|s.to_string()).collect();
        write!(f, "(declare-fun {} ({}) {})", quote(&self.symbol), args.join(" "), self.sort)
    }
}

/// every variable and function symbol in `t`, ordered by symbol
pub fn declarations(t: &Term) -> Vec<Declaration> {
    let mut out  = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut stack = vec![t.clone()];
    while let Some(t) = stack.pop() {
        if !seen.insert(t.clone()) {
            continue;
        }
        match t.node() {
            Node::Var{name, index, sort} => {
                let symbol = match index {
                    Some(i) => format!("{}@{}", name, i),
                    None => name.clone(),
                };
                out.insert(symbol.clone(), Declaration{symbol, args: Vec::new(), sort: *sort});
            }
            Node::App{func, index, args, sort} => {
                let symbol = match index {
                    Some(i) => format!("{}@{}", func, i),
                    None => func.clone(),
                };
                let sorts = args.iter().map(|a|a.sort()).collect();
                out.insert(symbol.clone(), Declaration{symbol, args: sorts, sort: *sort});
            }
            _ => (),
        }
        stack.extend(t.children().into_iter().cloned());
    }
    out.into_iter().map(|(_, d)|d).collect()
}

/// a complete script asserting `t`
pub fn script(t: &Term) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "(set-logic {})", LOGIC);
    for d in declarations(t) {
        let _ = writeln!(s, "{}", d);
    }
    let _ = writeln!(s, "(assert {})", t);
    s
}


impl Sort2Smt for Sort {
    fn sort_to_smt2<Writer>(&self, w: &mut Writer) -> SmtRes<()> where Writer: Write {
        write!(w, "{}", self)?;
        Ok(())
    }
}

impl Expr2Smt<()> for Term {
    fn expr_to_smt2<Writer>(&self, w: &mut Writer, _: ()) -> SmtRes<()> where Writer: Write {
        write!(w, "{}", self)?;
        Ok(())
    }
}

impl Sym2Smt<()> for Declaration {
    fn sym_to_smt2<Writer>(&self, w: &mut Writer, _: ()) -> SmtRes<()> where Writer: Write {
        write!(w, "{}", quote(&self.symbol))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaManager;

    #[test]
    fn rendering() {
        let f = FormulaManager::new();
        let x3 = f.make_variable("main::x", Some(3), Sort::BitVec(32));
        let x4 = f.make_variable("main::x", Some(4), Sort::BitVec(32));
        let e = f.equal(&x4, &f.add(&x3, &f.make_bitvector(1, 32)));
        assert_eq!(e.to_string(), "(= |main::x@4| (bvadd |main::x@3| (_ bv1 32)))");

        let c = f.extract(&f.sign_extend(&x3, 32), 40, 9);
        assert_eq!(c.to_string(), "((_ extract 40 9) ((_ sign_extend 32) |main::x@3|))");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("x"), "x");
        assert_eq!(quote("__branch__4"), "__branch__4");
        assert_eq!(quote("f::x@1"), "|f::x@1|");
        assert_eq!(quote("1x"), "|1x|");
    }

    #[test]
    fn declarations_are_collected_once() {
        let f = FormulaManager::new();
        let i  = f.make_variable("i", Some(1), Sort::BitVec(64));
        let a1 = f.make_uf("a", Some(2), vec![i.clone()], Sort::BitVec(8));
        let a2 = f.make_uf("a", Some(2), vec![f.make_bitvector(0, 64)], Sort::BitVec(8));
        let t  = f.and(&f.equal(&a1, &a2), &f.less_than(&i, &f.make_bitvector(4, 64), false));
        let d  = declarations(&t);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].to_string(), "(declare-fun |a@2| ((_ BitVec 64)) (_ BitVec 8))");
        assert_eq!(d[1].to_string(), "(declare-fun |i@1| () (_ BitVec 64))");
        assert!(script(&t).starts_with("(set-logic QF_UFBV)\n"));
    }

    #[test]
    fn rsmt2_printing() {
        let f = FormulaManager::new();
        let t = f.not(&f.make_variable("b", None, Sort::Bool));
        let mut buf = Vec::new();
        t.expr_to_smt2(&mut buf, ()).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "(not b)");

        let mut buf = Vec::new();
        Sort::BitVec(16).sort_to_smt2(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "(_ BitVec 16)");
    }
}
