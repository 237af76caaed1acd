use pest::Parser;
use pest::iterators::Pair;
use std::collections::BTreeMap;
use crate::error::Error;
use crate::formula::{BvCmp, BvOp, Model, Node, Sort, Term, Value};
use crate::name::split_instance;

#[derive(Parser)]
#[grammar = "smt2.pest"]
pub struct Smt2Parser;


/// symbol -> (argument sorts, result sort)
pub type Signatures = BTreeMap<String, (Vec<Sort>, Sort)>;

/// a parsed script: its declarations and the conjunction of its assertions
pub struct Script {
    pub signatures: Signatures,
    pub assertions: Vec<Term>,
}

pub fn parse_script(src: &str) -> Result<Script, Error> {
    let mut script = Script {
        signatures: Signatures::new(),
        assertions: Vec::new(),
    };

    let top = Smt2Parser::parse(Rule::script, src)?.next()
        .ok_or_else(||Error::Parse("empty script".to_string()))?;

    for cmd in top.into_inner() {
        match cmd.as_rule() {
            Rule::declare_fun => {
                let mut parts = cmd.into_inner();
                let name = symbol_text(next(&mut parts)?);
                let mut sorts = Vec::new();
                for p in parts {
                    sorts.push(sort(p)?);
                }
                let ret = sorts.pop().ok_or_else(||Error::Parse(format!("declaration of {} has no sort", name)))?;
                script.signatures.insert(name, (sorts, ret));
            }
            Rule::define_fun => {
                debug!("ignoring define-fun in script");
            }
            Rule::assertion => {
                let t = next(&mut cmd.into_inner())?;
                script.assertions.push(term(t, &script.signatures)?);
            }
            Rule::other | Rule::EOI => (),
            e => panic!("ICE: unexpected rule {:?} in script", e),
        }
    }
    Ok(script)
}

pub fn parse_term(src: &str, signatures: &Signatures) -> Result<Term, Error> {
    let top = Smt2Parser::parse(Rule::single_term, src)?.next()
        .ok_or_else(||Error::Parse("empty term".to_string()))?;
    let t = next(&mut top.into_inner())?;
    term(t, signatures)
}

/// Reads a solver model. Only nullary definitions with literal bodies are
/// kept, function interpretations are skipped.
pub fn parse_model(src: &str) -> Result<Model, Error> {
    let mut model = Model::new();
    let top = Smt2Parser::parse(Rule::model, src)?.next()
        .ok_or_else(||Error::Parse("empty model".to_string()))?;

    for def in top.into_inner() {
        if def.as_rule() != Rule::define_fun {
            continue;
        }
        let mut name = None;
        let mut has_params = false;
        let mut body = None;
        for part in def.into_inner() {
            match part.as_rule() {
                Rule::symbol => name = Some(symbol_text(part)),
                Rule::param  => has_params = true,
                Rule::sort   => (),
                Rule::term   => body = Some(part),
                e => panic!("ICE: unexpected rule {:?} in define-fun", e),
            }
        }
        if has_params {
            continue;
        }
        if let (Some(name), Some(body)) = (name, body) {
            match literal(body) {
                Some(v) => model.insert(name, v),
                None => debug!("skipping non-literal model value for {}", name),
            }
        }
    }
    Ok(model)
}


fn next<'a>(pairs: &mut pest::iterators::Pairs<'a, Rule>) -> Result<Pair<'a, Rule>, Error> {
    pairs.next().ok_or_else(||Error::Parse("unexpected end of input".to_string()))
}

fn symbol_text(pair: Pair<Rule>) -> String {
    let s = pair.as_str();
    if s.starts_with('|') && s.ends_with('|') && s.len() >= 2 {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn numeral(pair: Pair<Rule>) -> Result<u32, Error> {
    pair.as_str().parse::<u32>().map_err(|e|Error::Parse(format!("{}: {}", pair.as_str(), e)))
}

fn sort(pair: Pair<Rule>) -> Result<Sort, Error> {
    let inner = next(&mut pair.into_inner())?;
    match inner.as_rule() {
        Rule::bool_sort => Ok(Sort::Bool),
        Rule::bv_sort => {
            let n = next(&mut inner.into_inner())?;
            Ok(Sort::BitVec(numeral(n)?))
        }
        e => panic!("ICE: unexpected rule {:?} in sort", e),
    }
}

fn literal(pair: Pair<Rule>) -> Option<Value> {
    let inner = pair.into_inner().next()?;
    match inner.as_rule() {
        Rule::hexadecimal => {
            let digits = &inner.as_str()[2..];
            let value = u128::from_str_radix(digits, 16).ok()?;
            Some(Value::bv(value, digits.len() as u32 * 4))
        }
        Rule::binary => {
            let digits = &inner.as_str()[2..];
            let value = u128::from_str_radix(digits, 2).ok()?;
            Some(Value::bv(value, digits.len() as u32))
        }
        Rule::bv_literal => {
            let mut parts = inner.into_inner();
            let value = parts.next()?.as_str()[2..].parse::<u128>().ok()?;
            let width = parts.next()?.as_str().parse::<u32>().ok()?;
            Some(Value::bv(value, width))
        }
        Rule::symbol => match inner.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn constant(v: Value) -> Term {
    match v {
        Value::Bool(b) => Term::new(Node::Bool(b)),
        Value::BitVec{value, width} => Term::new(Node::BitVec{value, width}),
    }
}

fn term(pair: Pair<Rule>, sigs: &Signatures) -> Result<Term, Error> {
    let text = pair.as_str().to_string();
    if let Some(v) = literal(pair.clone()) {
        return Ok(constant(v));
    }

    let inner = next(&mut pair.into_inner())?;
    match inner.as_rule() {
        Rule::symbol => {
            let name = symbol_text(inner);
            match sigs.get(&name) {
                Some((args, sort)) if args.is_empty() => {
                    let (base, index) = split_instance(&name);
                    Ok(Term::new(Node::Var{name: base.to_string(), index, sort: *sort}))
                }
                Some(_) => Err(Error::Parse(format!("function {} used as a constant", name))),
                None => Err(Error::Parse(format!("undeclared symbol {}", name))),
            }
        }
        Rule::application => {
            let mut parts = inner.into_inner();
            let head = next(&mut parts)?;
            let mut args = Vec::new();
            for p in parts {
                args.push(term(p, sigs)?);
            }
            match head.as_rule() {
                Rule::indexed => indexed(head, args, &text),
                Rule::symbol => application(&symbol_text(head), args, sigs, &text),
                e => panic!("ICE: unexpected rule {:?} as function head", e),
            }
        }
        e => Err(Error::Parse(format!("unexpected {:?} in term {}", e, text))),
    }
}

fn arity(args: &[Term], n: usize, text: &str) -> Result<(), Error> {
    if args.len() != n {
        return Err(Error::Parse(format!("expected {} arguments in {}", n, text)));
    }
    Ok(())
}

fn indexed(head: Pair<Rule>, mut args: Vec<Term>, text: &str) -> Result<Term, Error> {
    let mut parts = head.into_inner();
    let op = next(&mut parts)?.as_str().to_string();
    let mut nums = Vec::new();
    for p in parts {
        nums.push(numeral(p)?);
    }
    arity(&args, 1, text)?;
    let arg = args.remove(0);
    match (op.as_str(), nums.as_slice()) {
        ("extract", [hi, lo]) => Ok(Term::new(Node::Extract{hi: *hi, lo: *lo, arg})),
        ("zero_extend", [by]) => Ok(Term::new(Node::Extend{signed: false, by: *by, arg})),
        ("sign_extend", [by]) => Ok(Term::new(Node::Extend{signed: true, by: *by, arg})),
        _ => Err(Error::Parse(format!("unsupported indexed operator in {}", text))),
    }
}

fn application(head: &str, args: Vec<Term>, sigs: &Signatures, text: &str) -> Result<Term, Error> {
    let fold = |args: Vec<Term>, f: &dyn Fn(Term, Term) -> Node| -> Result<Term, Error> {
        let mut it = args.into_iter();
        let mut acc = it.next().ok_or_else(||Error::Parse(format!("no arguments in {}", text)))?;
        for a in it {
            acc = Term::new(f(acc, a));
        }
        Ok(acc)
    };
    let two = |args: Vec<Term>| -> Result<(Term, Term), Error> {
        arity(&args, 2, text)?;
        let mut it = args.into_iter();
        match (it.next(), it.next()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(Error::Parse(format!("expected two arguments in {}", text))),
        }
    };

    if let Some(op) = BvOp::from_smt_name(head) {
        if args.len() < 2 {
            return Err(Error::Parse(format!("expected arguments in {}", text)));
        }
        return fold(args, &|a, b| Node::Bv(op, a, b));
    }

    let cmp = |op: BvCmp, swap: bool, args: Vec<Term>| -> Result<Term, Error> {
        let (a, b) = two(args)?;
        Ok(Term::new(if swap { Node::Cmp(op, b, a) } else { Node::Cmp(op, a, b) }))
    };

    match head {
        "and" => fold(args, &|a, b| Node::And(a, b)),
        "or"  => fold(args, &|a, b| Node::Or(a, b)),
        "not" => {
            arity(&args, 1, text)?;
            Ok(Term::new(Node::Not(args.into_iter().next().ok_or_else(||Error::Parse(text.to_string()))?)))
        }
        "=>" => { let (a, b) = two(args)?; Ok(Term::new(Node::Implies(a, b))) }
        "="  => { let (a, b) = two(args)?; Ok(Term::new(Node::Eq(a, b))) }
        "distinct" => { let (a, b) = two(args)?; Ok(Term::new(Node::Not(Term::new(Node::Eq(a, b))))) }
        "ite" => {
            arity(&args, 3, text)?;
            let mut it = args.into_iter();
            match (it.next(), it.next(), it.next()) {
                (Some(c), Some(t), Some(e)) => Ok(Term::new(Node::Ite(c, t, e))),
                _ => Err(Error::Parse(text.to_string())),
            }
        }
        "bvneg" | "bvnot" => {
            arity(&args, 1, text)?;
            let a = args.into_iter().next().ok_or_else(||Error::Parse(text.to_string()))?;
            Ok(Term::new(if head == "bvneg" { Node::BvNeg(a) } else { Node::BvNot(a) }))
        }
        "bvult" => cmp(BvCmp::Ult, false, args),
        "bvule" => cmp(BvCmp::Ule, false, args),
        "bvslt" => cmp(BvCmp::Slt, false, args),
        "bvsle" => cmp(BvCmp::Sle, false, args),
        "bvugt" => cmp(BvCmp::Ult, true, args),
        "bvuge" => cmp(BvCmp::Ule, true, args),
        "bvsgt" => cmp(BvCmp::Slt, true, args),
        "bvsge" => cmp(BvCmp::Sle, true, args),
        _ => {
            let (params, sort) = sigs.get(head)
                .ok_or_else(||Error::Parse(format!("undeclared function {}", head)))?;
            if params.len() != args.len() {
                return Err(Error::Parse(format!("{} takes {} arguments in {}", head, params.len(), text)));
            }
            let (func, index) = split_instance(head);
            Ok(Term::new(Node::App{func: func.to_string(), index, args, sort: *sort}))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaManager;
    use crate::smt;

    #[test]
    fn script_round_trip() {
        let f = FormulaManager::new();
        let x = f.make_variable("main::x", Some(3), Sort::BitVec(32));
        let p = f.make_variable("__address_of__main::x", None, Sort::BitVec(64));
        let a = f.make_uf("main::a", Some(2), vec![f.make_zero(64)], Sort::BitVec(32));
        let t = f.and(
            &f.implies(&f.not_equal(&p, &f.make_zero(64)), &f.less_than(&x, &a, true)),
            &f.equal(&f.extract(&f.zero_extend(&x, 8), 39, 8), &f.make_bitvector(-1, 32)),
        );

        let s = parse_script(&smt::script(&t)).unwrap();
        assert_eq!(s.assertions.len(), 1);
        assert_eq!(s.assertions[0], t);
        assert_eq!(s.signatures.get("main::a@2"), Some(&(vec![Sort::BitVec(64)], Sort::BitVec(32))));
    }

    #[test]
    fn foreign_operators() {
        let mut sigs = Signatures::new();
        sigs.insert("y".to_string(), (vec![], Sort::BitVec(8)));
        let t = parse_term("(bvugt y #x0f)", &sigs).unwrap();
        let f = FormulaManager::new();
        let y = f.make_variable("y", None, Sort::BitVec(8));
        assert_eq!(t, f.less_than(&f.make_bitvector(15, 8), &y, false));

        let t = parse_term("(bvadd y y #b00000001)", &sigs).unwrap();
        assert_eq!(t.to_string(), "(bvadd (bvadd y y) (_ bv1 8))");
        assert!(parse_term("(bvadd z y)", &sigs).is_err());
    }

    #[test]
    fn models() {
        let src = "(model
            (define-fun |main::x@4| () (_ BitVec 32) #x00000005)
            (define-fun __branch__7 () Bool false)
            (define-fun |f@1| ((x!0 (_ BitVec 8))) (_ BitVec 8) x!0)
            (define-fun y () (_ BitVec 4) (_ bv9 4))
        )";
        let m = parse_model(src).unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.get("main::x@4"), Some(&Value::bv(5, 32)));
        assert_eq!(m.get("__branch__7"), Some(&Value::Bool(false)));
        assert_eq!(m.get("y"), Some(&Value::bv(9, 4)));

        let bare = "(\n (define-fun b () Bool true)\n)";
        assert_eq!(parse_model(bare).unwrap().get("b"), Some(&Value::Bool(true)));
    }
}
