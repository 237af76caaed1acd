#![allow(dead_code)]

use pathformula::ast::{BinaryOperator, CType, Expression};
use pathformula::cfa::{CfaEdge, CfaNode, Declaration, EdgeKind, FunctionCall, Statement};
use pathformula::formula::{Model, Node, Sort, Term, Value};
use std::collections::BTreeSet;

// ============================================================================
// edge builders
// ============================================================================

pub fn edge(kind: EdgeKind) -> CfaEdge {
    CfaEdge::new(CfaNode::new(1, "main"), CfaNode::new(2, "main"), kind)
}

pub fn int(name: &str) -> Expression {
    Expression::var(name, CType::int())
}

pub fn int_ptr(name: &str) -> Expression {
    Expression::var(name, CType::pointer(CType::int()))
}

pub fn assign(lhs: Expression, rhs: Expression) -> CfaEdge {
    edge(EdgeKind::Statement{statement: Statement::Assignment{lhs, rhs}})
}

pub fn declare(name: &str, typ: CType) -> CfaEdge {
    edge(EdgeKind::Declaration{declaration: Declaration::Variable {
        name: name.to_string(), global: false, typ, init: None,
    }})
}

pub fn assume(expression: Expression, truth: bool) -> CfaEdge {
    edge(EdgeKind::Assume{expression, truth})
}

pub fn blank() -> CfaEdge {
    edge(EdgeKind::Blank{description: "skip".to_string()})
}

pub fn malloc(lhs: Expression) -> CfaEdge {
    let call = FunctionCall {
        lhs:        Some(lhs),
        function:   "malloc".to_string(),
        args:       vec![Expression::literal(4, CType::ulong())],
        ret:        CType::pointer(CType::Void),
    };
    edge(EdgeKind::Statement{statement: Statement::Call{call}})
}

pub fn plus(lhs: Expression, rhs: Expression) -> Expression {
    Expression::binary(BinaryOperator::Plus, lhs, rhs, CType::int())
}

pub fn greater(lhs: Expression, rhs: Expression) -> Expression {
    Expression::binary(BinaryOperator::GreaterThan, lhs, rhs, CType::int())
}

// ============================================================================
// models
// ============================================================================

pub fn conjuncts(t: &Term) -> Vec<Term> {
    let mut out = Vec::new();
    let mut stack = vec![t.clone()];
    while let Some(t) = stack.pop() {
        match t.node() {
            Node::And(a, b) => {
                stack.push(b.clone());
                stack.push(a.clone());
            }
            _ => out.push(t),
        }
    }
    out
}

fn default_value(sort: Sort) -> Value {
    match sort {
        Sort::Bool => Value::Bool(false),
        Sort::BitVec(w) => Value::bv(0, w),
    }
}

/// Extends `model` so that every top level equality `v = e` with an
/// unassigned variable `v` holds. Variables that are never defined this
/// way and have no value yet get zero.
pub fn complete(f: &Term, model: &mut Model) {
    let parts = conjuncts(f);
    let mut defined = BTreeSet::new();
    for c in &parts {
        if let Node::Eq(a, _) = c.node() {
            if let Some(s) = a.symbol() {
                defined.insert(s);
            }
        }
    }
    for (symbol, sort) in f.variables() {
        if !defined.contains(&symbol) && !model.contains(&symbol) {
            model.insert(symbol, default_value(sort));
        }
    }

    loop {
        let mut changed = false;
        for c in &parts {
            if let Node::Eq(a, b) = c.node() {
                for (var, def) in &[(a, b), (b, a)] {
                    let symbol = match var.symbol() {
                        Some(s) => s,
                        None => continue,
                    };
                    if model.contains(&symbol) {
                        continue;
                    }
                    if let Some(v) = def.evaluate(model) {
                        model.insert(symbol, v);
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
}

pub fn holds(f: &Term, model: &Model) -> bool {
    match f.evaluate(model) {
        Some(Value::Bool(b)) => b,
        v => panic!("{} does not evaluate to a boolean under {:?}: {:?}", f, model, v),
    }
}
