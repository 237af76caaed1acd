use std::collections::{BTreeMap, BTreeSet};
use crate::cfa::CfaEdge;
use crate::error::Error;
use crate::formula::{Model, Sort, Term};
use crate::pathformula::{PathFormula, PathFormulaManager};

pub const BRANCH_PREFIX: &str = "__branch__";


pub struct ArgState {
    pub id:         usize,
    pub pf:         PathFormula,
    pub parent:     Option<usize>,
    pub children:   Vec<(CfaEdge, usize)>,
}

/// Abstract reachability tree. Every state holds the path formula of the
/// path leading to it.
pub struct Arg {
    states: Vec<ArgState>,
}

impl Arg {
    pub fn new(root: PathFormula) -> Self {
        Self {
            states: vec![ArgState{id: 0, pf: root, parent: None, children: Vec::new()}],
        }
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn state(&self, id: usize) -> Option<&ArgState> {
        self.states.get(id)
    }

    pub fn states(&self) -> impl Iterator<Item = &ArgState> {
        self.states.iter()
    }

    pub fn add_child(&mut self, parent: usize, edge: CfaEdge, pf: PathFormula) -> usize {
        let id = self.states.len();
        self.states.push(ArgState{id, pf, parent: Some(parent), children: Vec::new()});
        if let Some(p) = self.states.get_mut(parent) {
            p.children.push((edge, id));
        }
        id
    }

    /// translates `edge` from `parent` and adds the result as a child
    pub fn expand<M: PathFormulaManager>(&mut self, m: &mut M, parent: usize, edge: CfaEdge) -> Result<usize, Error> {
        let pf = match self.state(parent) {
            Some(s) => m.make_and(&s.pf, &edge)?,
            None => panic!("ICE: expanding unknown state {}", parent),
        };
        Ok(self.add_child(parent, edge, pf))
    }
}

pub fn marker(id: usize) -> String {
    format!("{}{}", BRANCH_PREFIX, id)
}

/// Equates one boolean marker per binary branch on the path with the
/// branch condition, translated from the branching state's own SSA map.
/// A state with more than two successors makes the whole formula `true`.
pub fn build_branching_formula<M: PathFormulaManager>(m: &mut M, arg: &Arg, on_path: &BTreeSet<usize>) -> Result<Term, Error> {
    let mut parts = Vec::new();
    for id in on_path {
        let state = match arg.state(*id) {
            Some(s) => s,
            None => continue,
        };
        match state.children.len() {
            0 | 1 => continue,
            2 => (),
            n => {
                warn!("state {} has {} successors, branching formula is trivial", id, n);
                return Ok(m.formula_manager().make_true());
            }
        }

        let positive = state.children.iter().find(|(e, _)| e.assumption() == Some(true));
        let negative = state.children.iter().find(|(e, _)| e.assumption() == Some(false));
        let edge = match (positive, negative) {
            (Some((e, _)), Some(_)) => e,
            _ => {
                warn!("state {} does not branch on a condition, branching formula is trivial", id);
                return Ok(m.formula_manager().make_true());
            }
        };

        let start = m.make_empty_from(&state.pf);
        let cond = m.make_and(&start, edge)?;
        let fm = m.formula_manager();
        let mark = fm.make_variable(&marker(*id), None, Sort::Bool);
        parts.push(fm.equal(&mark, cond.formula()));
    }
    Ok(m.formula_manager().and_all(&parts))
}

/// branch state -> whether the positive edge was taken
pub fn branching_values_from_model(model: &Model) -> BTreeMap<usize, bool> {
    let mut values = BTreeMap::new();
    for (symbol, value) in model.iter() {
        if !symbol.starts_with(BRANCH_PREFIX) {
            continue;
        }
        let id = match symbol[BRANCH_PREFIX.len()..].parse::<usize>() {
            Ok(id) => id,
            Err(_) => continue,
        };
        if let Some(b) = value.as_bool() {
            values.insert(id, b);
        }
    }
    values
}

/// Replays the branch decisions from the root down to a leaf.
pub fn path_from_branching(arg: &Arg, values: &BTreeMap<usize, bool>) -> Result<Vec<CfaEdge>, Error> {
    let mut path = Vec::new();
    let mut current = arg.root();
    loop {
        let state = match arg.state(current) {
            Some(s) => s,
            None => panic!("ICE: state {} missing from the tree", current),
        };
        let (edge, next) = match state.children.len() {
            0 => return Ok(path),
            1 => &state.children[0],
            2 => {
                let taken = values.get(&current).ok_or(Error::MissingBranch(current))?;
                state.children.iter()
                    .find(|(e, _)| e.assumption() == Some(*taken))
                    .ok_or(Error::MissingBranch(current))?
            }
            n => {
                let loc = &state.children[0].0.loc;
                return Err(Error::unrecognized(format!("state {} has {} successors", current, n), loc));
            }
        };
        path.push(edge.clone());
        current = *next;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, CType, Expression};
    use crate::cfa::{CfaNode, EdgeKind, Statement};
    use crate::config::FormulaOptions;
    use crate::formula::Value;
    use crate::pathformula::Manager;

    fn assume(truth: bool) -> CfaEdge {
        let x = Expression::var("x", CType::int());
        let cond = Expression::binary(BinaryOperator::GreaterThan, x, Expression::int(0), CType::int());
        CfaEdge::new(CfaNode::new(1, "main"), CfaNode::new(if truth {2} else {3}, "main"),
            EdgeKind::Assume{expression: cond, truth})
    }

    fn set_y() -> CfaEdge {
        CfaEdge::new(CfaNode::new(2, "main"), CfaNode::new(4, "main"),
            EdgeKind::Statement{statement: Statement::Assignment {
                lhs: Expression::var("y", CType::int()),
                rhs: Expression::int(1),
            }})
    }

    fn tree(m: &mut Manager) -> Arg {
        let mut arg = Arg::new(m.make_empty());
        let yes = arg.expand(m, 0, assume(true)).unwrap();
        arg.expand(m, 0, assume(false)).unwrap();
        arg.expand(m, yes, set_y()).unwrap();
        arg
    }

    #[test]
    fn markers_follow_conditions() {
        let mut m = Manager::new(FormulaOptions::default());
        let arg = tree(&mut m);
        let on_path : BTreeSet<usize> = vec![0, 1, 3].into_iter().collect();
        let f = build_branching_formula(&mut m, &arg, &on_path).unwrap();
        assert_eq!(f.to_string(), "(= __branch__0 (bvslt (_ bv0 32) |main::x@1|))");
    }

    #[test]
    fn paths_from_models() {
        let mut m = Manager::new(FormulaOptions::default());
        let arg = tree(&mut m);

        let mut model = Model::new();
        model.insert(marker(0), Value::Bool(true));
        model.insert("main::x@1", Value::bv(3, 32));
        let values = branching_values_from_model(&model);
        assert_eq!(values.len(), 1);
        let path = path_from_branching(&arg, &values).unwrap();
        assert_eq!(path, vec![assume(true), set_y()]);

        model.insert(marker(0), Value::Bool(false));
        let path = path_from_branching(&arg, &branching_values_from_model(&model)).unwrap();
        assert_eq!(path, vec![assume(false)]);

        match path_from_branching(&arg, &BTreeMap::new()) {
            Err(Error::MissingBranch(0)) => (),
            r => panic!("expected a missing branch, got {:?}", r),
        }
    }

    #[test]
    fn wide_branches_are_refused() {
        let mut m = Manager::new(FormulaOptions::default());
        let mut arg = tree(&mut m);
        arg.expand(&mut m, 0, set_y()).unwrap();
        let on_path : BTreeSet<usize> = vec![0].into_iter().collect();
        let f = build_branching_formula(&mut m, &arg, &on_path).unwrap();
        assert!(m.formula_manager().is_true(&f));
    }
}
