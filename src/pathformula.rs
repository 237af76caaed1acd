use std::sync::atomic::{AtomicBool, Ordering};
use crate::cfa::CfaEdge;
use crate::config::FormulaOptions;
use crate::converter::CtoFormulaConverter;
use crate::error::Error;
use crate::formula::{FormulaManager, Sort, Term};
use crate::name::Key;
use crate::parser;
use crate::smt;
use crate::ssa::SSAMap;

const LENGTH_HEADER:    &str = "; length ";
const SSA_HEADER:       &str = "; ssa ";


/// The formula of a path prefix together with the SSA indices it ends at.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PathFormula {
    formula:    Term,
    ssa:        SSAMap,
    length:     usize,
}

impl PathFormula {
    pub fn new(formula: Term, ssa: SSAMap, length: usize) -> Self {
        Self {
            formula,
            ssa,
            length,
        }
    }

    pub fn formula(&self) -> &Term {
        &self.formula
    }

    pub fn ssa(&self) -> &SSAMap {
        &self.ssa
    }

    /// number of edges translated into this formula
    pub fn length(&self) -> usize {
        self.length
    }

    /// SMT-LIB script asserting the formula, with the length and SSA map
    /// in comment headers so [`PathFormula::parse`] can restore it.
    pub fn dump(&self) -> Result<String, Error> {
        let ssa = serde_json::to_string(&self.ssa)?;
        Ok(format!("{}{}\n{}{}\n{}", LENGTH_HEADER, self.length, SSA_HEADER, ssa, smt::script(&self.formula)))
    }

    pub fn parse(src: &str) -> Result<Self, Error> {
        let mut length = None;
        let mut ssa = None;
        for line in src.lines() {
            if line.starts_with(LENGTH_HEADER) {
                let n = &line[LENGTH_HEADER.len()..];
                length = Some(n.trim().parse::<usize>().map_err(|e|Error::Parse(format!("length '{}': {}", n, e)))?);
            } else if line.starts_with(SSA_HEADER) {
                ssa = Some(serde_json::from_str::<SSAMap>(&line[SSA_HEADER.len()..])?);
            }
        }
        let length = length.ok_or_else(||Error::Parse("missing length header".to_string()))?;
        let ssa = ssa.ok_or_else(||Error::Parse("missing ssa header".to_string()))?;

        let script = parser::parse_script(src)?;
        let fm = FormulaManager::new();
        let formula = fm.and_all(&script.assertions);
        Ok(Self::new(formula, ssa, length))
    }
}

impl std::fmt::Display for PathFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (length {}, ssa {})", self.formula, self.length, self.ssa)
    }
}

impl std::fmt::Debug for PathFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}


pub trait PathFormulaManager {
    fn formula_manager(&self) -> &FormulaManager;

    /// `true` over an empty SSA map
    fn make_empty(&self) -> PathFormula;

    /// `true`, continuing the numbering of `pf`. The length is kept as
    /// well: nondeterministic values are named after the position on the
    /// path, so restarting at 0 would reuse names already bound in `pf`.
    fn make_empty_from(&self, pf: &PathFormula) -> PathFormula;

    /// `pf` extended by one edge
    fn make_and(&mut self, pf: &PathFormula, edge: &CfaEdge) -> Result<PathFormula, Error>;

    /// the join of two paths reaching the same location
    fn make_or(&mut self, a: &PathFormula, b: &PathFormula) -> PathFormula;

    fn make_and_term(&self, pf: &PathFormula, t: &Term) -> PathFormula {
        let formula = self.formula_manager().and(pf.formula(), t);
        PathFormula::new(formula, pf.ssa().clone(), pf.length())
    }

    /// Translates a whole path. The shutdown flag is checked between edges.
    fn make_formula_for_path(&mut self, edges: &[CfaEdge], shutdown: Option<&AtomicBool>) -> Result<PathFormula, Error> {
        let mut pf = self.make_empty();
        for edge in edges {
            if let Some(flag) = shutdown {
                if flag.load(Ordering::SeqCst) {
                    return Err(Error::Interrupted);
                }
            }
            pf = self.make_and(&pf, edge)?;
        }
        Ok(pf)
    }
}


/// Path formula construction on top of one edge translator.
pub struct Manager {
    converter:  CtoFormulaConverter,
}

impl Manager {
    pub fn new(options: FormulaOptions) -> Self {
        Self {
            converter: CtoFormulaConverter::new(options),
        }
    }

    pub fn converter(&self) -> &CtoFormulaConverter {
        &self.converter
    }

    pub fn converter_mut(&mut self) -> &mut CtoFormulaConverter {
        &mut self.converter
    }

    /// Equalities carrying every variable of `side` forward to its index
    /// in `merged`, one step at a time.
    fn merge_chain(&self, side: &SSAMap, merged: &SSAMap) -> Term {
        let fm = self.converter.formula_manager();
        let types = self.converter.types();
        let mut chain = Vec::new();

        for (key, target) in merged.vars() {
            let mine = side.get_index(key).unwrap_or(1);
            if mine >= target {
                continue;
            }
            // elements live in the indexed functions below
            if merged.get_type(key).map_or(false, |t|t.is_array()) {
                continue;
            }
            let w = match merged.get_type(key).and_then(|t|types.bit_width(t)) {
                Some(w) => w,
                None => {
                    warn!("cannot carry {} of unknown size across a merge", key);
                    continue;
                }
            };
            let name = key.to_string();
            for i in mine + 1..=target {
                let new = fm.make_variable(&name, Some(i), Sort::BitVec(w));
                let old = fm.make_variable(&name, Some(i - 1), Sort::BitVec(w));
                chain.push(fm.equal(&new, &old));
            }
        }

        for (fk, target) in merged.funcs() {
            let mine = side.get_func_index(&fk.key, &fk.args).unwrap_or(1);
            if mine >= target {
                continue;
            }
            let w = match merged.get_func_type(&fk.key).and_then(|t|types.bit_width(t)) {
                Some(w) => w,
                None => continue,
            };
            let name = fk.key.to_string();
            for i in mine + 1..=target {
                let new = fm.make_uf(&name, Some(i), fk.args.clone(), Sort::BitVec(w));
                let old = fm.make_uf(&name, Some(i - 1), fk.args.clone(), Sort::BitVec(w));
                chain.push(fm.equal(&new, &old));
            }
        }
        fm.and_all(&chain)
    }

    /// Gives every unindexed variable of `t` that names a key the index
    /// `ssa` has for it.
    pub fn instantiate(&self, t: &Term, ssa: &SSAMap) -> Term {
        let fm = self.converter.formula_manager();
        fm.substitute(t, &mut |name, index, sort| {
            if index.is_some() {
                return None;
            }
            let key = name.parse::<Key>().ok()?;
            let i = ssa.get_index(&key)?;
            Some(fm.make_variable(name, Some(i), sort))
        })
    }

    /// strips all SSA indices from the variables of `t`
    pub fn uninstantiate(&self, t: &Term) -> Term {
        let fm = self.converter.formula_manager();
        fm.substitute(t, &mut |name, index, sort| {
            index?;
            Some(fm.make_variable(name, None, sort))
        })
    }
}

impl PathFormulaManager for Manager {
    fn formula_manager(&self) -> &FormulaManager {
        self.converter.formula_manager()
    }

    fn make_empty(&self) -> PathFormula {
        PathFormula::new(self.formula_manager().make_true(), SSAMap::empty(), 0)
    }

    fn make_empty_from(&self, pf: &PathFormula) -> PathFormula {
        PathFormula::new(self.formula_manager().make_true(), pf.ssa().clone(), pf.length())
    }

    fn make_and(&mut self, pf: &PathFormula, edge: &CfaEdge) -> Result<PathFormula, Error> {
        let (f, ssa) = self.converter.make_and(pf.ssa(), pf.length(), edge)?;
        let fm = self.converter.formula_manager();
        if fm.is_true(&f) && &ssa == pf.ssa() {
            return Ok(pf.clone());
        }
        let formula = fm.and(pf.formula(), &f);
        Ok(PathFormula::new(formula, ssa, pf.length() + 1))
    }

    fn make_or(&mut self, a: &PathFormula, b: &PathFormula) -> PathFormula {
        if a == b {
            return a.clone();
        }
        let merged = SSAMap::merge(a.ssa(), b.ssa());
        let ca = self.merge_chain(a.ssa(), &merged);
        let cb = self.merge_chain(b.ssa(), &merged);

        let fm = self.converter.formula_manager();
        let fa = fm.and(a.formula(), &ca);
        let fb = fm.and(b.formula(), &cb);
        debug!("merged {} and {} into {}", a.ssa(), b.ssa(), merged);
        PathFormula::new(fm.or(&fa, &fb), merged, std::cmp::max(a.length(), b.length()))
    }
}
