use metrohash::MetroHash64;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use crate::cfa::CfaEdge;
use crate::error::Error;
use crate::formula::FormulaManager;
use crate::pathformula::{PathFormula, PathFormulaManager};

type Memo<K> = HashMap<K, PathFormula, BuildHasherDefault<MetroHash64>>;


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub and_hits:   usize,
    pub and_misses: usize,
    pub or_hits:    usize,
    pub or_misses:  usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "and: {} hits, {} misses; or: {} hits, {} misses",
            self.and_hits, self.and_misses, self.or_hits, self.or_misses)
    }
}

/// Look-aside memo in front of another manager. Entries live as long as
/// the cache does. Failed translations are not remembered.
pub struct CachingManager<M> {
    inner:      M,
    and_cache:  Memo<(PathFormula, CfaEdge)>,
    or_cache:   Memo<(PathFormula, PathFormula)>,
    stats:      CacheStats,
}

impl<M: PathFormulaManager> CachingManager<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            and_cache:  Memo::default(),
            or_cache:   Memo::default(),
            stats:      CacheStats::default(),
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl<M: PathFormulaManager> PathFormulaManager for CachingManager<M> {
    fn formula_manager(&self) -> &FormulaManager {
        self.inner.formula_manager()
    }

    fn make_empty(&self) -> PathFormula {
        self.inner.make_empty()
    }

    fn make_empty_from(&self, pf: &PathFormula) -> PathFormula {
        self.inner.make_empty_from(pf)
    }

    fn make_and(&mut self, pf: &PathFormula, edge: &CfaEdge) -> Result<PathFormula, Error> {
        let key = (pf.clone(), edge.clone());
        if let Some(r) = self.and_cache.get(&key) {
            self.stats.and_hits += 1;
            return Ok(r.clone());
        }
        self.stats.and_misses += 1;
        let r = self.inner.make_and(pf, edge)?;
        self.and_cache.insert(key, r.clone());
        Ok(r)
    }

    fn make_or(&mut self, a: &PathFormula, b: &PathFormula) -> PathFormula {
        let key = (a.clone(), b.clone());
        let hit = self.or_cache.get(&key)
            .or_else(|| self.or_cache.get(&(b.clone(), a.clone())))
            .cloned();
        if let Some(r) = hit {
            self.stats.or_hits += 1;
            return r;
        }
        self.stats.or_misses += 1;
        let r = self.inner.make_or(a, b);
        self.or_cache.insert(key, r.clone());
        r
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CType, Expression};
    use crate::cfa::{CfaNode, EdgeKind, Statement};
    use crate::config::FormulaOptions;
    use crate::pathformula::Manager;

    fn assign(name: &str, value: u64) -> CfaEdge {
        CfaEdge::new(CfaNode::new(1, "main"), CfaNode::new(2, "main"),
            EdgeKind::Statement{statement: Statement::Assignment {
                lhs: Expression::var(name, CType::int()),
                rhs: Expression::int(value),
            }})
    }

    #[test]
    fn repeated_edges_hit() {
        let mut m = CachingManager::new(Manager::new(FormulaOptions::default()));
        let empty = m.make_empty();
        let a = m.make_and(&empty, &assign("x", 1)).unwrap();
        let b = m.make_and(&empty, &assign("x", 1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(m.stats().and_hits, 1);
        assert_eq!(m.stats().and_misses, 1);
    }

    #[test]
    fn merges_hit_in_both_orders() {
        let mut m = CachingManager::new(Manager::new(FormulaOptions::default()));
        let empty = m.make_empty();
        let a = m.make_and(&empty, &assign("x", 1)).unwrap();
        let b = m.make_and(&empty, &assign("y", 2)).unwrap();
        let ab = m.make_or(&a, &b);
        let ba = m.make_or(&b, &a);
        assert_eq!(ab, ba);
        assert_eq!(m.stats(), CacheStats{and_hits: 0, and_misses: 2, or_hits: 1, or_misses: 1});
        assert_eq!(m.stats().to_string(), "and: 0 hits, 2 misses; or: 1 hits, 1 misses");
    }
}
