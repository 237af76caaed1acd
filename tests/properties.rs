//! Index laws of path formula construction over random straight line code.

mod common;

use common::*;
use pathformula::ast::Expression;
use pathformula::cfa::CfaEdge;
use pathformula::name::Key;
use pathformula::{FormulaOptions, Manager, PathFormulaManager};
use proptest::prelude::*;

const VARS: [&str; 3] = ["a", "b", "c"];

/// the edge and the variable it assigns
fn step(var: usize, kind: u8, value: u64) -> (CfaEdge, Option<usize>) {
    let v = VARS[var];
    match kind {
        0 => (assign(int(v), Expression::int(value)), Some(var)),
        1 => (assign(int(v), plus(int(VARS[(var + 1) % 3]), Expression::int(value))), Some(var)),
        2 => (assume(greater(int(v), Expression::int(value)), value % 2 == 0), None),
        _ => (blank(), None),
    }
}

fn steps() -> impl Strategy<Value = Vec<(usize, u8, u64)>> {
    prop::collection::vec((0usize..3, 0u8..4, 0u64..10), 0..12)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn indices_never_decrease(ops in steps()) {
        let mut m = Manager::new(FormulaOptions::default());
        let mut pf = m.make_empty();
        for (var, kind, value) in ops {
            let (edge, assigned) = step(var, kind, value);
            let next = m.make_and(&pf, &edge).unwrap();
            for (key, index) in pf.ssa().vars() {
                let now = next.ssa().get_index(key);
                prop_assert!(now.map(|n| n >= index).unwrap_or(false),
                    "{} went from {} to {:?} on {}", key, index, now, edge);
            }
            if let Some(var) = assigned {
                let key = Key::scoped("main", VARS[var]);
                let before = pf.ssa().get_index(&key).unwrap_or(1);
                let after = next.ssa().get_index(&key);
                prop_assert!(after.map(|a| a > before).unwrap_or(false),
                    "{} not advanced past {} by {}", key, before, edge);
            }
            prop_assert!(next.length() >= pf.length());
            pf = next;
        }
    }

    #[test]
    fn merge_laws(left in steps(), right in steps()) {
        let mut m = Manager::new(FormulaOptions::default());
        let a = m.make_formula_for_path(&left.iter().map(|(v, k, x)|step(*v, *k, *x).0).collect::<Vec<_>>(), None).unwrap();
        let b = m.make_formula_for_path(&right.iter().map(|(v, k, x)|step(*v, *k, *x).0).collect::<Vec<_>>(), None).unwrap();

        prop_assert_eq!(m.make_or(&a, &a), a.clone());

        let ab = m.make_or(&a, &b);
        let ba = m.make_or(&b, &a);
        prop_assert_eq!(ab.ssa(), ba.ssa());
        prop_assert_eq!(ab.length(), std::cmp::max(a.length(), b.length()));

        for name in &VARS {
            let key = Key::scoped("main", name);
            let expected = match (a.ssa().get_index(&key), b.ssa().get_index(&key)) {
                (None, None) => None,
                (x, y) => Some(std::cmp::max(x.unwrap_or(0), y.unwrap_or(0))),
            };
            prop_assert_eq!(ab.ssa().get_index(&key), expected);
        }
    }
}
