mod common;

use common::*;
use pathformula::ast::{BinaryOperator, CType, Expression};
use pathformula::formula::{Model, Value};
use pathformula::name::Key;
use pathformula::{FormulaOptions, Manager, PathFormula, PathFormulaManager, SSAMap};

fn manager() -> Manager {
    Manager::new(FormulaOptions::default())
}

fn x_key() -> Key {
    Key::scoped("main", "x")
}

// ============================================================================
// single edges
// ============================================================================

#[test]
fn increment_from_index_three() {
    let mut m = manager();
    let mut b = SSAMap::empty().builder();
    b.set_index(&x_key(), &CType::int(), 3);
    let start = PathFormula::new(m.formula_manager().make_true(), b.build(), 0);

    let pf = m.make_and(&start, &assign(int("x"), plus(int("x"), Expression::int(1)))).unwrap();
    assert_eq!(pf.formula().to_string(), "(= |main::x@4| (bvadd |main::x@3| (_ bv1 32)))");
    assert_eq!(pf.ssa().get_index(&x_key()), Some(4));
    assert_eq!(pf.length(), 1);
}

#[test]
fn declaration_without_initializer() {
    let mut m = manager();
    let pf = m.make_and(&m.make_empty(), &declare("y", CType::int())).unwrap();
    assert!(m.formula_manager().is_true(pf.formula()), "{}", pf);
    assert_eq!(pf.ssa().get_index(&Key::scoped("main", "y")), Some(2));
}

#[test]
fn blank_edge_returns_the_same_formula() {
    let mut m = manager();
    let pf = m.make_and(&m.make_empty(), &assign(int("x"), Expression::int(2))).unwrap();
    let next = m.make_and(&pf, &blank()).unwrap();
    assert_eq!(next, pf);
}

// ============================================================================
// aliasing
// ============================================================================

#[test]
fn write_through_pointer_fixes_the_variable() {
    let mut m = manager();
    let pf = m.make_formula_for_path(&[
        declare("x", CType::int()),
        declare("p", CType::pointer(CType::int())),
        assign(int_ptr("p"), Expression::address_of(int("x"))),
        assign(Expression::deref(int_ptr("p")), Expression::int(5)),
    ], None).unwrap();

    let k = pf.ssa().get_index(&x_key()).unwrap();
    let x_final = format!("main::x@{}", k);

    for initial in &[0u128, 6, 42] {
        for address in &[1u128, 0x1000] {
            let mut model = Model::new();
            model.insert("main::x@2", Value::bv(*initial, 32));
            model.insert("__address_of__main::x", Value::bv(*address, 64));
            complete(pf.formula(), &mut model);

            assert!(holds(pf.formula(), &model), "{} under {:?}", pf, model);
            assert!(matches!(model.get(&x_final), Some(Value::BitVec{value: 5, width: 32})),
                "x is {:?} after writing through p", model.get(&x_final));

            let mut wrong = model.clone();
            wrong.insert(x_final.clone(), Value::bv(6, 32));
            assert!(!holds(pf.formula(), &wrong), "{} accepts x == 6", pf);
        }
    }
}

#[test]
fn allocations_do_not_overlap() {
    let mut m = manager();
    let pf = m.make_formula_for_path(&[
        malloc(int_ptr("p")),
        malloc(int_ptr("q")),
    ], None).unwrap();

    let p = format!("main::p@{}", pf.ssa().get_index(&Key::scoped("main", "p")).unwrap());
    let q = format!("main::q@{}", pf.ssa().get_index(&Key::scoped("main", "q")).unwrap());

    let mut apart = Model::new();
    apart.insert("__malloc__@2", Value::bv(16, 64));
    apart.insert("__malloc__@3", Value::bv(32, 64));
    complete(pf.formula(), &mut apart);
    assert!(holds(pf.formula(), &apart), "{}", pf);
    assert_ne!(apart.get(&p), apart.get(&q));

    let mut same = Model::new();
    same.insert("__malloc__@2", Value::bv(16, 64));
    same.insert("__malloc__@3", Value::bv(16, 64));
    complete(pf.formula(), &mut same);
    assert!(!holds(pf.formula(), &same), "{} lets p and q overlap", pf);

    let mut null = Model::new();
    null.insert("__malloc__@2", Value::bv(16, 64));
    null.insert("__malloc__@3", Value::bv(0, 64));
    complete(pf.formula(), &mut null);
    assert!(holds(pf.formula(), &null), "a failed allocation may be null");
}

fn char_ptr(name: &str) -> Expression {
    Expression::var(name, CType::pointer(CType::char()))
}

fn literal(value: &str) -> Expression {
    Expression::StringLiteral{value: value.to_string()}
}

fn string_addresses(pf: &PathFormula) -> Vec<String> {
    pf.formula().variables().into_iter()
        .map(|(s, _)| s)
        .filter(|s| s.starts_with("__address_of____string__"))
        .collect()
}

#[test]
fn different_string_literals_never_compare_equal() {
    let mut m = manager();
    let first = m.make_and(&m.make_empty(), &assign(char_ptr("s"), literal("a"))).unwrap();
    let a = string_addresses(&first);
    assert_eq!(a.len(), 1, "{}", first);

    let both = m.make_and(&first, &assign(char_ptr("t"), literal("b"))).unwrap();
    let b : Vec<String> = string_addresses(&both).into_iter().filter(|s| *s != a[0]).collect();
    assert_eq!(b.len(), 1, "{}", both);

    let eq = Expression::binary(BinaryOperator::Equals, char_ptr("s"), char_ptr("t"), CType::int());
    let compared = m.make_and(&both, &assume(eq, true)).unwrap();

    let values = [0u128, 16, 32];
    for x in &values {
        for y in &values {
            let mut model = Model::new();
            model.insert(a[0].clone(), Value::bv(*x, 64));
            model.insert(b[0].clone(), Value::bv(*y, 64));
            complete(compared.formula(), &mut model);
            assert!(!holds(compared.formula(), &model), "{} lets s == t under {:?}", compared, model);

            let mut model = Model::new();
            model.insert(a[0].clone(), Value::bv(*x, 64));
            model.insert(b[0].clone(), Value::bv(*y, 64));
            complete(both.formula(), &mut model);
            assert_eq!(holds(both.formula(), &model), *x != 0 && *y != 0 && x != y, "{}", both);
        }
    }
}

#[test]
fn same_literal_is_the_same_address_in_any_manager() {
    let mut used = manager();
    used.make_and(&used.make_empty(), &assign(char_ptr("t"), literal("b"))).unwrap();
    let again = used.make_and(&used.make_empty(), &assign(char_ptr("s"), literal("a"))).unwrap();

    let mut fresh = manager();
    let first = fresh.make_and(&fresh.make_empty(), &assign(char_ptr("s"), literal("a"))).unwrap();
    assert_eq!(again.formula().to_string(), first.formula().to_string());

    let twice = fresh.make_and(&first, &assign(char_ptr("t"), literal("a"))).unwrap();
    assert_eq!(string_addresses(&twice), string_addresses(&first));
}

#[test]
fn allocations_avoid_string_literals() {
    let mut m = manager();
    let pf = m.make_formula_for_path(&[
        assign(char_ptr("s"), literal("hello")),
        malloc(int_ptr("p")),
    ], None).unwrap();
    let a = string_addresses(&pf);
    assert_eq!(a.len(), 1, "{}", pf);

    for (allocated, ok) in &[(16u128, false), (32, true), (0, true)] {
        let mut model = Model::new();
        model.insert(a[0].clone(), Value::bv(16, 64));
        model.insert("__malloc__@2", Value::bv(*allocated, 64));
        complete(pf.formula(), &mut model);
        assert_eq!(holds(pf.formula(), &model), *ok, "malloc at {} in {}", allocated, pf);
    }
}

#[test]
fn unknown_dereferences_without_aliasing() {
    let mut options = FormulaOptions::default();
    options.handle_pointer_aliasing = false;
    let mut m = Manager::new(options);
    let pf = m.make_and(&m.make_empty(), &assign(int_ptr("p"), Expression::address_of(int("x")))).unwrap();
    let next = m.make_and(&pf, &assign(Expression::deref(int_ptr("p")), Expression::int(5))).unwrap();
    assert_eq!(next, pf);
    assert_eq!(next.length(), 1);
}

// ============================================================================
// merging
// ============================================================================

#[test]
fn branch_merge_is_sound() {
    let mut m = manager();
    let start = m.make_empty();
    let left = m.make_and(&start, &assign(int("x"), Expression::int(3))).unwrap();
    let right = m.make_and(&start, &assume(greater(int("y"), Expression::int(0)), true)).unwrap();
    let merged = m.make_or(&left, &right);

    assert_eq!(merged.ssa().get_index(&x_key()), Some(2));
    assert_eq!(merged.length(), 1);

    let fm = m.formula_manager();
    let x1 = fm.make_variable("main::x", Some(1), pathformula::formula::Sort::BitVec(32));
    let x2 = fm.make_variable("main::x", Some(2), pathformula::formula::Sort::BitVec(32));
    let expected = fm.or(left.formula(), &fm.and(right.formula(), &fm.equal(&x2, &x1)));

    let values = [0u128, 1, 3, 0xffff_ffff];
    for a in &values {
        for b in &values {
            for y in &values {
                let mut model = Model::new();
                model.insert("main::x@1", Value::bv(*a, 32));
                model.insert("main::x@2", Value::bv(*b, 32));
                model.insert("main::y@1", Value::bv(*y, 32));
                assert_eq!(holds(merged.formula(), &model), holds(&expected, &model),
                    "x@1={} x@2={} y@1={}: {}", a, b, y, merged);
            }
        }
    }
}

#[test]
fn merge_takes_larger_indices() {
    let mut m = manager();
    let start = m.make_empty();
    let left = m.make_formula_for_path(&[
        assign(int("x"), Expression::int(1)),
        assign(int("x"), Expression::int(2)),
    ], None).unwrap();
    let right = m.make_and(&start, &assign(int("y"), Expression::int(1))).unwrap();
    let merged = m.make_or(&left, &right);
    assert_eq!(merged.ssa().get_index(&x_key()), Some(3));
    assert_eq!(merged.ssa().get_index(&Key::scoped("main", "y")), Some(2));
    assert_eq!(merged.ssa(), m.make_or(&right, &left).ssa());
    assert_eq!(merged.length(), 2);
}

#[test]
fn write_after_merging_address_and_allocation() {
    let mut m = manager();
    let start = m.make_empty();
    let taken = m.make_and(&start, &assign(int_ptr("p"), Expression::address_of(int("x")))).unwrap();
    let allocated = m.make_and(&start, &malloc(int_ptr("p"))).unwrap();
    let merged = m.make_or(&taken, &allocated);

    assert_eq!(merged.ssa().get_index(&Key::global("__malloc__")), Some(2));
    assert!(merged.ssa().get_index(&Key::address(x_key())).is_some());

    let pf = m.make_and(&merged, &assign(Expression::deref(int_ptr("p")), Expression::int(5))).unwrap();
    let x_final = format!("main::x@{}", pf.ssa().get_index(&x_key()).unwrap());
    assert_eq!(x_final, "main::x@2");

    // p points to x
    let mut model = Model::new();
    model.insert("__address_of__main::x", Value::bv(0x1000, 64));
    model.insert("main::p@2", Value::bv(0x1000, 64));
    model.insert("__malloc__@2", Value::bv(0, 64));
    model.insert("main::x@1", Value::bv(0, 32));
    complete(pf.formula(), &mut model);
    assert!(holds(pf.formula(), &model), "{} under {:?}", pf, model);
    assert!(matches!(model.get(&x_final), Some(Value::BitVec{value: 5, ..})), "{:?}", model.get(&x_final));
    let mut wrong = model.clone();
    wrong.insert(x_final.clone(), Value::bv(0, 32));
    assert!(!holds(pf.formula(), &wrong), "{} leaves x alone through &x", pf);

    // p points to fresh memory
    let mut model = Model::new();
    model.insert("__address_of__main::x", Value::bv(0x1000, 64));
    model.insert("main::p@2", Value::bv(0x2000, 64));
    model.insert("__malloc__@2", Value::bv(0x2000, 64));
    model.insert("main::x@1", Value::bv(0, 32));
    complete(pf.formula(), &mut model);
    assert!(holds(pf.formula(), &model), "{} under {:?}", pf, model);
    assert!(matches!(model.get(&x_final), Some(Value::BitVec{value: 0, ..})), "{:?}", model.get(&x_final));
    let mut wrong = model.clone();
    wrong.insert(x_final.clone(), Value::bv(5, 32));
    assert!(!holds(pf.formula(), &wrong), "{} writes x through an allocation", pf);
}
