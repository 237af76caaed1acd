use crate::ast::{CType, Expression, Location};
use crate::cfa::{CfaEdge, Declaration, EdgeKind, FunctionCall, FunctionDef, Initializer, Statement};
use crate::config::FormulaOptions;
use crate::diag::Warnings;
use crate::error::Error;
use crate::formula::{FormulaManager, Sort, Term};
use crate::name::Key;
use crate::pointers::Source;
use crate::ssa::{SSAMap, SSAMapBuilder};
use crate::types::TypeSystem;


/// Side conditions found while translating, conjoined to the edge formula
/// at the end.
#[derive(Default)]
pub struct Constraints {
    terms:  Vec<Term>,
}

impl Constraints {
    pub fn add(&mut self, fm: &FormulaManager, t: Term) {
        if !fm.is_true(&t) {
            self.terms.push(t);
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn to_term(&self, fm: &FormulaManager) -> Term {
        fm.and_all(&self.terms)
    }
}


/// Scratch state for one edge. Sub-edges of a multi edge share it.
pub(crate) struct EdgeContext {
    pub function:       String,
    pub loc:            Location,
    pub ssa:            SSAMapBuilder,
    pub formula:        Vec<Term>,
    pub constraints:    Constraints,
    position:           usize,
    node:               usize,
    nondet:             usize,
}

impl EdgeContext {
    fn new(ssa: SSAMapBuilder, position: usize) -> Self {
        Self {
            function:       String::new(),
            loc:            Location::default(),
            ssa,
            formula:        Vec::new(),
            constraints:    Constraints::default(),
            position,
            node:           0,
            nondet:         0,
        }
    }

    fn enter(&mut self, edge: &CfaEdge) {
        self.function = edge.function().to_string();
        self.loc = edge.loc.clone();
        self.node = edge.succ.id;
    }

    pub fn key_of(&self, name: &str, global: bool) -> Key {
        if global {
            Key::global(name)
        } else {
            Key::scoped(&self.function, name)
        }
    }

    pub fn fresh_index(&self, key: &Key) -> u32 {
        self.ssa.get_index(key).map(|i| i + 1).unwrap_or(2)
    }

    /// unconstrained values are named after where on the path they appear,
    /// so translating the same edge at the same position is reproducible
    pub fn fresh_name(&mut self) -> String {
        let n = format!("__nondet__{}_{}_{}", self.position, self.node, self.nondet);
        self.nondet += 1;
        n
    }
}


/// Translates single control flow edges into formulas over SSA indexed
/// variables.
pub struct CtoFormulaConverter {
    pub(crate) options:     FormulaOptions,
    pub(crate) types:       TypeSystem,
    pub(crate) fm:          FormulaManager,
    pub(crate) warnings:    Warnings,
}

impl CtoFormulaConverter {
    pub fn new(options: FormulaOptions) -> Self {
        Self {
            types:      TypeSystem::new(options.machine),
            options,
            fm:         FormulaManager::new(),
            warnings:   Warnings::new(),
        }
    }

    pub fn options(&self) -> &FormulaOptions {
        &self.options
    }

    pub fn types(&self) -> &TypeSystem {
        &self.types
    }

    pub fn formula_manager(&self) -> &FormulaManager {
        &self.fm
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    /// composites declared outside the translated edges
    pub fn register_composites(&mut self, declarations: &[Declaration]) {
        for d in declarations {
            if let Declaration::Composite{name, union, members} = d {
                self.types.register_composite(name, *union, members.clone());
            }
        }
    }

    /// Translates `edge` at path position `position` starting from `ssa`.
    /// Returns the edge formula and the updated map.
    pub fn make_and(&mut self, ssa: &SSAMap, position: usize, edge: &CfaEdge) -> Result<(Term, SSAMap), Error> {
        if edge.is_blank() {
            return Ok((self.fm.make_true(), ssa.clone()));
        }

        let mut ctx = EdgeContext::new(ssa.builder(), position);
        self.convert(&mut ctx, edge)?;

        let main = self.fm.and_all(&ctx.formula);
        let side = ctx.constraints.to_term(&self.fm);
        Ok((self.fm.and(&main, &side), ctx.ssa.build()))
    }

    fn convert(&mut self, ctx: &mut EdgeContext, edge: &CfaEdge) -> Result<(), Error> {
        ctx.enter(edge);
        match &edge.kind {
            EdgeKind::Blank{..} => Ok(()),
            EdgeKind::Declaration{declaration} => self.declaration(ctx, declaration),
            EdgeKind::Statement{statement} => self.statement(ctx, statement),
            EdgeKind::Assume{expression, truth} => {
                let c = self.condition(ctx, expression)?;
                let c = if *truth { c } else { self.fm.not(&c) };
                ctx.formula.push(c);
                Ok(())
            }
            EdgeKind::FunctionCall{call, callee} => self.function_call(ctx, call, callee),
            EdgeKind::Return{expression, ret} => self.return_statement(ctx, expression.as_ref(), ret),
            EdgeKind::FunctionReturn{call, callee} => self.function_return(ctx, call, callee),
            EdgeKind::Multi{edges} => {
                for e in edges {
                    if e.is_blank() {
                        continue;
                    }
                    self.convert(ctx, e)?;
                }
                Ok(())
            }
        }
    }


    pub(crate) fn warn(&mut self, ctx: &EdgeContext, message: &str) {
        self.warnings.warn_once(format!("{}: {}", ctx.loc, message));
    }

    pub(crate) fn width(&self, ctx: &EdgeContext, t: &CType) -> Result<u32, Error> {
        self.types.bit_width(t)
            .ok_or_else(||Error::unrecognized(format!("type '{}' has no size", t), &ctx.loc))
    }

    pub(crate) fn var(&self, key: &Key, index: u32, width: u32) -> Term {
        self.fm.make_variable(&key.to_string(), Some(index), Sort::BitVec(width))
    }

    pub(crate) fn fresh(&self, ctx: &mut EdgeContext, width: u32) -> Term {
        let name = ctx.fresh_name();
        self.fm.make_variable(&name, None, Sort::BitVec(width))
    }

    /// Resizes `v` to `width` bits: drops high bits, or fills them with
    /// unconstrained ones.
    pub(crate) fn fit_bits(&self, ctx: &mut EdgeContext, v: &Term, width: u32) -> Term {
        let w = v.width();
        if w == width {
            v.clone()
        } else if width < w {
            self.fm.extract(v, width - 1, 0)
        } else {
            let filler = self.fresh(ctx, width - w);
            self.fm.concat(&filler, v)
        }
    }


    fn declaration(&mut self, ctx: &mut EdgeContext, d: &Declaration) -> Result<(), Error> {
        match d {
            Declaration::Variable{name, global, typ, init} => {
                let key = ctx.key_of(name, *global);
                let index = ctx.fresh_index(&key);
                ctx.ssa.set_index(&key, typ, index);
                debug!("declared {}", key.instance(index));
                if typ.is_array() {
                    self.havoc_array(ctx, &key);
                }

                let target = Expression::Id{name: name.clone(), global: *global, typ: typ.clone()};
                match init {
                    Some(init) => self.initialize(ctx, &target, init),
                    None if self.options.initialize_all_variables
                        || (*global && self.options.initialize_globals) => self.zero_initialize(ctx, &target),
                    None => Ok(()),
                }
            }
            Declaration::Composite{name, union, members} => {
                self.types.register_composite(name, *union, members.clone());
                Ok(())
            }
            Declaration::Function{..} | Declaration::Typedef{..} => Ok(()),
        }
    }

    fn initialize(&mut self, ctx: &mut EdgeContext, target: &Expression, init: &Initializer) -> Result<(), Error> {
        let t = target.typ();
        match init {
            Initializer::Expression{value} => {
                if t.is_array() {
                    self.warn(ctx, "array initialized from an expression is left unconstrained");
                    return Ok(());
                }
                self.assign(ctx, target, value)
            }
            Initializer::List{items} => {
                if let Some(element) = t.element() {
                    for (i, item) in items.iter().enumerate() {
                        let e = Expression::Subscript {
                            array:  Box::new(target.clone()),
                            index:  Box::new(Expression::literal(i as u64, CType::long())),
                            typ:    element.clone(),
                        };
                        self.initialize(ctx, &e, item)?;
                    }
                    return Ok(());
                }

                if let Some((union, members)) = self.types.members(&t) {
                    let members = members.to_vec();
                    for (i, m) in members.iter().enumerate() {
                        let e = Expression::field(target.clone(), &m.name, m.typ.clone());
                        match items.get(i) {
                            Some(item) => self.initialize(ctx, &e, item)?,
                            None if union => (),
                            None => self.zero_initialize(ctx, &e)?,
                        }
                        if union {
                            break;
                        }
                    }
                    return Ok(());
                }

                match items.first() {
                    Some(item) => self.initialize(ctx, target, item),
                    None => self.zero_initialize(ctx, target),
                }
            }
        }
    }

    fn zero_initialize(&mut self, ctx: &mut EdgeContext, target: &Expression) -> Result<(), Error> {
        let t = target.typ();
        if t.is_array() {
            debug!("{}: array {} is not zero initialized", ctx.loc, target);
            return Ok(());
        }
        let zero = self.fm.make_zero(self.width(ctx, &t)?);
        let lv = self.lvalue(ctx, target)?;
        self.write_lvalue(ctx, &lv, &zero)
    }


    fn statement(&mut self, ctx: &mut EdgeContext, s: &Statement) -> Result<(), Error> {
        match s {
            Statement::Assignment{lhs, rhs} => self.assign(ctx, lhs, rhs),
            Statement::Call{call} => self.external_call(ctx, call),
            Statement::Expression{..} => Ok(()),
        }
    }

    /// `lhs = rhs`, followed by the aliasing consequences
    pub(crate) fn assign(&mut self, ctx: &mut EdgeContext, lhs: &Expression, rhs: &Expression) -> Result<(), Error> {
        let lt = lhs.typ();
        let source = if lt.is_pointer() {
            self.second_level_source(ctx, rhs)?
        } else {
            None
        };

        let value = self.rvalue_as(ctx, rhs, &lt)?;
        let lv = self.lvalue(ctx, lhs)?;
        self.write_lvalue(ctx, &lv, &value)?;

        if let Some(source) = source {
            if let Some((key, typ)) = self.lhs_pointer_key(ctx, lhs)? {
                self.second_level(ctx, &key, &typ, source)?;
            }
        }
        Ok(())
    }

    fn external_call(&mut self, ctx: &mut EdgeContext, call: &FunctionCall) -> Result<(), Error> {
        if self.options.is_allocation(&call.function) {
            let address = self.malloc(ctx);
            if let Some(lhs) = &call.lhs {
                let lt = lhs.typ();
                let v = self.cast(ctx, &address, &CType::pointer(CType::Void), &lt)?;
                let lv = self.lvalue(ctx, lhs)?;
                self.write_lvalue(ctx, &lv, &v)?;
                if lt.is_pointer() {
                    if let Some((key, typ)) = self.lhs_pointer_key(ctx, lhs)? {
                        self.second_level(ctx, &key, &typ, Source::Fresh)?;
                    }
                }
            }
            return Ok(());
        }

        let nondet = self.options.is_nondet(&call.function);
        let mut args = Vec::new();
        for a in &call.args {
            args.push(self.rvalue(ctx, a)?);
        }

        let result = if call.ret.is_void() {
            None
        } else {
            let w = self.width(ctx, &call.ret)?;
            if nondet {
                Some(self.fresh(ctx, w))
            } else {
                Some(self.fm.make_uf(&call.function, None, args, Sort::BitVec(w)))
            }
        };

        if !nondet {
            for a in &call.args {
                self.havoc_argument(ctx, a)?;
            }
        }

        if let (Some(lhs), Some(v)) = (&call.lhs, result) {
            let v = self.cast(ctx, &v, &call.ret, &lhs.typ())?;
            let lv = self.lvalue(ctx, lhs)?;
            self.write_lvalue(ctx, &lv, &v)?;
        }
        Ok(())
    }

    fn function_call(&mut self, ctx: &mut EdgeContext, call: &FunctionCall, callee: &FunctionDef) -> Result<(), Error> {
        let found = call.args.len();
        let expected = callee.params.len();
        let allowed = found == expected
            || (callee.vararg && found >= expected)
            || self.options.is_variadic(&callee.name);
        if !allowed {
            return Err(Error::ArityMismatch {
                function:   callee.name.clone(),
                expected,
                found,
                loc:        ctx.loc.clone(),
            });
        }

        // arguments are evaluated in the caller before any parameter is bound
        let mut bindings = Vec::new();
        for (arg, param) in call.args.iter().zip(&callee.params) {
            let source = if param.typ.is_pointer() {
                self.second_level_source(ctx, arg)?
            } else {
                None
            };
            let v = self.rvalue_as(ctx, arg, &param.typ)?;
            bindings.push((Key::scoped(&callee.name, &param.name), &param.typ, v, source));
        }

        for (key, typ, v, source) in bindings {
            self.write_key(ctx, &key, typ, &v)?;
            if let Some(source) = source {
                self.second_level(ctx, &key, typ, source)?;
            }
        }
        Ok(())
    }

    fn return_statement(&mut self, ctx: &mut EdgeContext, expression: Option<&Expression>, ret: &CType) -> Result<(), Error> {
        let e = match expression {
            Some(e) if !ret.is_void() => e,
            _ => return Ok(()),
        };
        let key = Key::return_value(&ctx.function);
        let source = if ret.is_pointer() {
            self.second_level_source(ctx, e)?
        } else {
            None
        };
        let v = self.rvalue_as(ctx, e, ret)?;
        self.write_key(ctx, &key, ret, &v)?;
        if let Some(source) = source {
            self.second_level(ctx, &key, ret, source)?;
        }
        Ok(())
    }

    fn function_return(&mut self, ctx: &mut EdgeContext, call: &FunctionCall, callee: &str) -> Result<(), Error> {
        let lhs = match &call.lhs {
            Some(lhs) if !call.ret.is_void() => lhs,
            _ => return Ok(()),
        };
        let key = Key::return_value(callee);
        let lt = lhs.typ();
        let source = if lt.is_pointer() && call.ret.is_pointer() {
            self.key_source(ctx, &key, &call.ret)?
        } else {
            None
        };

        let v = self.read_key(ctx, &key, &call.ret)?;
        let v = self.cast(ctx, &v, &call.ret, &lt)?;
        let lv = self.lvalue(ctx, lhs)?;
        self.write_lvalue(ctx, &lv, &v)?;

        if let Some(source) = source {
            if let Some((k, typ)) = self.lhs_pointer_key(ctx, lhs)? {
                self.second_level(ctx, &k, &typ, source)?;
            }
        }
        Ok(())
    }
}
