use crate::ast::{CType, Expression};
use crate::converter::{CtoFormulaConverter, EdgeContext};
use crate::error::Error;
use crate::expressions::decayed;
use crate::formula::{Sort, Term};
use crate::name::{Key, MALLOC};


/// What the content of a freshly assigned pointer is known to equal.
pub(crate) enum Source {
    Value(Term),
    Fresh,
}

impl CtoFormulaConverter {
    /// The key whose value `e` reads, for expressions that can hold a
    /// pointer. Returns the key with the type it is stored as.
    pub(crate) fn pointer_key(&mut self, ctx: &mut EdgeContext, e: &Expression) -> Result<Option<(Key, CType)>, Error> {
        match e {
            Expression::Id{name, global, typ} if !typ.is_array() && !typ.is_function() => {
                let key = ctx.key_of(name, *global);
                let t = match ctx.ssa.get_type(&key) {
                    Some(t) => t.clone(),
                    None => {
                        if self.types.bit_width(typ).is_some() {
                            ctx.ssa.set_index(&key, typ, 1);
                        }
                        typ.clone()
                    }
                };
                Ok(Some((key, t)))
            }
            Expression::Cast{operand, ..} => self.pointer_key(ctx, operand),
            Expression::Deref{operand, typ} => {
                let inner = match self.pointer_key(ctx, operand)? {
                    Some((inner, _)) => inner,
                    None => return Ok(None),
                };
                let index = self.pointer_index(ctx, &inner);
                let key = Key::content(inner, index);
                let t = ctx.ssa.get_type(&key).cloned().unwrap_or_else(||typ.clone());
                Ok(Some((key, t)))
            }
            Expression::Field{typ, ..} => {
                let lv = self.lvalue(ctx, e)?;
                Ok(lv.key().map(|k|(k, typ.clone())))
            }
            _ => Ok(None),
        }
    }

    /// index of the pointer value a content key of `key` is taken at
    pub(crate) fn pointer_index(&self, ctx: &EdgeContext, key: &Key) -> u32 {
        match key {
            Key::Plain(_) | Key::Content{..} => ctx.ssa.get_index(key).unwrap_or(1),
            Key::Field{owner, ..} => self.pointer_index(ctx, owner),
            Key::Address{..} => 1,
        }
    }

    /// content keys taken at the current value of their pointer
    pub(crate) fn live_contents(&self, ctx: &EdgeContext) -> Vec<(Key, CType)> {
        let mut live = Vec::new();
        for key in ctx.ssa.keys() {
            if let Key::Content{base, index} = &key {
                if *index != self.pointer_index(ctx, base) {
                    continue;
                }
                if let Some(t) = ctx.ssa.get_type(&key) {
                    let t = t.clone();
                    live.push((key, t));
                }
            }
        }
        live
    }

    fn address_term(&self, address: &Key) -> Term {
        let pw = self.types.pointer_width();
        self.fm.make_variable(&address.to_string(), None, Sort::BitVec(pw))
    }

    /// `&key`, if anything took the address of `key` on this path
    pub(crate) fn registered_address(&self, ctx: &EdgeContext, key: &Key) -> Option<Term> {
        let address = Key::address(key.clone());
        ctx.ssa.get_index(&address)?;
        Some(self.address_term(&address))
    }

    /// Address of variable `key` of type `typ`. Taking it the first time
    /// makes it distinct from null, every other address and every
    /// allocation so far.
    pub(crate) fn address_of_key(&mut self, ctx: &mut EdgeContext, key: &Key, typ: &CType) -> Term {
        let address = Key::address(key.clone());
        let term = self.address_term(&address);
        if ctx.ssa.get_index(&address).is_some() {
            return term;
        }

        let pw = self.types.pointer_width();
        let zero = self.fm.make_zero(pw);
        ctx.constraints.add(&self.fm, self.fm.not_equal(&term, &zero));

        for other in ctx.ssa.keys() {
            if other.is_address() {
                let o = self.address_term(&other);
                ctx.constraints.add(&self.fm, self.fm.not_equal(&term, &o));
            }
        }

        let malloc = Key::global(MALLOC);
        if let Some(k) = ctx.ssa.get_index(&malloc) {
            for j in 2..=k {
                let m = self.var(&malloc, j, pw);
                let null = self.fm.equal(&m, &zero);
                let apart = self.fm.not_equal(&term, &m);
                ctx.constraints.add(&self.fm, self.fm.or(&null, &apart));
            }
        }

        debug!("{}: address of {} taken", ctx.loc, key);
        ctx.ssa.set_index(&address, &CType::pointer(typ.clone()), 1);
        term
    }

    pub(crate) fn address_of(&mut self, ctx: &mut EdgeContext, e: &Expression) -> Result<Term, Error> {
        let pw = self.types.pointer_width();
        match e {
            Expression::Id{name, global, typ} => {
                let key = if typ.is_function() {
                    Key::global(name)
                } else {
                    ctx.key_of(name, *global)
                };
                Ok(self.address_of_key(ctx, &key, typ))
            }
            Expression::Field{owner, field, deref, ..} => {
                let (base, owner_t) = if *deref {
                    let ot = owner.typ().pointee().cloned().unwrap_or(CType::Void);
                    (self.rvalue(ctx, owner)?, ot)
                } else {
                    (self.address_of(ctx, owner)?, owner.typ())
                };
                let (offset, _) = self.types.field_offset(&owner_t, field)
                    .ok_or_else(||Error::unrecognized(format!("no field {} in '{}'", field, owner_t), &ctx.loc))?;
                let offset = self.fm.make_bitvector(offset as i128, pw);
                Ok(self.fm.add(&base, &offset))
            }
            Expression::Subscript{array, index, typ} => {
                let base = self.rvalue(ctx, array)?;
                let i = self.rvalue_as(ctx, index, &CType::long())?;
                let size = self.types.size_of(typ).unwrap_or(1);
                let offset = self.fm.mul(&i, &self.fm.make_bitvector(size as i128, pw));
                Ok(self.fm.add(&base, &offset))
            }
            Expression::Deref{operand, ..} => self.rvalue(ctx, operand),
            Expression::Cast{operand, ..} => self.address_of(ctx, operand),
            Expression::StringLiteral{value} => Ok(self.string_literal(ctx, value)),
            _ => Err(Error::unrecognized(format!("cannot take the address of '{}'", e), &ctx.loc)),
        }
    }

    /// Value of the pointer a content key was taken at, as an address.
    /// None if it cannot be named.
    fn base_value(&mut self, ctx: &mut EdgeContext, base: &Key, index: u32) -> Option<Term> {
        let pw = self.types.pointer_width();
        let v = match base {
            Key::Field{owner, msb, lsb} => {
                let ow = self.types.bit_width(ctx.ssa.get_type(owner)?)?;
                if *msb >= ow {
                    return None;
                }
                let o = self.var(owner, index, ow);
                self.fm.extract(&o, *msb, *lsb)
            }
            Key::Address{..} => return None,
            _ => {
                let w = self.types.bit_width(ctx.ssa.get_type(base)?)?;
                self.var(base, index, w)
            }
        };
        Some(self.fit_bits(ctx, &v, pw))
    }

    /// advances `key` to `value` without looking at aliases
    fn update_key(&mut self, ctx: &mut EdgeContext, key: &Key, typ: &CType, value: &Term) {
        let index = ctx.fresh_index(key);
        ctx.ssa.set_index(key, typ, index);
        let var = self.var(key, index, value.width());
        debug!("{} := {}", var, value);
        ctx.formula.push(self.fm.equal(&var, value));
    }

    /// Writes `value` to `key` and to everything that may alias it.
    pub(crate) fn write_key(&mut self, ctx: &mut EdgeContext, key: &Key, storage: &CType, value: &Term) -> Result<(), Error> {
        let live = if self.options.handle_pointer_aliasing {
            self.live_contents(ctx)
        } else {
            Vec::new()
        };

        let w = self.width(ctx, storage)?;
        let v = self.fit_bits(ctx, value, w);
        self.update_key(ctx, key, storage, &v);

        if self.options.handle_pointer_aliasing {
            self.propagate_write(ctx, key, storage, &v, live);
        }
        Ok(())
    }

    fn propagate_write(&mut self, ctx: &mut EdgeContext, key: &Key, storage: &CType, value: &Term, live: Vec<(Key, CType)>) {
        match key {
            Key::Plain(_) => {
                let address = match self.registered_address(ctx, key) {
                    Some(a) => a,
                    None => return,
                };
                let size = if storage.is_aggregate() { self.types.size_of(storage) } else { None };
                let others : Vec<(Key, CType)> = live.into_iter()
                    .filter(|(k, _)| k.root() != key.root())
                    .collect();
                self.update_aliases(ctx, &others, &address, size, value);
            }
            Key::Content{base, index} => {
                let others : Vec<(Key, CType)> = live.into_iter().filter(|(k, _)| k != key).collect();
                let pv = match self.base_value(ctx, base, *index) {
                    Some(pv) => pv,
                    None => {
                        self.warn(ctx, &format!("write through {} havocs all memory that may alias it", key));
                        self.havoc_memory(ctx, &others);
                        return;
                    }
                };
                self.update_variables(ctx, &pv, value);
                self.update_aliases(ctx, &others, &pv, None, value);
            }
            Key::Field{..} | Key::Address{..} => (),
        }
    }

    /// After a write of `value` to `address`, every live content may be
    /// the written memory. Aggregates of `size` bytes also cover pointers
    /// into their interior, which lose their value.
    pub(crate) fn update_aliases(&mut self, ctx: &mut EdgeContext, live: &[(Key, CType)], address: &Term, size: Option<u64>, value: &Term) {
        let pw = self.types.pointer_width();
        for (k, t) in live {
            let (base, index) = match k {
                Key::Content{base, index} => (base, *index),
                _ => continue,
            };
            let w = match self.types.bit_width(t) {
                Some(w) => w,
                None => continue,
            };
            let pv = match self.base_value(ctx, base, index) {
                Some(pv) => pv,
                None => {
                    self.havoc_key(ctx, k, t);
                    continue;
                }
            };

            let hit = self.fm.equal(&pv, address);
            let interior = size.map(|s| {
                let end = self.fm.add(address, &self.fm.make_bitvector(s as i128, pw));
                let above = self.fm.greater_than(&pv, address, false);
                let below = self.fm.less_than(&pv, &end, false);
                self.fm.and(&above, &below)
            });
            let untouched = self.fm.is_false(&hit)
                && interior.as_ref().map(|i|self.fm.is_false(i)).unwrap_or(true);
            if untouched {
                continue;
            }

            let old = self.var(k, ctx.ssa.get_index(k).unwrap_or(1), w);
            let otherwise = match interior {
                Some(interior) => {
                    let f = self.fresh(ctx, w);
                    self.fm.ite(&interior, &f, &old)
                }
                None => old,
            };
            let v = self.fit_bits(ctx, value, w);
            let new = self.fm.ite(&hit, &v, &otherwise);
            self.update_key(ctx, k, t, &new);
        }
    }

    /// a write through pointer value `pv` may hit any variable whose
    /// address was taken
    fn update_variables(&mut self, ctx: &mut EdgeContext, pv: &Term, value: &Term) {
        let pw = self.types.pointer_width();
        for address in ctx.ssa.keys() {
            let base = match &address {
                Key::Address{base} => (**base).clone(),
                _ => continue,
            };
            let t = match ctx.ssa.get_type(&address).and_then(|t|t.pointee()) {
                Some(t) => t.clone(),
                None => continue,
            };
            if t.is_function() {
                continue;
            }
            let at = self.address_term(&address);

            if let Some(element) = t.element() {
                self.update_elements(ctx, &base, element, &at, pv, value);
                continue;
            }

            let storage = ctx.ssa.get_type(&base).cloned().unwrap_or(t);
            let w = match self.types.bit_width(&storage) {
                Some(w) => w,
                None => continue,
            };
            let hit = self.fm.equal(pv, &at);
            let interior = if storage.is_aggregate() {
                let size = self.types.size_of(&storage).unwrap_or(0);
                let end = self.fm.add(&at, &self.fm.make_bitvector(size as i128, pw));
                let above = self.fm.greater_than(pv, &at, false);
                let below = self.fm.less_than(pv, &end, false);
                Some(self.fm.and(&above, &below))
            } else {
                None
            };
            if self.fm.is_false(&hit) && interior.is_none() {
                continue;
            }

            let old = match ctx.ssa.get_index(&base) {
                Some(i) => self.var(&base, i, w),
                None => {
                    ctx.ssa.set_index(&base, &storage, 1);
                    self.var(&base, 1, w)
                }
            };
            let otherwise = match interior {
                Some(interior) => {
                    let f = self.fresh(ctx, w);
                    self.fm.ite(&interior, &f, &old)
                }
                None => old,
            };
            let v = self.fit_bits(ctx, value, w);
            let new = self.fm.ite(&hit, &v, &otherwise);
            self.update_key(ctx, &base, &storage, &new);
        }
    }

    /// known entries `a(j)` of an address taken array, hit when `pv`
    /// points exactly at element `j`
    fn update_elements(&mut self, ctx: &mut EdgeContext, array: &Key, element: &CType, at: &Term, pv: &Term, value: &Term) {
        let pw = self.types.pointer_width();
        let t = ctx.ssa.get_func_type(array).cloned().unwrap_or_else(||element.clone());
        let (w, size) = match (self.types.bit_width(&t), self.types.size_of(&t)) {
            (Some(w), Some(s)) => (w, s),
            _ => return,
        };
        let name = array.to_string();
        let sort = Sort::BitVec(w);

        for (args, old) in ctx.ssa.func_entries(array) {
            if args.len() != 1 {
                continue;
            }
            let index = self.fit_bits(ctx, &args[0], pw);
            let offset = self.fm.mul(&index, &self.fm.make_bitvector(size as i128, pw));
            let address = self.fm.add(at, &offset);
            let hit = self.fm.equal(pv, &address);
            if self.fm.is_false(&hit) {
                continue;
            }
            let before = self.fm.make_uf(&name, Some(old), args.clone(), sort);
            let after  = self.fm.make_uf(&name, Some(old + 1), args.clone(), sort);
            let v = self.fit_bits(ctx, value, w);
            let update = self.fm.ite(&hit, &v, &before);
            ctx.formula.push(self.fm.equal(&after, &update));
            ctx.ssa.set_func_index(array, &args, &t, old + 1);
        }
    }


    /// Content of a pointer expression on the right hand side of a
    /// pointer assignment, so the assigned pointer's content can start
    /// out equal to it.
    pub(crate) fn second_level_source(&mut self, ctx: &mut EdgeContext, rhs: &Expression) -> Result<Option<Source>, Error> {
        if !self.options.handle_pointer_aliasing {
            return Ok(None);
        }
        match rhs.strip_casts() {
            Expression::AddressOf{operand, ..} => {
                let t = operand.typ();
                if t.is_array() || t.is_function() || self.types.bit_width(&t).is_none() {
                    return Ok(None);
                }
                Ok(Some(Source::Value(self.rvalue(ctx, operand)?)))
            }
            e => match self.pointer_key(ctx, e)? {
                Some((key, t)) => self.key_source(ctx, &key, &t),
                None => Ok(None),
            },
        }
    }

    /// current content of pointer `key` of type `ptype`
    pub(crate) fn key_source(&mut self, ctx: &mut EdgeContext, key: &Key, ptype: &CType) -> Result<Option<Source>, Error> {
        if !self.options.handle_pointer_aliasing {
            return Ok(None);
        }
        let pointee = match ptype.pointee() {
            Some(t) => t.clone(),
            None => return Ok(None),
        };
        let content = Key::content(key.clone(), self.pointer_index(ctx, key));
        let storage = ctx.ssa.get_type(&content).cloned().unwrap_or(pointee);
        if self.types.bit_width(&storage).is_none() {
            self.warn(ctx, &format!("content of {} has no size", key));
            return Ok(None);
        }
        Ok(Some(Source::Value(self.read_key(ctx, &content, &storage)?)))
    }

    /// the key an assigned pointer lives in, if its content is tracked
    pub(crate) fn lhs_pointer_key(&mut self, ctx: &mut EdgeContext, lhs: &Expression) -> Result<Option<(Key, CType)>, Error> {
        if !self.options.handle_pointer_aliasing {
            return Ok(None);
        }
        Ok(match self.pointer_key(ctx, lhs)? {
            Some((key, t)) => match key {
                Key::Plain(_) | Key::Content{..} => Some((key, t)),
                Key::Field{..} if self.options.handle_field_aliasing => Some((key, t)),
                _ => None,
            },
            None => None,
        })
    }

    /// Starts a new content for pointer `key` right after it was assigned.
    pub(crate) fn second_level(&mut self, ctx: &mut EdgeContext, key: &Key, ptype: &CType, source: Source) -> Result<(), Error> {
        let pointee = match ptype.pointee() {
            Some(t) => t.clone(),
            None => return Ok(()),
        };
        let content = Key::content(key.clone(), self.pointer_index(ctx, key));
        let storage = ctx.ssa.get_type(&content).cloned().unwrap_or(pointee);
        let w = match self.types.bit_width(&storage) {
            Some(w) => w,
            None => {
                self.warn(ctx, &format!("content of {} has no size", key));
                return Ok(());
            }
        };

        let index = ctx.fresh_index(&content);
        ctx.ssa.set_index(&content, &storage, index);
        if let Source::Value(v) = source {
            let v = self.fit_bits(ctx, &v, w);
            let c = self.var(&content, index, w);
            debug!("{} := {}", c, v);
            ctx.formula.push(self.fm.equal(&c, &v));
        }
        Ok(())
    }


    /// A fresh allocation. It is either null or distinct from every
    /// earlier allocation and every variable address.
    pub(crate) fn malloc(&mut self, ctx: &mut EdgeContext) -> Term {
        let malloc = Key::global(MALLOC);
        let pw = self.types.pointer_width();
        let k = ctx.fresh_index(&malloc);
        ctx.ssa.set_index(&malloc, &CType::pointer(CType::Void), k);
        let m = self.var(&malloc, k, pw);

        let mut distinct = Vec::new();
        for j in 2..k {
            distinct.push(self.fm.not_equal(&m, &self.var(&malloc, j, pw)));
        }
        for key in ctx.ssa.keys() {
            if key.is_address() {
                distinct.push(self.fm.not_equal(&m, &self.address_term(&key)));
            }
        }

        let nonnull = self.fm.not_equal(&m, &self.fm.make_zero(pw));
        let apart = self.fm.and_all(&distinct);
        ctx.constraints.add(&self.fm, self.fm.implies(&nonnull, &apart));
        m
    }


    pub(crate) fn havoc_key(&mut self, ctx: &mut EdgeContext, key: &Key, typ: &CType) {
        let t = ctx.ssa.get_type(key).cloned().unwrap_or_else(||typ.clone());
        let index = ctx.fresh_index(key);
        ctx.ssa.set_index(key, &t, index);
    }

    pub(crate) fn havoc_array(&mut self, ctx: &mut EdgeContext, key: &Key) {
        let t = match ctx.ssa.get_func_type(key) {
            Some(t) => t.clone(),
            None => return,
        };
        for (args, index) in ctx.ssa.func_entries(key) {
            ctx.ssa.set_func_index(key, &args, &t, index + 1);
        }
    }

    /// every variable whose address was taken, and the given contents
    fn havoc_memory(&mut self, ctx: &mut EdgeContext, contents: &[(Key, CType)]) {
        for address in ctx.ssa.keys() {
            let base = match &address {
                Key::Address{base} => (**base).clone(),
                _ => continue,
            };
            match ctx.ssa.get_type(&address).and_then(|t|t.pointee()).cloned() {
                Some(t) if t.is_array() => self.havoc_array(ctx, &base),
                Some(t) if t.is_function() => (),
                Some(t) => self.havoc_key(ctx, &base, &t),
                None => (),
            }
        }
        for (k, t) in contents {
            self.havoc_key(ctx, k, t);
        }
    }

    /// a write to memory that cannot be named
    pub(crate) fn havoc_unknown(&mut self, ctx: &mut EdgeContext) {
        if !self.options.handle_pointer_aliasing {
            return;
        }
        self.warn(ctx, "write to an unknown location havocs all memory reachable through pointers");
        let live = self.live_contents(ctx);
        self.havoc_memory(ctx, &live);
    }

    /// an external function may write through any pointer it is passed
    pub(crate) fn havoc_argument(&mut self, ctx: &mut EdgeContext, arg: &Expression) -> Result<(), Error> {
        match arg.strip_casts() {
            Expression::StringLiteral{..} => Ok(()),
            Expression::AddressOf{operand, ..} => {
                let t = operand.typ();
                if t.is_function() {
                    return Ok(());
                }
                if t.is_array() {
                    if let Expression::Id{name, global, ..} = operand.strip_casts() {
                        let key = ctx.key_of(name, *global);
                        self.havoc_array(ctx, &key);
                    }
                    return Ok(());
                }
                let w = match self.types.bit_width(&t) {
                    Some(w) => w,
                    None => return Ok(()),
                };
                let lv = self.lvalue(ctx, operand)?;
                let v = self.fresh(ctx, w);
                self.write_lvalue(ctx, &lv, &v)
            }
            Expression::Id{name, global, typ} if typ.is_array() => {
                let key = ctx.key_of(name, *global);
                self.havoc_array(ctx, &key);
                Ok(())
            }
            e => {
                let pointee = match decayed(&e.typ()).pointee() {
                    Some(CType::Qualified{is_const: true, ..}) => return Ok(()),
                    Some(t) => t.clone(),
                    None => return Ok(()),
                };
                let w = match self.types.bit_width(&pointee) {
                    Some(w) => w,
                    None => return Ok(()),
                };
                let lv = self.content_lvalue(ctx, e, &pointee)?;
                let v = self.fresh(ctx, w);
                self.write_lvalue(ctx, &lv, &v)
            }
        }
    }
}
