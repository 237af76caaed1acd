use crate::ast::{BinaryOperator, CType, Expression, UnaryOperator};
use crate::converter::{CtoFormulaConverter, EdgeContext};
use crate::error::Error;
use crate::formula::{BvOp, Sort, Term};
use crate::name::{Key, STRING_PREFIX};
use crate::types::FieldLayout;
use metrohash::MetroHash64;
use std::hash::Hasher;


/// What an assignment or a read refers to.
#[derive(Clone, Debug)]
pub(crate) enum LValue {
    /// a variable or pointer content. `storage` is the type the key is
    /// recorded with, `access` the type it is read or written as
    Key {
        key:        Key,
        storage:    CType,
        access:     CType,
    },
    Field {
        owner:      Box<LValue>,
        layout:     FieldLayout,
    },
    Element {
        array:      Key,
        element:    CType,
        index:      Term,
    },
    /// memory that cannot be named
    Unknown {
        typ:        CType,
    },
}

impl LValue {
    pub fn typ(&self) -> &CType {
        match self {
            LValue::Key{access, ..} => access,
            LValue::Field{layout, ..} => &layout.typ,
            LValue::Element{element, ..} => element,
            LValue::Unknown{typ} => typ,
        }
    }

    /// the key this lvalue lives in, fields included
    pub fn key(&self) -> Option<Key> {
        match self {
            LValue::Key{key, ..} => Some(key.clone()),
            LValue::Field{owner, layout} => Some(Key::field(owner.key()?, layout.msb, layout.lsb)),
            _ => None,
        }
    }
}

/// arrays and functions evaluate to their address
pub(crate) fn decayed(t: &CType) -> CType {
    match t.unqualified() {
        CType::Array{element, ..} => CType::pointer((**element).clone()),
        CType::Function{..} => CType::pointer(t.clone()),
        _ => t.clone(),
    }
}

fn float_kind(t: &CType) -> &'static str {
    if t.is_float() {
        "float"
    } else if t.is_pointer() {
        "ptr"
    } else if t.is_signed() {
        "int"
    } else {
        "uint"
    }
}


impl CtoFormulaConverter {
    /// value of `e` as a bitvector of its type's width
    pub(crate) fn rvalue(&mut self, ctx: &mut EdgeContext, e: &Expression) -> Result<Term, Error> {
        let t = self.eval(ctx, e)?;
        if t.is_bool() {
            let w = self.width(ctx, &e.typ())?;
            return Ok(self.fm.ite(&t, &self.fm.make_bitvector(1, w), &self.fm.make_zero(w)));
        }
        Ok(t)
    }

    pub(crate) fn rvalue_as(&mut self, ctx: &mut EdgeContext, e: &Expression, to: &CType) -> Result<Term, Error> {
        let v = self.rvalue(ctx, e)?;
        self.cast(ctx, &v, &decayed(&e.typ()), to)
    }

    /// `e` as a branch condition
    pub(crate) fn condition(&mut self, ctx: &mut EdgeContext, e: &Expression) -> Result<Term, Error> {
        let t = self.eval(ctx, e)?;
        if t.is_bool() {
            return Ok(t);
        }
        let zero = self.fm.make_zero(t.width());
        Ok(self.fm.not_equal(&t, &zero))
    }

    /// boolean for comparisons and logical operators, bitvector otherwise
    fn eval(&mut self, ctx: &mut EdgeContext, e: &Expression) -> Result<Term, Error> {
        match e {
            Expression::Id{typ, ..}
            | Expression::Field{typ, ..}
            | Expression::Subscript{typ, ..}
            | Expression::Deref{typ, ..}
            if typ.is_array() || typ.is_function() => {
                return self.address_of(ctx, e);
            }
            _ => (),
        }

        match e {
            Expression::IntLiteral{value, typ} => {
                let w = self.width(ctx, typ)?;
                Ok(self.fm.make_bitvector(*value as i128, w))
            }
            Expression::CharLiteral{value} => Ok(self.fm.make_bitvector(*value as i128, 8)),
            Expression::FloatLiteral{value, typ} => {
                let w = self.width(ctx, typ)?;
                self.warn(ctx, "floating point literal replaced by a named constant");
                Ok(self.fm.make_variable(&format!("__float{}__{}", w, value), None, Sort::BitVec(w)))
            }
            Expression::StringLiteral{value} => Ok(self.string_literal(ctx, value)),
            Expression::Id{name, global, typ} => {
                let key = ctx.key_of(name, *global);
                self.read_key(ctx, &key, typ)
            }
            Expression::Binary{op, lhs, rhs, typ} => self.binary(ctx, *op, lhs, rhs, typ),
            Expression::Unary{op, operand, typ} => self.unary(ctx, *op, operand, typ),
            Expression::Deref{..} | Expression::Field{..} | Expression::Subscript{..} => {
                let lv = self.lvalue(ctx, e)?;
                self.read_lvalue(ctx, &lv)
            }
            Expression::AddressOf{operand, ..} => self.address_of(ctx, operand),
            Expression::Cast{operand, typ} => self.rvalue_as(ctx, operand, typ),
            Expression::SizeOf{of} => {
                let size = self.types.size_of(of)
                    .ok_or_else(||Error::unrecognized(format!("sizeof incomplete type '{}'", of), &ctx.loc))?;
                let w = self.width(ctx, &CType::ulong())?;
                Ok(self.fm.make_bitvector(size as i128, w))
            }
        }
    }

    fn binary(&mut self, ctx: &mut EdgeContext, op: BinaryOperator, lhs: &Expression, rhs: &Expression, typ: &CType)
        -> Result<Term, Error>
    {
        if op.is_logical() {
            let a = self.condition(ctx, lhs)?;
            let b = self.condition(ctx, rhs)?;
            return Ok(match op {
                BinaryOperator::LogicalAnd => self.fm.and(&a, &b),
                _ => self.fm.or(&a, &b),
            });
        }

        let lt = decayed(&lhs.typ());
        let rt = decayed(&rhs.typ());
        let pointers = lt.is_pointer() || rt.is_pointer();

        if op.is_comparison() {
            let (common, signed) = if pointers {
                (CType::pointer(CType::Void), false)
            } else {
                let c = self.types.arithmetic_conversion(&lt, &rt);
                let s = c.is_signed();
                (c, s)
            };
            let a = self.rvalue_as(ctx, lhs, &common)?;
            let b = self.rvalue_as(ctx, rhs, &common)?;
            if common.is_float() {
                return Ok(self.float_op(ctx, &format!("{:?}", op), vec![a, b], Sort::Bool));
            }
            return Ok(match op {
                BinaryOperator::Equals          => self.fm.equal(&a, &b),
                BinaryOperator::NotEquals       => self.fm.not_equal(&a, &b),
                BinaryOperator::LessThan        => self.fm.less_than(&a, &b, signed),
                BinaryOperator::LessEqual       => self.fm.less_equal(&a, &b, signed),
                BinaryOperator::GreaterThan     => self.fm.greater_than(&a, &b, signed),
                _                               => self.fm.greater_equal(&a, &b, signed),
            });
        }

        if pointers {
            return self.pointer_arithmetic(ctx, op, lhs, rhs, typ);
        }

        if op.is_shift() {
            let pt = self.types.promote(&lt);
            let a = self.rvalue_as(ctx, lhs, &pt)?;
            let b = self.rvalue_as(ctx, rhs, &pt)?;
            let r = match op {
                BinaryOperator::ShiftLeft => self.fm.shl(&a, &b),
                _ => self.fm.shr(&a, &b, pt.is_signed()),
            };
            return self.cast(ctx, &r, &pt, typ);
        }

        let common = self.types.arithmetic_conversion(&lt, &rt);
        let a = self.rvalue_as(ctx, lhs, &common)?;
        let b = self.rvalue_as(ctx, rhs, &common)?;
        if common.is_float() {
            let w = a.width();
            let r = self.float_op(ctx, &format!("{:?}", op), vec![a, b], Sort::BitVec(w));
            return self.cast(ctx, &r, &common, typ);
        }

        let signed = common.is_signed();
        let r = match op {
            BinaryOperator::Multiply    => self.fm.mul(&a, &b),
            BinaryOperator::Divide      => self.fm.div(&a, &b, signed),
            BinaryOperator::Modulo      => self.fm.rem(&a, &b, signed),
            BinaryOperator::Plus        => self.fm.add(&a, &b),
            BinaryOperator::Minus       => self.fm.sub(&a, &b),
            BinaryOperator::BitwiseAnd  => self.fm.bv(BvOp::And, &a, &b),
            BinaryOperator::BitwiseXor  => self.fm.bv(BvOp::Xor, &a, &b),
            BinaryOperator::BitwiseOr   => self.fm.bv(BvOp::Or, &a, &b),
            op => return Err(Error::unrecognized(format!("operator {} on arithmetic operands", op), &ctx.loc)),
        };
        self.cast(ctx, &r, &common, typ)
    }

    /// `p + n` and `p - n` move by whole elements, `p - q` counts them
    fn pointer_arithmetic(&mut self, ctx: &mut EdgeContext, op: BinaryOperator, lhs: &Expression, rhs: &Expression, typ: &CType)
        -> Result<Term, Error>
    {
        let lt = decayed(&lhs.typ());
        let rt = decayed(&rhs.typ());
        let long = CType::long();
        let pw = self.types.pointer_width();

        let element_size = |t: &CType| -> i128 {
            t.pointee().and_then(|p| self.types.size_of(p)).filter(|s| *s > 0).unwrap_or(1) as i128
        };

        match (lt.is_pointer(), rt.is_pointer(), op) {
            (true, true, BinaryOperator::Minus) => {
                let size = self.fm.make_bitvector(element_size(&lt), pw);
                let a = self.rvalue_as(ctx, lhs, &long)?;
                let b = self.rvalue_as(ctx, rhs, &long)?;
                let diff = self.fm.sub(&a, &b);
                let count = self.fm.div(&diff, &size, true);
                self.cast(ctx, &count, &long, typ)
            }
            (true, false, BinaryOperator::Plus) | (true, false, BinaryOperator::Minus) | (false, true, BinaryOperator::Plus) => {
                let (p, pt, n) = if lt.is_pointer() { (lhs, &lt, rhs) } else { (rhs, &rt, lhs) };
                let size = self.fm.make_bitvector(element_size(pt), pw);
                let base = self.rvalue_as(ctx, p, pt)?;
                let count = self.rvalue_as(ctx, n, &long)?;
                let offset = self.fm.mul(&count, &size);
                let r = match op {
                    BinaryOperator::Minus => self.fm.sub(&base, &offset),
                    _ => self.fm.add(&base, &offset),
                };
                self.cast(ctx, &r, pt, typ)
            }
            _ => {
                // bit operations on addresses, as plain unsigned integers
                let a = self.rvalue_as(ctx, lhs, &CType::ulong())?;
                let b = self.rvalue_as(ctx, rhs, &CType::ulong())?;
                let r = match op {
                    BinaryOperator::BitwiseAnd  => self.fm.bv(BvOp::And, &a, &b),
                    BinaryOperator::BitwiseOr   => self.fm.bv(BvOp::Or, &a, &b),
                    BinaryOperator::BitwiseXor  => self.fm.bv(BvOp::Xor, &a, &b),
                    BinaryOperator::Plus        => self.fm.add(&a, &b),
                    BinaryOperator::Minus       => self.fm.sub(&a, &b),
                    op => return Err(Error::unrecognized(format!("operator {} on pointers", op), &ctx.loc)),
                };
                self.cast(ctx, &r, &CType::ulong(), typ)
            }
        }
    }

    fn unary(&mut self, ctx: &mut EdgeContext, op: UnaryOperator, operand: &Expression, typ: &CType) -> Result<Term, Error> {
        match op {
            UnaryOperator::Not => {
                let c = self.condition(ctx, operand)?;
                Ok(self.fm.not(&c))
            }
            UnaryOperator::Plus => self.rvalue_as(ctx, operand, typ),
            UnaryOperator::Minus | UnaryOperator::Tilde => {
                let pt = self.types.promote(&operand.typ());
                let v = self.rvalue_as(ctx, operand, &pt)?;
                let r = if pt.is_float() {
                    let w = v.width();
                    self.float_op(ctx, &format!("{:?}", op), vec![v], Sort::BitVec(w))
                } else if op == UnaryOperator::Minus {
                    self.fm.neg(&v)
                } else {
                    self.fm.bvnot(&v)
                };
                self.cast(ctx, &r, &pt, typ)
            }
        }
    }

    fn float_op(&mut self, ctx: &EdgeContext, op: &str, args: Vec<Term>, sort: Sort) -> Term {
        self.warn(ctx, "floating point arithmetic replaced by uninterpreted functions");
        let width = args.first().map(|a| a.width()).unwrap_or(0);
        let name = format!("__float_{}_{}__", op.to_lowercase(), width);
        self.fm.make_uf(&name, None, args, sort)
    }

    /// Converts `v` from `from` to `to`. Narrowing keeps the low bits,
    /// widening extends by the signedness of the source.
    pub(crate) fn cast(&mut self, ctx: &mut EdgeContext, v: &Term, from: &CType, to: &CType) -> Result<Term, Error> {
        if from == to || to.is_void() {
            return Ok(v.clone());
        }
        let unsupported = || Error::UnsupportedCast {
            from:   from.clone(),
            to:     to.clone(),
            loc:    ctx.loc.clone(),
        };

        let wt = self.types.bit_width(to).ok_or_else(unsupported)?;
        let wf = v.width();

        if let CType::Bool = to.unqualified() {
            let zero = self.fm.make_zero(wf);
            let nonzero = self.fm.not_equal(v, &zero);
            return Ok(self.fm.ite(&nonzero, &self.fm.make_bitvector(1, wt), &self.fm.make_zero(wt)));
        }

        if from.is_float() || to.is_float() {
            if from.unqualified() == to.unqualified() {
                return Ok(v.clone());
            }
            self.warn(ctx, "floating point conversion replaced by an uninterpreted function");
            let name = format!("__{}{}_to_{}{}__", float_kind(from), wf, float_kind(to), wt);
            return Ok(self.fm.make_uf(&name, None, vec![v.clone()], Sort::BitVec(wt)));
        }

        if from.is_aggregate() || to.is_aggregate() {
            if wf == wt {
                return Ok(v.clone());
            }
            return Err(unsupported());
        }

        Ok(if wt == wf {
            v.clone()
        } else if wt < wf {
            self.fm.extract(v, wt - 1, 0)
        } else if from.is_signed() {
            self.fm.sign_extend(v, wt - wf)
        } else {
            self.fm.zero_extend(v, wt - wf)
        })
    }


    pub(crate) fn lvalue(&mut self, ctx: &mut EdgeContext, e: &Expression) -> Result<LValue, Error> {
        match e {
            Expression::Id{name, global, typ} => {
                let key = ctx.key_of(name, *global);
                let storage = ctx.ssa.get_type(&key).cloned().unwrap_or_else(||typ.clone());
                Ok(LValue::Key{key, storage, access: typ.clone()})
            }
            Expression::Deref{operand, typ} => {
                if let Expression::AddressOf{operand: inner, ..} = operand.strip_casts() {
                    return self.lvalue(ctx, inner);
                }
                self.content_lvalue(ctx, operand, typ)
            }
            Expression::Field{owner, field, deref, typ} => {
                let (owner_lv, owner_t) = if *deref {
                    let ot = owner.typ().pointee().cloned().unwrap_or(CType::Void);
                    (self.content_lvalue(ctx, owner, &ot)?, ot)
                } else {
                    (self.lvalue(ctx, owner)?, owner.typ())
                };
                if let LValue::Unknown{..} = owner_lv {
                    return Ok(LValue::Unknown{typ: typ.clone()});
                }
                match self.types.field_layout(&owner_t, field) {
                    Some(layout) => Ok(LValue::Field{owner: Box::new(owner_lv), layout}),
                    None => {
                        self.warn(ctx, &format!("no layout for field {} of '{}'", field, owner_t));
                        Ok(LValue::Unknown{typ: typ.clone()})
                    }
                }
            }
            Expression::Subscript{array, index, typ} => {
                let at = array.typ();
                if at.is_array() {
                    if let Expression::Id{name, global, ..} = array.strip_casts() {
                        let key = ctx.key_of(name, *global);
                        let index = self.rvalue_as(ctx, index, &CType::long())?;
                        return Ok(LValue::Element{array: key, element: typ.clone(), index});
                    }
                    self.warn(ctx, &format!("array access {} too deep, value is unconstrained", e));
                    return Ok(LValue::Unknown{typ: typ.clone()});
                }
                if let Expression::IntLiteral{value: 0, ..} = index.strip_casts() {
                    return self.content_lvalue(ctx, array, typ);
                }
                self.warn(ctx, &format!("pointer offset access {} is unconstrained", e));
                Ok(LValue::Unknown{typ: typ.clone()})
            }
            Expression::Cast{operand, ..} => self.lvalue(ctx, operand),
            _ => Err(Error::unrecognized(format!("'{}' is not an lvalue", e), &ctx.loc)),
        }
    }

    /// `*pointer`, accessed as `access`
    pub(crate) fn content_lvalue(&mut self, ctx: &mut EdgeContext, pointer: &Expression, access: &CType) -> Result<LValue, Error> {
        if !self.options.handle_pointer_aliasing {
            return Ok(LValue::Unknown{typ: access.clone()});
        }
        let (base, ptype) = match self.pointer_key(ctx, pointer)? {
            Some(pk) => pk,
            None => {
                self.warn(ctx, &format!("dereference of {} is unconstrained", pointer));
                return Ok(LValue::Unknown{typ: access.clone()});
            }
        };

        let index = self.pointer_index(ctx, &base);
        let key = Key::content(base, index);
        let storage = match ctx.ssa.get_type(&key) {
            Some(t) => t.clone(),
            None => match ptype.pointee() {
                Some(t) if self.types.bit_width(t).is_some() => t.clone(),
                _ => access.clone(),
            },
        };
        if self.types.bit_width(&storage).is_none() {
            self.warn(ctx, &format!("dereference of {} has no size", pointer));
            return Ok(LValue::Unknown{typ: access.clone()});
        }
        Ok(LValue::Key{key, storage, access: access.clone()})
    }

    /// Current value of `key`. A key read before it was ever written is
    /// registered at index 1.
    pub(crate) fn read_key(&mut self, ctx: &mut EdgeContext, key: &Key, typ: &CType) -> Result<Term, Error> {
        let storage = ctx.ssa.get_type(key).cloned().unwrap_or_else(||typ.clone());
        let w = self.width(ctx, &storage)?;
        let index = match ctx.ssa.get_index(key) {
            Some(i) => i,
            None => {
                ctx.ssa.set_index(key, &storage, 1);
                1
            }
        };
        Ok(self.var(key, index, w))
    }

    pub(crate) fn read_lvalue(&mut self, ctx: &mut EdgeContext, lv: &LValue) -> Result<Term, Error> {
        match lv {
            LValue::Key{key, storage, access} => {
                let v = self.read_key(ctx, key, storage)?;
                let w = self.width(ctx, access)?;
                Ok(self.fit_bits(ctx, &v, w))
            }
            LValue::Field{owner, layout} => {
                let v = self.read_lvalue(ctx, owner)?;
                if layout.msb >= v.width() {
                    self.warn(ctx, &format!("field {} outside of its owner", layout.name));
                    return Ok(self.fresh(ctx, layout.width()));
                }
                Ok(self.fm.extract(&v, layout.msb, layout.lsb))
            }
            LValue::Element{array, element, index} => self.read_element(ctx, array, element, index),
            LValue::Unknown{typ} => {
                let w = self.width(ctx, typ)?;
                Ok(self.fresh(ctx, w))
            }
        }
    }

    pub(crate) fn write_lvalue(&mut self, ctx: &mut EdgeContext, lv: &LValue, value: &Term) -> Result<(), Error> {
        match lv {
            LValue::Key{key, storage, ..} => {
                let w = self.width(ctx, storage)?;
                let v = self.fit_bits(ctx, value, w);
                self.write_key(ctx, key, storage, &v)
            }
            LValue::Field{owner, layout} => {
                let old = self.read_lvalue(ctx, owner)?;
                let w = old.width();
                if layout.msb >= w {
                    self.warn(ctx, &format!("field {} outside of its owner", layout.name));
                    let havoc = self.fresh(ctx, w);
                    return self.write_lvalue(ctx, owner, &havoc);
                }
                let mut v = self.fit_bits(ctx, value, layout.width());
                if layout.lsb > 0 {
                    let low = self.fm.extract(&old, layout.lsb - 1, 0);
                    v = self.fm.concat(&v, &low);
                }
                if layout.msb + 1 < w {
                    let high = self.fm.extract(&old, w - 1, layout.msb + 1);
                    v = self.fm.concat(&high, &v);
                }
                self.write_lvalue(ctx, owner, &v)
            }
            LValue::Element{array, element, index} => self.write_element(ctx, array, element, index, value),
            LValue::Unknown{..} => {
                self.havoc_unknown(ctx);
                Ok(())
            }
        }
    }

    fn element_width(&self, ctx: &EdgeContext, array: &Key, element: &CType) -> Result<(CType, u32), Error> {
        let t = ctx.ssa.get_func_type(array).cloned().unwrap_or_else(||element.clone());
        let w = self.width(ctx, &t)?;
        Ok((t, w))
    }

    fn read_element(&mut self, ctx: &mut EdgeContext, array: &Key, element: &CType, index: &Term) -> Result<Term, Error> {
        let (t, w) = self.element_width(ctx, array, element)?;
        let args = vec![index.clone()];
        let i = match ctx.ssa.get_func_index(array, &args) {
            Some(i) => i,
            None => {
                ctx.ssa.set_func_index(array, &args, &t, 1);
                1
            }
        };
        Ok(self.fm.make_uf(&array.to_string(), Some(i), args, Sort::BitVec(w)))
    }

    /// `a[i] = v`. Every other known entry `a[j]` advances to
    /// `ite(j == i, v, a[j])` since `j` and `i` may coincide.
    fn write_element(&mut self, ctx: &mut EdgeContext, array: &Key, element: &CType, index: &Term, value: &Term)
        -> Result<(), Error>
    {
        let (t, w) = self.element_width(ctx, array, element)?;
        let v = self.fit_bits(ctx, value, w);
        let live = self.live_contents(ctx);
        let name = array.to_string();
        let sort = Sort::BitVec(w);

        for (args, old) in ctx.ssa.func_entries(array) {
            if args.len() != 1 || &args[0] == index {
                continue;
            }
            let before = self.fm.make_uf(&name, Some(old), args.clone(), sort);
            let after  = self.fm.make_uf(&name, Some(old + 1), args.clone(), sort);
            let same   = self.fm.equal(&args[0], index);
            let update = self.fm.ite(&same, &v, &before);
            ctx.formula.push(self.fm.equal(&after, &update));
            ctx.ssa.set_func_index(array, &args, &t, old + 1);
        }

        let args = vec![index.clone()];
        let new = ctx.ssa.get_func_index(array, &args).map(|i| i + 1).unwrap_or(2);
        ctx.ssa.set_func_index(array, &args, &t, new);
        let target = self.fm.make_uf(&name, Some(new), args, sort);
        debug!("{} := {}", target, v);
        ctx.formula.push(self.fm.equal(&target, &v));

        if self.options.handle_pointer_aliasing {
            if let Some(base) = self.registered_address(ctx, array) {
                let pw = self.types.pointer_width();
                let size = self.types.size_of(&t).unwrap_or(1) as i128;
                let offset = self.fm.mul(&self.fit_index(index, pw), &self.fm.make_bitvector(size, pw));
                let address = self.fm.add(&base, &offset);
                self.update_aliases(ctx, &live, &address, None, &v);
            }
        }
        Ok(())
    }

    fn fit_index(&self, index: &Term, width: u32) -> Term {
        let w = index.width();
        if w == width {
            index.clone()
        } else if w > width {
            self.fm.extract(index, width - 1, 0)
        } else {
            self.fm.sign_extend(index, width - w)
        }
    }

    /// String literals are constant addresses named after their content,
    /// distinct from null and every other address on the path.
    pub(crate) fn string_literal(&mut self, ctx: &mut EdgeContext, value: &str) -> Term {
        let mut h = MetroHash64::default();
        h.write(value.as_bytes());
        let key = Key::global(&format!("{}{:016x}", STRING_PREFIX, h.finish()));
        let typ = CType::array(CType::char(), Some(value.len() as u64 + 1));
        self.address_of_key(ctx, &key, &typ)
    }
}
