//! Expression evaluation: AST expressions to typed LLVM values.
//!
//! Evaluation is bottom-up under the context-type stack: the pushed context
//! is the type the consumer wants, and untyped constants adopt it. Constant
//! sub-expressions fold without emitting IR; their LLVM constants are
//! materialised lazily from the compile-time value once the final type is
//! known.

use inkwell::module::Linkage;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, IntValue};
use inkwell::{FloatPredicate, IntPredicate};

use brim_common::error::Result;
use brim_common::span::Pos;
use brim_parser::ast::{
    BinOp, CallArg, CallExpr, Expr, ExprKind, FieldInit, Ident, TypeExpr, UnaryOp,
};

use crate::codegen::types::{llvm_type, undef_of};
use crate::codegen::{llerr, value_as_instruction, Codegen, CtValue, LoadedFrom, LocalSym, RealData, Resolved};
use crate::map::SymbolKind;
use crate::rt::RealType;
use crate::rt::TypeId;

impl<'a, 'ctx> Codegen<'a, 'ctx> {
    /// Evaluate an expression in result position: the value must not be
    /// `void` and must have settled on a concrete type.
    pub(crate) fn evaluate_node(&mut self, expr: &'a Expr, ctx: TypeId) -> Result<RealData<'ctx>> {
        self.eval_with(expr, ctx, true, false)
    }

    /// Evaluate an operand of an enclosing expression; the enclosing
    /// operator applies its own checks.
    pub(crate) fn evaluate_operand(&mut self, expr: &'a Expr, ctx: TypeId) -> Result<RealData<'ctx>> {
        self.eval_with(expr, ctx, false, false)
    }

    /// Evaluate an expression used as a statement; `void` is permitted.
    pub(crate) fn evaluate_stmt_expr(&mut self, expr: &'a Expr) -> Result<RealData<'ctx>> {
        self.eval_with(expr, self.types.placeholder, true, true)
    }

    fn eval_with(
        &mut self,
        expr: &'a Expr,
        ctx: TypeId,
        is_top: bool,
        is_stmt: bool,
    ) -> Result<RealData<'ctx>> {
        self.push_ctx(ctx);
        let rd = self.eval_expr(expr);
        self.pop_ctx();
        let rd = rd?;

        if is_top && !is_stmt && self.types.is_void(rd.ty) {
            return Err(self.serr("expression not allowed to be `void`", expr.pos));
        }
        if is_top && self.types.is_placeholder(rd.ty) {
            return Err(self.serr("expression has no clear type here", expr.pos));
        }

        Ok(rd)
    }

    fn eval_expr(&mut self, expr: &'a Expr) -> Result<RealData<'ctx>> {
        match &expr.kind {
            ExprKind::Num(text) => self.evaluate_num(text, expr.pos),
            ExprKind::FNum(text) => self.evaluate_fnum(text, expr.pos),
            ExprKind::Chr(c) => {
                let ty = self.ctx_if_int_or(self.types.u8());
                Ok(RealData::comptime(ty, CtValue::Int(*c as i128)))
            }
            ExprKind::True => Ok(self.bool_const(1)),
            ExprKind::False => Ok(self.bool_const(0)),
            ExprKind::NoneLit => {
                let ctx = self.ctx();
                let ty = if self.types.is_numeric(ctx) || self.types.is_ptr(ctx) {
                    ctx
                } else {
                    self.types.cstring
                };
                Ok(RealData::comptime(ty, CtValue::Int(0)))
            }
            ExprKind::Undefined => {
                let ty = self.ctx();
                let llvm = if self.types.is_placeholder(ty) || self.types.is_void(ty) {
                    None
                } else {
                    Some(undef_of(llvm_type(self.context, &self.types, ty)))
                };
                Ok(RealData { ty, llvm, value: Some(CtValue::Int(0)), coerced: false, addr: None })
            }
            ExprKind::Str(value) => self.evaluate_str(value),
            ExprKind::Id(name) => self.evaluate_id(name, expr.pos),
            ExprKind::EnumLit(_) => Err(self.serr("enum literal is not allowed here", expr.pos)),
            ExprKind::Bin { op, lhs, rhs } => match op {
                BinOp::And | BinOp::Or => self.evaluate_andor(*op, lhs, rhs, expr.pos),
                op => self.evaluate_bin(*op, lhs, rhs, expr.pos),
            },
            ExprKind::Unary { op, expr: inner, .. } => match op {
                UnaryOp::Ref { is_mut } => self.evaluate_ref(inner, *is_mut, expr.pos),
                UnaryOp::Deref => self.evaluate_deref(inner),
                UnaryOp::Not => self.evaluate_not(inner),
                UnaryOp::Neg | UnaryOp::Plus => self.evaluate_neg_or_plus(*op, inner),
            },
            ExprKind::Cast { expr: inner, ty, .. } => self.evaluate_cast(inner, ty, expr.pos),
            ExprKind::InlineIf { then_expr, cond, else_expr } => {
                self.evaluate_inline_if(then_expr, cond, else_expr)
            }
            ExprKind::Call(call) => self.evaluate_call(call, expr.pos),
            ExprKind::Dot { base, field } => self.evaluate_dot(base, field, expr.pos),
            ExprKind::Index { base, index } => self.evaluate_index(base, index),
            ExprKind::ArrayInit(items) => self.evaluate_array_init(items),
            ExprKind::StructInit(fields) => self.evaluate_struct_init(fields),
            ExprKind::UnionInit(field) => self.evaluate_union_init(field, expr.pos),
        }
    }

    // ── Constants ──────────────────────────────────────────────────────

    fn evaluate_num(&mut self, text: &str, pos: Pos) -> Result<RealData<'ctx>> {
        let ty = self.ctx_if_numeric_or(self.types.i32());

        let value = if self.types.is_float(ty) {
            CtValue::Float(
                text.parse::<f64>().map_err(|_| self.serr("malformed num", pos))?,
            )
        } else {
            CtValue::Int(
                text.parse::<i128>().map_err(|_| self.serr("malformed num", pos))?,
            )
        };

        Ok(RealData::comptime(ty, value))
    }

    fn evaluate_fnum(&mut self, text: &str, pos: Pos) -> Result<RealData<'ctx>> {
        let ctx = self.ctx();
        let ty = if self.types.is_float(ctx) { ctx } else { self.types.f32() };

        if self.types.is_int(ctx) {
            return Err(self.serr("unable to coerce float constant expression to int type", pos));
        }

        let value = text.parse::<f64>().map_err(|_| self.serr("malformed num", pos))?;
        Ok(RealData::comptime(ty, CtValue::Float(value)))
    }

    fn bool_const(&self, value: i128) -> RealData<'ctx> {
        let ty = self.ctx_if_numeric_or(self.types.u8());
        RealData::comptime(ty, CtValue::Int(value))
    }

    fn evaluate_str(&mut self, value: &str) -> Result<RealData<'ctx>> {
        let global = match self.strings.get(value) {
            Some(global) => *global,
            None => {
                self.str_counter += 1;
                let name = self.fixname(&format!("str.{}", self.str_counter));
                let initializer = self.context.const_string(value.as_bytes(), true);
                let global = self.module.add_global(initializer.get_type(), None, &name);
                global.set_initializer(&initializer);
                global.set_linkage(Linkage::Private);
                global.set_constant(true);
                global.set_unnamed_addr(true);
                self.strings.insert(value.to_string(), global);
                global
            }
        };

        let ptr = global.as_pointer_value();

        if self.types.eq(self.ctx(), self.types.cstring) {
            return Ok(RealData {
                ty: self.types.cstring,
                llvm: Some(ptr.into()),
                value: Some(CtValue::Str(value.to_string())),
                coerced: false,
                addr: None,
            });
        }

        let len = self.context.i64_type().const_int(value.len() as u64, false);
        let agg = self.context.const_struct(&[ptr.into(), len.into()], false);

        Ok(RealData {
            ty: self.types.string,
            llvm: Some(agg.into()),
            value: Some(CtValue::Str(value.to_string())),
            coerced: false,
            addr: None,
        })
    }

    fn evaluate_id(&mut self, name: &str, pos: Pos) -> Result<RealData<'ctx>> {
        match self.get_symbol(name, pos)? {
            Resolved::Local(LocalSym::Var { is_comptime, ty, ptr, value }) => {
                if is_comptime {
                    return Ok(value.expect("comptime variables store their value"));
                }
                if self.comptime_only > 0 {
                    return Err(self.serr("expected comptime expression", pos));
                }

                let ptr = ptr.expect("runtime variables have storage");
                let ll = llvm_type(self.context, &self.types, ty);
                let v = self.cur_builder().build_load(ll, ptr, name).map_err(llerr)?;

                Ok(RealData {
                    ty,
                    llvm: Some(v),
                    value: None,
                    coerced: false,
                    addr: value_as_instruction(v)
                        .map(|inst| LoadedFrom { inst, ptr, is_mut: true }),
                })
            }
            Resolved::Local(LocalSym::TypeAlias(_)) => {
                Err(self.serr(format!("`{name}` is not a variable"), pos))
            }
            Resolved::Global(sym) => match sym.kind {
                SymbolKind::GlobalVar => self.global_value(sym, pos),
                _ => Err(self.serr(format!("`{name}` is not a variable"), pos)),
            },
        }
    }

    // ── Binary operators ───────────────────────────────────────────────

    fn evaluate_bin(
        &mut self,
        op: BinOp,
        lexpr: &'a Expr,
        rexpr: &'a Expr,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        let placeholder = self.types.placeholder;
        let mut lhs = self.evaluate_operand(lexpr, placeholder)?;
        let mut rhs = self.evaluate_operand(rexpr, placeholder)?;

        // A constant without an explicit type adopts the other operand's.
        let l_coer = lhs.coercable();
        let r_coer = rhs.coercable();
        if l_coer {
            lhs.ty = rhs.ty;
            lhs.coerced = true;
        }
        if r_coer {
            rhs.ty = lhs.ty;
            rhs.coerced = true;
        }

        if lhs.is_comptime() && rhs.is_comptime() {
            return self.fold_bin_node(op, &lhs, &rhs, l_coer && r_coer, lexpr, rexpr, pos);
        }

        if matches!(op, BinOp::Eq | BinOp::Ne) {
            self.expect_numeric_or_ptr(&lhs, lexpr.pos)?;
            self.expect_numeric_or_ptr(&rhs, rexpr.pos)?;
        } else {
            self.expect_numeric(&lhs, lexpr.pos)?;
            self.expect_numeric(&rhs, rexpr.pos)?;
        }

        self.expect_compatible(lhs.ty, rhs.ty, pos)?;

        let result_ty = if op.is_comparison() {
            self.ctx_if_int_or(self.types.u8())
        } else {
            lhs.ty
        };

        let v = self.emit_bin(op, &lhs, &rhs, result_ty)?;
        Ok(RealData::runtime(result_ty, v))
    }

    fn fold_bin_node(
        &mut self,
        op: BinOp,
        lhs: &RealData<'ctx>,
        rhs: &RealData<'ctx>,
        both_untyped: bool,
        lexpr: &'a Expr,
        rexpr: &'a Expr,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        let lv = lhs.value.as_ref().expect("comptime operand");
        let rv = rhs.value.as_ref().expect("comptime operand");

        if both_untyped {
            if !lv.is_numeric() {
                return Err(self.serr("expected comptime value to have numeric type", lexpr.pos));
            }
            if !rv.is_numeric() {
                return Err(self.serr("expected comptime value to have numeric type", rexpr.pos));
            }
        } else {
            self.expect_numeric(lhs, lexpr.pos)?;
            self.expect_numeric(rhs, rexpr.pos)?;
            self.expect_compatible(lhs.ty, rhs.ty, pos)?;
        }

        let folded = fold_bin_values(op, lv, rv).ok_or_else(|| {
            self.serr("division by zero in comptime expression", pos)
        })?;

        let ctx = self.ctx();
        let ty = if op.is_comparison() {
            self.ctx_if_int_or(self.types.u8())
        } else if self.types.is_numeric(ctx) {
            ctx
        } else {
            self.types.placeholder
        };

        if matches!(folded, CtValue::Float(_)) && self.types.is_int(ty) {
            return Err(self.serr("unable to coerce float constant expression to int type", pos));
        }

        Ok(RealData::comptime(ty, folded))
    }

    fn emit_bin(
        &mut self,
        op: BinOp,
        lhs: &RealData<'ctx>,
        rhs: &RealData<'ctx>,
        result_ty: TypeId,
    ) -> Result<BasicValueEnum<'ctx>> {
        let lv = self.rd_value(lhs)?;
        let rv = self.rd_value(rhs)?;
        let b = self.cur_builder();

        if self.types.is_float(lhs.ty) {
            let (x, y) = (lv.into_float_value(), rv.into_float_value());
            let v: BasicValueEnum<'ctx> = match op {
                BinOp::Add => b.build_float_add(x, y, "fadd").map_err(llerr)?.into(),
                BinOp::Sub => b.build_float_sub(x, y, "fsub").map_err(llerr)?.into(),
                BinOp::Mul => b.build_float_mul(x, y, "fmul").map_err(llerr)?.into(),
                BinOp::Div => b.build_float_div(x, y, "fdiv").map_err(llerr)?.into(),
                BinOp::Rem => b.build_float_rem(x, y, "frem").map_err(llerr)?.into(),
                cmp => {
                    let pred = match cmp {
                        BinOp::Eq => FloatPredicate::OEQ,
                        BinOp::Ne => FloatPredicate::ONE,
                        BinOp::Lt => FloatPredicate::OLT,
                        BinOp::Gt => FloatPredicate::OGT,
                        BinOp::Le => FloatPredicate::OLE,
                        BinOp::Ge => FloatPredicate::OGE,
                        op => unreachable!("non-binary float op {op:?}"),
                    };
                    let cmp = b.build_float_compare(pred, x, y, "fcmp").map_err(llerr)?;
                    return self.zext_cmp(cmp, result_ty);
                }
            };
            return Ok(v);
        }

        if self.types.is_ptr(lhs.ty) {
            // Only `==` and `!=` reach here.
            let i64_ty = self.context.i64_type();
            let x = b
                .build_ptr_to_int(lv.into_pointer_value(), i64_ty, "lp")
                .map_err(llerr)?;
            let y = b
                .build_ptr_to_int(rv.into_pointer_value(), i64_ty, "rp")
                .map_err(llerr)?;
            let pred = if op == BinOp::Eq { IntPredicate::EQ } else { IntPredicate::NE };
            let cmp = b.build_int_compare(pred, x, y, "pcmp").map_err(llerr)?;
            return self.zext_cmp(cmp, result_ty);
        }

        let (x, y) = (lv.into_int_value(), rv.into_int_value());
        let signed = self.types.is_signed(lhs.ty);
        let v: BasicValueEnum<'ctx> = match op {
            BinOp::Add => b.build_int_add(x, y, "add").map_err(llerr)?.into(),
            BinOp::Sub => b.build_int_sub(x, y, "sub").map_err(llerr)?.into(),
            BinOp::Mul => b.build_int_mul(x, y, "mul").map_err(llerr)?.into(),
            BinOp::Div if signed => b.build_int_signed_div(x, y, "sdiv").map_err(llerr)?.into(),
            BinOp::Div => b.build_int_unsigned_div(x, y, "udiv").map_err(llerr)?.into(),
            BinOp::Rem if signed => b.build_int_signed_rem(x, y, "srem").map_err(llerr)?.into(),
            BinOp::Rem => b.build_int_unsigned_rem(x, y, "urem").map_err(llerr)?.into(),
            cmp => {
                let pred = match (cmp, signed) {
                    (BinOp::Eq, _) => IntPredicate::EQ,
                    (BinOp::Ne, _) => IntPredicate::NE,
                    (BinOp::Lt, true) => IntPredicate::SLT,
                    (BinOp::Lt, false) => IntPredicate::ULT,
                    (BinOp::Gt, true) => IntPredicate::SGT,
                    (BinOp::Gt, false) => IntPredicate::UGT,
                    (BinOp::Le, true) => IntPredicate::SLE,
                    (BinOp::Le, false) => IntPredicate::ULE,
                    (BinOp::Ge, true) => IntPredicate::SGE,
                    (BinOp::Ge, false) => IntPredicate::UGE,
                    (op, _) => unreachable!("non-binary int op {op:?}"),
                };
                let cmp = b.build_int_compare(pred, x, y, "icmp").map_err(llerr)?;
                return self.zext_cmp(cmp, result_ty);
            }
        };
        Ok(v)
    }

    fn zext_cmp(&self, cmp: IntValue<'ctx>, result_ty: TypeId) -> Result<BasicValueEnum<'ctx>> {
        let int_ll = self.context.custom_width_int_type(self.types.bits(result_ty));
        Ok(self
            .cur_builder()
            .build_int_z_extend(cmp, int_ll, "cmp")
            .map_err(llerr)?
            .into())
    }

    /// Short-circuit `and`/`or` as a cbranch + phi diamond, with
    /// dead-branch elimination: a compile-time left operand never emits a
    /// branch or phi.
    fn evaluate_andor(
        &mut self,
        op: BinOp,
        lexpr: &'a Expr,
        rexpr: &'a Expr,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        let is_and = op == BinOp::And;
        let operand_ctx = self.ctx_if_int_or(self.types.u8());

        let mut lhs = self.evaluate_operand(lexpr, operand_ctx)?;

        if let Some(lv) = lhs.value.clone() {
            self.expect_int(&lhs, lexpr.pos)?;

            // `False and _` / `True or _`: the left constant decides.
            if is_and != lv.is_truthy() {
                let decided = if is_and { 0 } else { 1 };
                return Ok(RealData::comptime(lhs.ty, CtValue::Int(decided)));
            }

            // `True and x` / `False or x`: the result is the right operand.
            let mut rhs = self.evaluate_operand(rexpr, operand_ctx)?;
            if rhs.coercable() {
                rhs.ty = lhs.ty;
                rhs.coerced = true;
            } else if lhs.coercable() {
                lhs.ty = rhs.ty;
            }
            self.expect_int(&rhs, rexpr.pos)?;
            self.expect_compatible(lhs.ty, rhs.ty, pos)?;
            return Ok(rhs);
        }

        self.expect_int(&lhs, lexpr.pos)?;

        let llfn = self.cur_fn();
        let (rhs_name, merge_name) = if is_and {
            ("and_rhs", "and_merge")
        } else {
            ("or_rhs", "or_merge")
        };
        let rhs_bb = self.context.append_basic_block(llfn, rhs_name);
        let merge_bb = self.context.append_basic_block(llfn, merge_name);

        let init_bb = self.cur_block();
        let lv = self.rd_value(&lhs)?.into_int_value();
        let cond = self.to_i1(lv)?;
        if is_and {
            self.cur_builder()
                .build_conditional_branch(cond, rhs_bb, merge_bb)
                .map_err(llerr)?;
        } else {
            self.cur_builder()
                .build_conditional_branch(cond, merge_bb, rhs_bb)
                .map_err(llerr)?;
        }

        self.reposition(rhs_bb);
        let mut rhs = self.evaluate_operand(rexpr, operand_ctx)?;
        if rhs.coercable() {
            rhs.ty = lhs.ty;
            rhs.coerced = true;
        }
        self.expect_int(&rhs, rexpr.pos)?;
        self.expect_compatible(lhs.ty, rhs.ty, pos)?;

        let ty = lhs.ty;
        let rhs_tail = self.cur_block();
        self.cur_builder().build_unconditional_branch(merge_bb).map_err(llerr)?;

        if let Some(rv) = &rhs.value {
            // A constant right operand that forces the short-circuit value
            // makes both paths agree; no phi needed.
            if is_and != rv.is_truthy() {
                self.reposition(merge_bb);
                let decided = if is_and { 0 } else { 1 };
                return Ok(RealData::comptime(ty, CtValue::Int(decided)));
            }
        }

        self.reposition(merge_bb);
        let int_ll = self.context.custom_width_int_type(self.types.bits(ty));
        let phi = self
            .cur_builder()
            .build_phi(int_ll, if is_and { "and_result" } else { "or_result" })
            .map_err(llerr)?;

        let short_const: BasicValueEnum<'ctx> =
            int_ll.const_int(if is_and { 0 } else { 1 }, false).into();
        let rv = self.rd_value(&rhs)?;
        phi.add_incoming(&[(&short_const, init_bb), (&rv, rhs_tail)]);

        Ok(RealData::runtime(ty, phi.as_basic_value()))
    }

    // ── Unary operators ────────────────────────────────────────────────

    fn evaluate_ref(&mut self, inner: &'a Expr, is_mut: bool, pos: Pos) -> Result<RealData<'ctx>> {
        let ctx = self.ctx();
        let inner_ctx = if self.types.is_ptr(ctx) {
            self.types.elem_of(ctx)
        } else {
            self.types.placeholder
        };

        let rd = self.evaluate_node(inner, inner_ctx)?;

        let ptr = match self.consume_load(&rd) {
            Some((ptr, _)) => ptr,
            None => {
                if is_mut {
                    return Err(self.serr(
                        "temporary expression allocation address cannot be mutable",
                        pos,
                    ));
                }
                self.create_tmp_alloca(&rd)?
            }
        };

        let ty = self.types.alloc(RealType::Ptr { is_mut, target: rd.ty });
        Ok(RealData::runtime(ty, ptr.into()))
    }

    fn evaluate_deref(&mut self, inner: &'a Expr) -> Result<RealData<'ctx>> {
        let ptr_ctx = self.types.alloc(RealType::Ptr { is_mut: false, target: self.ctx() });
        let rd = self.evaluate_node(inner, ptr_ctx)?;
        self.expect_ptr(&rd, inner.pos)?;

        let pointee = self.types.elem_of(rd.ty);
        let is_mut = self.types.ptr_is_mut(rd.ty);
        let ptr = self.rd_value(&rd)?.into_pointer_value();
        let ll = llvm_type(self.context, &self.types, pointee);
        let v = self.cur_builder().build_load(ll, ptr, "deref").map_err(llerr)?;

        Ok(RealData {
            ty: pointee,
            llvm: Some(v),
            value: None,
            coerced: false,
            addr: value_as_instruction(v).map(|inst| LoadedFrom { inst, ptr, is_mut }),
        })
    }

    fn evaluate_not(&mut self, inner: &'a Expr) -> Result<RealData<'ctx>> {
        let rd = self.evaluate_node(inner, self.ctx_if_int_or(self.types.u8()))?;
        self.expect_int(&rd, inner.pos)?;

        if let Some(v) = &rd.value {
            let negated = if v.is_truthy() { 0 } else { 1 };
            return Ok(RealData::comptime(rd.ty, CtValue::Int(negated)));
        }

        let v = self.rd_value(&rd)?.into_int_value();
        let zero = v.get_type().const_zero();
        let cmp = self
            .cur_builder()
            .build_int_compare(IntPredicate::EQ, v, zero, "not")
            .map_err(llerr)?;
        let v = self.zext_cmp(cmp, rd.ty)?;
        Ok(RealData::runtime(rd.ty, v))
    }

    fn evaluate_neg_or_plus(&mut self, op: UnaryOp, inner: &'a Expr) -> Result<RealData<'ctx>> {
        let mut rd = self.evaluate_node(inner, self.ctx())?;
        self.expect_numeric(&rd, inner.pos)?;

        if op == UnaryOp::Plus {
            return Ok(rd);
        }

        if let Some(v) = rd.value.take() {
            let negated = match v {
                CtValue::Int(v) => CtValue::Int(v.wrapping_neg()),
                CtValue::Float(f) => CtValue::Float(-f),
                CtValue::Str(_) => unreachable!("numeric check rejected strings"),
            };
            rd.value = Some(negated);
            rd.llvm = None;
            return Ok(rd);
        }

        let v = self.rd_value(&rd)?;
        let negated: BasicValueEnum<'ctx> = if self.types.is_float(rd.ty) {
            self.cur_builder()
                .build_float_neg(v.into_float_value(), "fneg")
                .map_err(llerr)?
                .into()
        } else {
            self.cur_builder()
                .build_int_neg(v.into_int_value(), "neg")
                .map_err(llerr)?
                .into()
        };

        rd.llvm = Some(negated);
        rd.addr = None;
        Ok(rd)
    }

    // ── Casts ──────────────────────────────────────────────────────────

    fn evaluate_cast(
        &mut self,
        inner: &'a Expr,
        ty: &'a TypeExpr,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        let target = self.evaluate_type(ty)?;
        let mut rd = self.evaluate_node(inner, target)?;
        let source = rd.ty;

        if self.types.is_ptr(source) && self.types.is_ptr(target) {
            // Opaque pointers: a pointer cast is a retype.
            rd.ty = target;
            rd.addr = None;
        } else if self.types.is_numeric(source) && self.types.is_numeric(target) {
            self.make_numeric_cast(&mut rd, target)?;
        } else {
            return Err(self.serr(
                format!(
                    "invalid cast from `{}` to `{}`",
                    self.types.display(source),
                    self.types.display(target)
                ),
                pos,
            ));
        }

        if rd.is_comptime() {
            rd.coerced = true;
        }
        Ok(rd)
    }

    fn make_numeric_cast(&mut self, rd: &mut RealData<'ctx>, target: TypeId) -> Result<()> {
        if self.types.eq(rd.ty, target) {
            return Ok(());
        }

        if let Some(v) = rd.value.take() {
            let converted = if self.types.is_float(target) {
                CtValue::Float(match v {
                    CtValue::Int(i) => i as f64,
                    CtValue::Float(f) => f,
                    CtValue::Str(_) => unreachable!("numeric cast of a string"),
                })
            } else {
                CtValue::Int(match v {
                    CtValue::Int(i) => i,
                    CtValue::Float(f) => f as i128,
                    CtValue::Str(_) => unreachable!("numeric cast of a string"),
                })
            };
            rd.value = Some(converted);
            rd.ty = target;
            rd.llvm = None;
            return Ok(());
        }

        let source = rd.ty;
        let v = self.rd_value(rd)?;
        let target_ll = llvm_type(self.context, &self.types, target);
        let b = self.cur_builder();

        let source_bits = self.types.bits(source);
        let target_bits = self.types.bits(target);

        let casted: BasicValueEnum<'ctx> = match (self.types.is_float(source), self.types.is_float(target)) {
            (true, true) => {
                let x = v.into_float_value();
                let t = target_ll.into_float_type();
                if source_bits < target_bits {
                    b.build_float_ext(x, t, "fpext").map_err(llerr)?.into()
                } else {
                    b.build_float_trunc(x, t, "fptrunc").map_err(llerr)?.into()
                }
            }
            (true, false) => {
                let x = v.into_float_value();
                let t = target_ll.into_int_type();
                if self.types.is_signed(target) {
                    b.build_float_to_signed_int(x, t, "fptosi").map_err(llerr)?.into()
                } else {
                    b.build_float_to_unsigned_int(x, t, "fptoui").map_err(llerr)?.into()
                }
            }
            (false, true) => {
                let x = v.into_int_value();
                let t = target_ll.into_float_type();
                if self.types.is_signed(source) {
                    b.build_signed_int_to_float(x, t, "sitofp").map_err(llerr)?.into()
                } else {
                    b.build_unsigned_int_to_float(x, t, "uitofp").map_err(llerr)?.into()
                }
            }
            (false, false) => {
                let x = v.into_int_value();
                let t = target_ll.into_int_type();
                if source_bits == target_bits {
                    // Same width, different signedness: bitwise identity.
                    x.into()
                } else if source_bits < target_bits {
                    if self.types.is_signed(source) {
                        b.build_int_s_extend(x, t, "sext").map_err(llerr)?.into()
                    } else {
                        b.build_int_z_extend(x, t, "zext").map_err(llerr)?.into()
                    }
                } else {
                    b.build_int_truncate(x, t, "trunc").map_err(llerr)?.into()
                }
            }
        };

        rd.ty = target;
        rd.llvm = Some(casted);
        rd.addr = None;
        Ok(())
    }

    // ── Conditions and inline if ───────────────────────────────────────

    pub(crate) fn evaluate_condition(&mut self, cond: &'a Expr) -> Result<RealData<'ctx>> {
        let rd = self.evaluate_node(cond, self.types.u8())?;
        self.expect_int(&rd, cond.pos)?;
        Ok(rd)
    }

    fn evaluate_inline_if(
        &mut self,
        then_expr: &'a Expr,
        cond: &'a Expr,
        else_expr: &'a Expr,
    ) -> Result<RealData<'ctx>> {
        let cond_rd = self.evaluate_condition(cond)?;

        if let Some(v) = &cond_rd.value {
            let chosen = if v.is_truthy() { then_expr } else { else_expr };
            return self.evaluate_node(chosen, self.ctx());
        }

        let llfn = self.cur_fn();
        let then_bb = self.context.append_basic_block(llfn, "inline_if_branch_block");
        let else_bb = self.context.append_basic_block(llfn, "inline_else_branch_block");
        let exit_bb = self.context.append_basic_block(llfn, "exit_block");

        let cv = self.rd_value(&cond_rd)?.into_int_value();
        let cond_i1 = self.to_i1(cv)?;
        self.cur_builder()
            .build_conditional_branch(cond_i1, then_bb, else_bb)
            .map_err(llerr)?;

        self.push_builder(then_bb);
        let then_rd = self.evaluate_node(then_expr, self.ctx());
        let then_rd = match then_rd {
            Ok(rd) => rd,
            Err(e) => {
                self.pop_builder();
                return Err(e);
            }
        };
        let then_tail = self.cur_block();
        self.cur_builder().build_unconditional_branch(exit_bb).map_err(llerr)?;
        self.pop_builder();

        let ty = then_rd.ty;

        self.push_builder(else_bb);
        let else_rd = self.evaluate_node(else_expr, ty);
        let else_rd = match else_rd {
            Ok(rd) => rd,
            Err(e) => {
                self.pop_builder();
                return Err(e);
            }
        };
        let else_tail = self.cur_block();
        self.cur_builder().build_unconditional_branch(exit_bb).map_err(llerr)?;
        self.pop_builder();

        self.expect_compatible(ty, else_rd.ty, else_expr.pos)?;

        self.reposition(exit_bb);
        let ll = llvm_type(self.context, &self.types, ty);
        let phi = self.cur_builder().build_phi(ll, "inline_if_result").map_err(llerr)?;
        let tv = self.rd_value(&then_rd)?;
        let ev = self.rd_value(&else_rd)?;
        phi.add_incoming(&[(&tv, then_tail), (&ev, else_tail)]);

        Ok(RealData::runtime(ty, phi.as_basic_value()))
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn evaluate_call(&mut self, call: &'a CallExpr, pos: Pos) -> Result<RealData<'ctx>> {
        if call.internal {
            return self.evaluate_internal_call(call, pos);
        }

        let sym = match self.get_symbol(&call.name.name, call.name.pos)? {
            Resolved::Global(sym) if sym.kind == SymbolKind::Fn => sym,
            _ => {
                return Err(
                    self.serr(format!("`{}` is not a function", call.name.name), call.name.pos)
                );
            }
        };

        let decl = self.fn_decl_of(sym);
        if call.generics.len() != decl.generics.len() {
            return Err(self.serr(
                format!(
                    "expected `{}` generic args, got `{}`",
                    decl.generics.len(),
                    call.generics.len()
                ),
                pos,
            ));
        }
        if call.args.len() != decl.args.len() {
            return Err(self.serr(
                format!("expected `{}` args, got `{}`", decl.args.len(), call.args.len()),
                pos,
            ));
        }

        if self.comptime_only > 0 {
            return Err(self.serr("expected comptime expression", pos));
        }

        let (proto, llfn) = if call.generics.is_empty() {
            self.gen_nongeneric_fn(sym)?
        } else {
            let mut generics = Vec::with_capacity(call.generics.len());
            for arg in &call.generics {
                generics.push(self.evaluate_type(arg)?);
            }
            self.gen_generic_fn(sym, generics)?
        };

        let mut llvm_args: Vec<BasicMetadataValueEnum<'ctx>> =
            Vec::with_capacity(call.args.len());
        for (arg, &expected) in call.args.iter().zip(&proto.args) {
            let (rd, arg_pos) = self.evaluate_call_arg(arg, expected)?;
            self.expect_realtype(expected, rd.ty, arg_pos)?;
            llvm_args.push(self.rd_value(&rd)?.into());
        }

        let site = self
            .cur_builder()
            .build_call(llfn, &llvm_args, "")
            .map_err(llerr)?;

        match site.try_as_basic_value().basic() {
            Some(v) => Ok(RealData::runtime(proto.ret, v)),
            None => Ok(RealData::void(proto.ret)),
        }
    }

    pub(crate) fn evaluate_call_arg(
        &mut self,
        arg: &'a CallArg,
        ctx: TypeId,
    ) -> Result<(RealData<'ctx>, Pos)> {
        match arg {
            CallArg::Expr(e) => Ok((self.evaluate_node(e, ctx)?, e.pos)),
            CallArg::Out { name, ty, pos } => Ok((self.evaluate_out_param(name, ty)?, *pos)),
        }
    }

    /// `out name: T`: declare the variable with an undef initialiser and
    /// pass its address as a mutable pointer.
    fn evaluate_out_param(&mut self, name: &'a Ident, ty: &'a TypeExpr) -> Result<RealData<'ctx>> {
        let ty = self.evaluate_type(ty)?;
        if self.comptime_only > 0 {
            return Err(self.serr("expected comptime expression", name.pos));
        }

        let alloca = self.build_entry_alloca(ty, &name.name)?;
        let undef = undef_of(llvm_type(self.context, &self.types, ty));
        self.cur_builder().build_store(alloca, undef).map_err(llerr)?;

        self.declare_local(
            &name.name,
            LocalSym::Var { is_comptime: false, ty, ptr: Some(alloca), value: None },
            name.pos,
        )?;

        let ptr_ty = self.types.alloc(RealType::Ptr { is_mut: true, target: ty });
        Ok(RealData::runtime(ptr_ty, alloca.into()))
    }

    // ── Aggregates ─────────────────────────────────────────────────────

    fn evaluate_dot(
        &mut self,
        base_expr: &'a Expr,
        field: &Ident,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        let base = self.evaluate_node(base_expr, self.types.placeholder)?;

        let fields = match self.types.get(base.ty) {
            RealType::Struct { fields } | RealType::Union { fields } => fields.clone(),
            _ => {
                return Err(self.serr(
                    format!("expected struct expression, got `{}`", self.types.display(base.ty)),
                    pos,
                ));
            }
        };

        let Some(index) = fields.iter().position(|(name, _)| name == &field.name) else {
            return Err(self.serr(
                format!(
                    "struct `{}` has no field `{}`",
                    self.types.display(base.ty),
                    field.name
                ),
                pos,
            ));
        };
        let field_ty = fields[index].1;
        let is_union = self.types.is_union(base.ty);
        let field_ll = llvm_type(self.context, &self.types, field_ty);

        if let Some((ptr, is_mut)) = self.consume_load(&base) {
            // The aggregate lives in memory: project the field address and
            // reload just the field.
            let field_ptr = if is_union {
                ptr
            } else {
                let base_ll = llvm_type(self.context, &self.types, base.ty).into_struct_type();
                self.cur_builder()
                    .build_struct_gep(base_ll, ptr, index as u32, &field.name)
                    .map_err(llerr)?
            };

            let v = self
                .cur_builder()
                .build_load(field_ll, field_ptr, &field.name)
                .map_err(llerr)?;

            return Ok(RealData {
                ty: field_ty,
                llvm: Some(v),
                value: None,
                coerced: false,
                addr: value_as_instruction(v)
                    .map(|inst| LoadedFrom { inst, ptr: field_ptr, is_mut }),
            });
        }

        if is_union {
            // In-register union value: spill and reinterpret.
            let tmp = self.create_tmp_alloca(&base)?;
            let v = self
                .cur_builder()
                .build_load(field_ll, tmp, &field.name)
                .map_err(llerr)?;
            return Ok(RealData::runtime(field_ty, v));
        }

        let agg = self.rd_value(&base)?.into_struct_value();
        let v = self
            .cur_builder()
            .build_extract_value(agg, index as u32, &field.name)
            .map_err(llerr)?;
        Ok(RealData::runtime(field_ty, v))
    }

    fn evaluate_index(&mut self, base_expr: &'a Expr, index_expr: &'a Expr) -> Result<RealData<'ctx>> {
        let base = self.evaluate_node(base_expr, self.types.placeholder)?;
        self.internal_evaluate_index(base, base_expr.pos, index_expr)
    }

    pub(crate) fn internal_evaluate_index(
        &mut self,
        base: RealData<'ctx>,
        base_pos: Pos,
        index_expr: &'a Expr,
    ) -> Result<RealData<'ctx>> {
        let index = self.evaluate_node(index_expr, self.types.u64())?;

        if !self.types.is_indexable(base.ty) {
            return Err(self.serr(
                format!("expected indexable expression, got `{}`", self.types.display(base.ty)),
                base_pos,
            ));
        }
        self.expect_int(&index, index_expr.pos)?;

        let elem = self.types.elem_of(base.ty);
        let elem_ll = llvm_type(self.context, &self.types, elem);
        let idx = self.rd_value(&index)?.into_int_value();

        let (gep, is_mut) = if self.types.is_static_array(base.ty) {
            let (ptr, is_mut) = match self.consume_load(&base) {
                Some(loaded) => loaded,
                None => (self.create_tmp_alloca(&base)?, true),
            };
            let base_ll = llvm_type(self.context, &self.types, base.ty);
            let zero = self.context.i64_type().const_zero();
            let gep = unsafe {
                self.cur_builder()
                    .build_gep(base_ll, ptr, &[zero, idx], "index")
                    .map_err(llerr)?
            };
            (gep, is_mut)
        } else {
            let ptr = self.rd_value(&base)?.into_pointer_value();
            let is_mut = self.types.ptr_is_mut(base.ty);
            let gep = unsafe {
                self.cur_builder()
                    .build_gep(elem_ll, ptr, &[idx], "index")
                    .map_err(llerr)?
            };
            (gep, is_mut)
        };

        let v = self.cur_builder().build_load(elem_ll, gep, "elem").map_err(llerr)?;
        Ok(RealData {
            ty: elem,
            llvm: Some(v),
            value: None,
            coerced: false,
            addr: value_as_instruction(v).map(|inst| LoadedFrom { inst, ptr: gep, is_mut }),
        })
    }

    fn evaluate_array_init(&mut self, items: &'a [Expr]) -> Result<RealData<'ctx>> {
        let ctx = self.ctx();

        if self.types.is_vector(ctx) {
            return self.evaluate_vector_init(items, ctx);
        }

        let first_ctx = if self.types.is_static_array(ctx) || self.types.is_ptr(ctx) {
            self.types.elem_of(ctx)
        } else {
            ctx
        };

        let mut values = Vec::with_capacity(items.len());
        let mut elem_ty = first_ctx;
        for (i, item) in items.iter().enumerate() {
            let item_ctx = if i == 0 { first_ctx } else { elem_ty };
            let rd = self.evaluate_node(item, item_ctx)?;
            if i == 0 {
                elem_ty = rd.ty;
            } else {
                self.expect_realtype(elem_ty, rd.ty, item.pos)?;
            }
            values.push(self.rd_value(&rd)?);
        }

        let ty = self.types.alloc(RealType::StaticArray { len: items.len() as u64, elem: elem_ty });
        let array_ll = llvm_type(self.context, &self.types, ty).into_array_type();
        let mut agg: BasicValueEnum<'ctx> = array_ll.get_undef().into();

        for (i, value) in values.into_iter().enumerate() {
            let inserted = self
                .cur_builder()
                .build_insert_value(agg.into_array_value(), value, i as u32, "array")
                .map_err(llerr)?;
            agg = inserted.into_array_value().into();
        }

        Ok(RealData::runtime(ty, agg))
    }

    fn evaluate_vector_init(&mut self, items: &'a [Expr], ctx: TypeId) -> Result<RealData<'ctx>> {
        let elem_ctx = self.types.elem_of(ctx);

        let mut values = Vec::with_capacity(items.len());
        let mut elem_ty = elem_ctx;
        for (i, item) in items.iter().enumerate() {
            let rd = self.evaluate_node(item, if i == 0 { elem_ctx } else { elem_ty })?;
            if i == 0 {
                elem_ty = rd.ty;
            } else {
                self.expect_realtype(elem_ty, rd.ty, item.pos)?;
            }
            values.push(self.rd_value(&rd)?);
        }

        let ty = self
            .types
            .alloc(RealType::StaticVector { len: items.len() as u64, elem: elem_ty });
        let vec_ll = llvm_type(self.context, &self.types, ty).into_vector_type();
        let mut vector = vec_ll.get_undef();

        for (i, value) in values.into_iter().enumerate() {
            let idx = self.context.i64_type().const_int(i as u64, false);
            vector = self
                .cur_builder()
                .build_insert_element(vector, value, idx, "vector")
                .map_err(llerr)?;
        }

        Ok(RealData::runtime(ty, vector.into()))
    }

    fn evaluate_struct_init(&mut self, inits: &'a [FieldInit]) -> Result<RealData<'ctx>> {
        for (i, field) in inits.iter().enumerate() {
            if inits[..i].iter().any(|other| other.name.name == field.name.name) {
                return Err(self.serr(
                    format!("duplicate field `{}`", field.name.name),
                    field.name.pos,
                ));
            }
        }

        let ctx = self.ctx();
        let ctx_fields: Vec<TypeId> = if self.types.is_struct(ctx) {
            self.types.struct_fields(ctx).iter().map(|(_, ty)| *ty).collect()
        } else {
            Vec::new()
        };

        let mut fields = Vec::with_capacity(inits.len());
        let mut values = Vec::with_capacity(inits.len());
        for (i, init) in inits.iter().enumerate() {
            let field_ctx = ctx_fields.get(i).copied().unwrap_or(self.types.placeholder);
            let rd = self.evaluate_node(&init.value, field_ctx)?;
            fields.push((init.name.name.clone(), rd.ty));
            values.push(self.rd_value(&rd)?);
        }

        let ty = self.types.alloc(RealType::Struct { fields });
        let struct_ll = llvm_type(self.context, &self.types, ty).into_struct_type();
        let mut agg: BasicValueEnum<'ctx> = struct_ll.get_undef().into();

        for (i, value) in values.into_iter().enumerate() {
            let inserted = self
                .cur_builder()
                .build_insert_value(agg.into_struct_value(), value, i as u32, "struct")
                .map_err(llerr)?;
            agg = inserted.into_struct_value().into();
        }

        Ok(RealData::runtime(ty, agg))
    }

    fn evaluate_union_init(&mut self, init: &'a FieldInit, pos: Pos) -> Result<RealData<'ctx>> {
        let ctx = self.ctx();
        if !self.types.is_union(ctx) {
            return Err(self.serr("cannot infer union type here", pos));
        }

        let field_ty = self
            .types
            .struct_fields(ctx)
            .iter()
            .find(|(name, _)| name == &init.name.name)
            .map(|(_, ty)| *ty);
        let Some(field_ty) = field_ty else {
            return Err(self.serr(
                format!(
                    "union `{}` has no field `{}`",
                    self.types.display(ctx),
                    init.name.name
                ),
                init.name.pos,
            ));
        };

        let rd = self.evaluate_node(&init.value, field_ty)?;
        self.expect_realtype(field_ty, rd.ty, init.value.pos)?;

        // Write the field through a stack slot and read the whole overlay
        // back as the union value.
        let union_ll = llvm_type(self.context, &self.types, ctx);
        let tmp = self.build_entry_alloca(ctx, "union")?;
        let value = self.rd_value(&rd)?;
        self.cur_builder().build_store(tmp, value).map_err(llerr)?;
        let v = self.cur_builder().build_load(union_ll, tmp, "union").map_err(llerr)?;

        Ok(RealData::runtime(ctx, v))
    }
}

/// Fold a binary operation over two compile-time values. `None` signals a
/// division by zero.
fn fold_bin_values(op: BinOp, l: &CtValue, r: &CtValue) -> Option<CtValue> {
    let float_mode = matches!(l, CtValue::Float(_)) || matches!(r, CtValue::Float(_));

    if float_mode {
        let a = ct_as_f64(l);
        let b = ct_as_f64(r);
        let v = match op {
            BinOp::Add => CtValue::Float(a + b),
            BinOp::Sub => CtValue::Float(a - b),
            BinOp::Mul => CtValue::Float(a * b),
            BinOp::Div => CtValue::Float(a / b),
            BinOp::Rem => CtValue::Float(a % b),
            BinOp::Eq => CtValue::Int((a == b) as i128),
            BinOp::Ne => CtValue::Int((a != b) as i128),
            BinOp::Lt => CtValue::Int((a < b) as i128),
            BinOp::Gt => CtValue::Int((a > b) as i128),
            BinOp::Le => CtValue::Int((a <= b) as i128),
            BinOp::Ge => CtValue::Int((a >= b) as i128),
            BinOp::And | BinOp::Or => unreachable!("short-circuit ops fold elsewhere"),
        };
        return Some(v);
    }

    let a = ct_as_i128(l);
    let b = ct_as_i128(r);
    let v = match op {
        BinOp::Add => CtValue::Int(a.wrapping_add(b)),
        BinOp::Sub => CtValue::Int(a.wrapping_sub(b)),
        BinOp::Mul => CtValue::Int(a.wrapping_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            CtValue::Int(a.wrapping_div(b))
        }
        BinOp::Rem => {
            if b == 0 {
                return None;
            }
            CtValue::Int(a.wrapping_rem(b))
        }
        BinOp::Eq => CtValue::Int((a == b) as i128),
        BinOp::Ne => CtValue::Int((a != b) as i128),
        BinOp::Lt => CtValue::Int((a < b) as i128),
        BinOp::Gt => CtValue::Int((a > b) as i128),
        BinOp::Le => CtValue::Int((a <= b) as i128),
        BinOp::Ge => CtValue::Int((a >= b) as i128),
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops fold elsewhere"),
    };
    Some(v)
}

fn ct_as_f64(v: &CtValue) -> f64 {
    match v {
        CtValue::Int(i) => *i as f64,
        CtValue::Float(f) => *f,
        CtValue::Str(_) => unreachable!("numeric fold of a string"),
    }
}

fn ct_as_i128(v: &CtValue) -> i128 {
    match v {
        CtValue::Int(i) => *i,
        CtValue::Float(f) => *f as i128,
        CtValue::Str(_) => unreachable!("numeric fold of a string"),
    }
}
