//! Statement lowering to the basic-block CFG.
//!
//! Every compound statement pre-allocates its blocks (bodies, per-elif
//! condition checks, a single exit), lowers conditions in their check
//! blocks, and resumes at the exit block. Constant conditions elide the
//! conditional branch; the untaken side is lowered anyway and pruned with
//! the other dead blocks when the function is finalised.

use inkwell::basic_block::BasicBlock;
use inkwell::values::{BasicValueEnum, IntValue, PointerValue};
use inkwell::{FloatPredicate, IntPredicate};

use brim_common::error::Result;
use brim_common::span::Pos;
use brim_parser::ast::{
    AssignOp, AssignTarget, CaseBranch, Expr, ExprKind, Ident, IfStmt, Stmt, StmtKind, TypeExpr,
    UnaryOp, VarDecl,
};

use crate::codegen::types::llvm_type;
use crate::codegen::{llerr, var_is_comptime, Codegen, LocalSym, LoopFrame, RealData};
use crate::rt::TypeId;

struct LValue<'ctx> {
    ptr: PointerValue<'ctx>,
    pointee: TypeId,
    is_mut: bool,
}

impl<'a, 'ctx> Codegen<'a, 'ctx> {
    pub(crate) fn evaluate_stmt(&mut self, stmt: &'a Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Pass => Ok(()),
            StmtKind::If(if_stmt) => self.evaluate_if(if_stmt),
            StmtKind::Return(expr) => self.evaluate_return(expr.as_ref(), stmt.pos),
            StmtKind::While { cond, body } => self.evaluate_while(cond, body),
            StmtKind::For { init, cond, step, body } => {
                self.evaluate_for(init.as_deref(), cond, step.as_deref(), body)
            }
            StmtKind::Break => self.evaluate_break(stmt.pos),
            StmtKind::Continue => self.evaluate_continue(stmt.pos),
            StmtKind::Try { var, expr, body } => {
                self.evaluate_try(var.as_ref(), expr, body.as_deref(), stmt.pos)
            }
            StmtKind::Defer { body, .. } => {
                self.push_defer(body);
                Ok(())
            }
            StmtKind::Match { scrutinee, cases, else_body } => {
                self.evaluate_match(scrutinee, cases, else_body.as_deref())
            }
            StmtKind::VarDecl(decl) => self.evaluate_var_decl(decl),
            StmtKind::Assign { target, op, value } => {
                self.evaluate_assign(target, *op, value, stmt.pos)
            }
            StmtKind::Expr(expr) => {
                let rd = self.evaluate_stmt_expr(expr)?;
                if !self.types.is_void(rd.ty) {
                    return Err(self.serr(
                        format!(
                            "undiscarded expression of type `{}` as statement",
                            self.types.display(rd.ty)
                        ),
                        expr.pos,
                    ));
                }
                Ok(())
            }
        }
    }

    // ── Branch plumbing ────────────────────────────────────────────────

    /// Branch on a condition; a compile-time condition becomes an
    /// unconditional branch to the taken side.
    fn branch_on(
        &mut self,
        cond: RealData<'ctx>,
        then_bb: BasicBlock<'ctx>,
        else_bb: BasicBlock<'ctx>,
    ) -> Result<()> {
        if let Some(v) = &cond.value {
            let target = if v.is_truthy() { then_bb } else { else_bb };
            self.cur_builder().build_unconditional_branch(target).map_err(llerr)?;
            return Ok(());
        }

        let cv = self.rd_value(&cond)?.into_int_value();
        let cond_i1 = self.to_i1(cv)?;
        self.cur_builder()
            .build_conditional_branch(cond_i1, then_bb, else_bb)
            .map_err(llerr)?;
        Ok(())
    }

    /// Lower a branch body in its own block and lexical sub-scope; a
    /// non-terminated body runs its defers and falls through to `exit_bb`.
    fn lower_branch_body(
        &mut self,
        bb: BasicBlock<'ctx>,
        body: &'a [Stmt],
        exit_bb: BasicBlock<'ctx>,
    ) -> Result<()> {
        self.push_builder(bb);
        self.push_sub_scope();

        let result: Result<()> = (|| {
            let has_term = self.evaluate_block(body)?;
            if !has_term {
                self.run_defers_top()?;
                self.cur_builder().build_unconditional_branch(exit_bb).map_err(llerr)?;
            }
            Ok(())
        })();

        self.pop_scope();
        self.pop_builder();
        result
    }

    // ── if / elif / else ───────────────────────────────────────────────

    fn evaluate_if(&mut self, if_stmt: &'a IfStmt) -> Result<()> {
        let llfn = self.cur_fn();
        let has_else = if_stmt.else_body.is_some();

        let if_bb = self.context.append_basic_block(llfn, "if_branch_block");
        let elif_checks: Vec<BasicBlock<'ctx>> = if_stmt
            .elif_branches
            .iter()
            .map(|_| self.context.append_basic_block(llfn, "elif_condchecker"))
            .collect();
        let elif_bodies: Vec<BasicBlock<'ctx>> = if_stmt
            .elif_branches
            .iter()
            .map(|_| self.context.append_basic_block(llfn, "elif_branch_block"))
            .collect();
        let else_bb = if has_else {
            Some(self.context.append_basic_block(llfn, "else_branch_block"))
        } else {
            None
        };
        let exit_bb = self.context.append_basic_block(llfn, "exit_block");

        let cond = self.evaluate_condition(&if_stmt.if_branch.cond)?;
        let false_br = elif_checks.first().copied().or(else_bb).unwrap_or(exit_bb);
        self.branch_on(cond, if_bb, false_br)?;

        self.lower_branch_body(if_bb, &if_stmt.if_branch.body, exit_bb)?;

        for (i, elif) in if_stmt.elif_branches.iter().enumerate() {
            self.push_builder(elif_checks[i]);
            let checked = self.evaluate_condition(&elif.cond).and_then(|cond| {
                let false_br = elif_checks.get(i + 1).copied().or(else_bb).unwrap_or(exit_bb);
                self.branch_on(cond, elif_bodies[i], false_br)
            });
            self.pop_builder();
            checked?;

            self.lower_branch_body(elif_bodies[i], &elif.body, exit_bb)?;
        }

        if let Some(else_body) = &if_stmt.else_body {
            let else_bb = else_bb.expect("else block allocated above");
            self.lower_branch_body(else_bb, else_body, exit_bb)?;
        }

        self.reposition(exit_bb);
        Ok(())
    }

    // ── Loops ──────────────────────────────────────────────────────────

    fn evaluate_while(&mut self, cond: &'a Expr, body: &'a [Stmt]) -> Result<()> {
        let llfn = self.cur_fn();
        let check_bb = self.context.append_basic_block(llfn, "condcheck_block");
        let loop_bb = self.context.append_basic_block(llfn, "loop_branch_block");
        let exit_bb = self.context.append_basic_block(llfn, "exit_branch_block");

        self.cur_builder().build_unconditional_branch(check_bb).map_err(llerr)?;
        self.reposition(check_bb);

        let cond = self.evaluate_condition(cond)?;
        self.branch_on(cond, loop_bb, exit_bb)?;

        self.push_builder(loop_bb);
        self.push_sub_scope();
        let scope_base = self.scope_depth() - 1;
        self.loops.push(LoopFrame { cont: check_bb, brk: exit_bb, scope_base });

        let result: Result<()> = (|| {
            let has_term = self.evaluate_block(body)?;
            if !has_term {
                self.run_defers_top()?;
                self.cur_builder().build_unconditional_branch(check_bb).map_err(llerr)?;
            }
            Ok(())
        })();

        self.loops.pop();
        self.pop_scope();
        self.pop_builder();
        result?;

        self.reposition(exit_bb);
        Ok(())
    }

    fn evaluate_for(
        &mut self,
        init: Option<&'a VarDecl>,
        cond: &'a Expr,
        step: Option<&'a Stmt>,
        body: &'a [Stmt],
    ) -> Result<()> {
        let llfn = self.cur_fn();
        let check_bb = self.context.append_basic_block(llfn, "condcheck_block");
        let loop_bb = self.context.append_basic_block(llfn, "loop_branch_block");
        let step_bb = self.context.append_basic_block(llfn, "inc_branch_block");
        let exit_bb = self.context.append_basic_block(llfn, "exit_branch_block");

        self.push_sub_scope();

        let result: Result<()> = (|| {
            if let Some(init) = init {
                self.evaluate_var_decl(init)?;
            }

            self.cur_builder().build_unconditional_branch(check_bb).map_err(llerr)?;
            self.reposition(check_bb);

            let cond = self.evaluate_condition(cond)?;
            self.branch_on(cond, loop_bb, exit_bb)?;

            self.push_builder(loop_bb);
            let scope_base = self.scope_depth() - 1;
            self.loops.push(LoopFrame { cont: step_bb, brk: exit_bb, scope_base });

            let body_result: Result<()> = (|| {
                let has_term = self.evaluate_block(body)?;
                if !has_term {
                    self.run_defers_top()?;
                    self.cur_builder().build_unconditional_branch(step_bb).map_err(llerr)?;
                }
                Ok(())
            })();

            self.loops.pop();
            self.pop_builder();
            body_result?;

            self.push_builder(step_bb);
            let step_result: Result<()> = (|| {
                if let Some(step) = step {
                    self.evaluate_stmt(step)?;
                }
                self.cur_builder().build_unconditional_branch(check_bb).map_err(llerr)?;
                Ok(())
            })();
            self.pop_builder();
            step_result
        })();

        self.pop_scope();
        result?;

        self.reposition(exit_bb);
        Ok(())
    }

    fn evaluate_break(&mut self, pos: Pos) -> Result<()> {
        let Some(frame) = self.loops.last() else {
            return Err(self.serr("use of `break` statement outside of loop body", pos));
        };
        let (target, scope_base) = (frame.brk, frame.scope_base);

        self.run_defer_frames(scope_base)?;
        self.cur_builder().build_unconditional_branch(target).map_err(llerr)?;
        Ok(())
    }

    fn evaluate_continue(&mut self, pos: Pos) -> Result<()> {
        let Some(frame) = self.loops.last() else {
            return Err(self.serr("use of `continue` statement outside of loop body", pos));
        };
        let (target, scope_base) = (frame.cont, frame.scope_base);

        self.run_defer_frames(scope_base)?;
        self.cur_builder().build_unconditional_branch(target).map_err(llerr)?;
        Ok(())
    }

    // ── return ─────────────────────────────────────────────────────────

    fn evaluate_return(&mut self, expr: Option<&'a Expr>, pos: Pos) -> Result<()> {
        if self.running_defers {
            return Err(self.serr("cannot return from a deferred statement", pos));
        }

        let ret_ty = self.cur_ret_type();

        match expr {
            None => {
                self.expect_realtype(ret_ty, self.types.void, pos)?;
                self.run_defer_frames(self.cur_fn_scope_base())?;
                self.cur_builder().build_return(None).map_err(llerr)?;
            }
            Some(expr) => {
                let rd = self.evaluate_node(expr, ret_ty)?;
                self.expect_realtype(ret_ty, rd.ty, expr.pos)?;
                // The return value is computed before the defers run.
                let v = self.rd_value(&rd)?;
                self.run_defer_frames(self.cur_fn_scope_base())?;
                self.cur_builder().build_return(Some(&v)).map_err(llerr)?;
            }
        }
        Ok(())
    }

    // ── try ────────────────────────────────────────────────────────────

    fn evaluate_try(
        &mut self,
        var: Option<&'a (Ident, TypeExpr)>,
        expr: &'a Expr,
        body: Option<&'a [Stmt]>,
        pos: Pos,
    ) -> Result<()> {
        if body.is_none() && self.running_defers {
            return Err(self.serr("cannot return from a deferred statement", pos));
        }

        let (name, ty, name_pos) = match var {
            Some((ident, ty_expr)) => {
                (ident.name.clone(), self.evaluate_type(ty_expr)?, ident.pos)
            }
            None => (self.internal_var_name(), self.cur_ret_type(), pos),
        };

        let rd = self.evaluate_node(expr, ty)?;
        self.expect_realtype(ty, rd.ty, expr.pos)?;

        let alloca = self.build_entry_alloca(ty, &name)?;
        let v = self.rd_value(&rd)?;
        self.cur_builder().build_store(alloca, v).map_err(llerr)?;
        self.declare_local(
            &name,
            LocalSym::Var { is_comptime: false, ty, ptr: Some(alloca), value: None },
            name_pos,
        )?;

        let ll = llvm_type(self.context, &self.types, ty);
        let loaded = self.cur_builder().build_load(ll, alloca, &name).map_err(llerr)?;
        let cond = self.build_is_nonzero(loaded, ty, expr.pos)?;

        let llfn = self.cur_fn();
        let body_bb = self.context.append_basic_block(llfn, "if_branch_block");
        let exit_bb = self.context.append_basic_block(llfn, "exit_block");
        self.cur_builder()
            .build_conditional_branch(cond, body_bb, exit_bb)
            .map_err(llerr)?;

        match body {
            Some(stmts) => self.lower_branch_body(body_bb, stmts, exit_bb)?,
            None => {
                // `try expr` propagates a non-zero value as an early return.
                self.push_builder(body_bb);
                let result: Result<()> = (|| {
                    self.run_defer_frames(self.cur_fn_scope_base())?;
                    self.cur_builder().build_return(Some(&loaded)).map_err(llerr)?;
                    Ok(())
                })();
                self.pop_builder();
                result?;
            }
        }

        self.reposition(exit_bb);
        Ok(())
    }

    /// `value != 0` as an `i1`, for `try` conditions.
    fn build_is_nonzero(
        &mut self,
        value: BasicValueEnum<'ctx>,
        ty: TypeId,
        pos: Pos,
    ) -> Result<IntValue<'ctx>> {
        let b = self.cur_builder();

        if self.types.is_int(ty) {
            let v = value.into_int_value();
            let zero = v.get_type().const_zero();
            return b.build_int_compare(IntPredicate::NE, v, zero, "try").map_err(llerr);
        }
        if self.types.is_ptr(ty) {
            let i64_ty = self.context.i64_type();
            let v = b
                .build_ptr_to_int(value.into_pointer_value(), i64_ty, "try_ptr")
                .map_err(llerr)?;
            let zero = i64_ty.const_zero();
            return b.build_int_compare(IntPredicate::NE, v, zero, "try").map_err(llerr);
        }
        if self.types.is_float(ty) {
            let v = value.into_float_value();
            let zero = v.get_type().const_zero();
            return b
                .build_float_compare(FloatPredicate::ONE, v, zero, "try")
                .map_err(llerr);
        }

        Err(self.serr(
            format!("expected numeric or ptr expression, got `{}`", self.types.display(ty)),
            pos,
        ))
    }

    // ── match ──────────────────────────────────────────────────────────

    fn evaluate_match(
        &mut self,
        scrutinee: &'a Expr,
        cases: &'a [CaseBranch],
        else_body: Option<&'a [Stmt]>,
    ) -> Result<()> {
        let scrut = self.evaluate_node(scrutinee, self.types.placeholder)?;
        self.expect_numeric_or_ptr(&scrut, scrutinee.pos)?;
        let scrut_v = self.rd_value(&scrut)?;

        let llfn = self.cur_fn();
        let check_bbs: Vec<BasicBlock<'ctx>> = cases
            .iter()
            .map(|_| self.context.append_basic_block(llfn, "case_condcheck"))
            .collect();
        let body_bbs: Vec<BasicBlock<'ctx>> = cases
            .iter()
            .map(|_| self.context.append_basic_block(llfn, "case_branch_block"))
            .collect();
        let else_bb = else_body
            .is_some()
            .then(|| self.context.append_basic_block(llfn, "else_branch_block"));
        let exit_bb = self.context.append_basic_block(llfn, "exit_block");

        self.cur_builder().build_unconditional_branch(check_bbs[0]).map_err(llerr)?;

        for (i, case) in cases.iter().enumerate() {
            self.reposition(check_bbs[i]);

            // `case a, b:` matches when the scrutinee equals any listed value.
            let mut cond: Option<IntValue<'ctx>> = None;
            for case_expr in &case.exprs {
                let rd = self.evaluate_node(case_expr, scrut.ty)?;
                self.expect_realtype(scrut.ty, rd.ty, case_expr.pos)?;
                let case_v = self.rd_value(&rd)?;
                let eq = self.build_values_eq(scrut_v, case_v, scrut.ty)?;
                cond = Some(match cond {
                    None => eq,
                    Some(prev) => self.cur_builder().build_or(prev, eq, "case_or").map_err(llerr)?,
                });
            }

            let false_br = check_bbs.get(i + 1).copied().or(else_bb).unwrap_or(exit_bb);
            let cond = cond.expect("a case has at least one expression");
            self.cur_builder()
                .build_conditional_branch(cond, body_bbs[i], false_br)
                .map_err(llerr)?;

            self.lower_branch_body(body_bbs[i], &case.body, exit_bb)?;
        }

        if let Some(else_body) = else_body {
            let else_bb = else_bb.expect("else block allocated above");
            self.lower_branch_body(else_bb, else_body, exit_bb)?;
        }

        self.reposition(exit_bb);
        Ok(())
    }

    /// Equality of two values of the same scalar type, as an `i1`.
    fn build_values_eq(
        &mut self,
        a: BasicValueEnum<'ctx>,
        b: BasicValueEnum<'ctx>,
        ty: TypeId,
    ) -> Result<IntValue<'ctx>> {
        let builder = self.cur_builder();

        if self.types.is_float(ty) {
            return builder
                .build_float_compare(
                    FloatPredicate::OEQ,
                    a.into_float_value(),
                    b.into_float_value(),
                    "case_eq",
                )
                .map_err(llerr);
        }
        if self.types.is_ptr(ty) {
            let i64_ty = self.context.i64_type();
            let pa = builder
                .build_ptr_to_int(a.into_pointer_value(), i64_ty, "case_lp")
                .map_err(llerr)?;
            let pb = builder
                .build_ptr_to_int(b.into_pointer_value(), i64_ty, "case_rp")
                .map_err(llerr)?;
            return builder
                .build_int_compare(IntPredicate::EQ, pa, pb, "case_eq")
                .map_err(llerr);
        }

        builder
            .build_int_compare(IntPredicate::EQ, a.into_int_value(), b.into_int_value(), "case_eq")
            .map_err(llerr)
    }

    // ── Declarations and assignment ────────────────────────────────────

    pub(crate) fn evaluate_var_decl(&mut self, decl: &'a VarDecl) -> Result<()> {
        let is_comptime = var_is_comptime(&decl.name.name);

        let ty = self.evaluate_type(&decl.ty)?;
        let rd = self.evaluate_node(&decl.init, ty)?;
        self.expect_realtype(ty, rd.ty, decl.init.pos)?;

        if is_comptime {
            self.expect_comptime(&rd, decl.init.pos)?;
            let mut stored = rd;
            stored.coerced = true;
            self.declare_local(
                &decl.name.name,
                LocalSym::Var { is_comptime: true, ty, ptr: None, value: Some(stored) },
                decl.name.pos,
            )?;
            return Ok(());
        }

        let alloca = self.build_entry_alloca(ty, &decl.name.name)?;
        let v = self.rd_value(&rd)?;
        self.cur_builder().build_store(alloca, v).map_err(llerr)?;

        self.declare_local(
            &decl.name.name,
            LocalSym::Var { is_comptime: false, ty, ptr: Some(alloca), value: None },
            decl.name.pos,
        )
    }

    fn evaluate_assign(
        &mut self,
        target: &'a AssignTarget,
        op: AssignOp,
        value: &'a Expr,
        pos: Pos,
    ) -> Result<()> {
        let lexpr = match target {
            AssignTarget::Discard => {
                if op != AssignOp::Assign {
                    return Err(self.serr("discard statement only accepts `=` as operator", pos));
                }
                self.evaluate_node(value, self.types.placeholder)?;
                return Ok(());
            }
            AssignTarget::Expr(lexpr) => lexpr,
        };

        let lvalue = self.evaluate_lvalue(lexpr)?;
        let rd = self.evaluate_node(value, lvalue.pointee)?;
        self.expect_realtype(lvalue.pointee, rd.ty, pos)?;

        if !lvalue.is_mut {
            return Err(self.serr("cannot write to unmutable pointer", pos));
        }

        let stored: BasicValueEnum<'ctx> = match op {
            AssignOp::Assign => self.rd_value(&rd)?,
            compound => {
                let pointee_ll = llvm_type(self.context, &self.types, lvalue.pointee);
                let current = self
                    .cur_builder()
                    .build_load(pointee_ll, lvalue.ptr, "compound")
                    .map_err(llerr)?;
                let operand = self.rd_value(&rd)?;
                self.build_compound(compound, current, operand, lvalue.pointee, pos)?
            }
        };

        self.cur_builder().build_store(lvalue.ptr, stored).map_err(llerr)?;
        Ok(())
    }

    fn build_compound(
        &mut self,
        op: AssignOp,
        current: BasicValueEnum<'ctx>,
        operand: BasicValueEnum<'ctx>,
        ty: TypeId,
        pos: Pos,
    ) -> Result<BasicValueEnum<'ctx>> {
        let b = self.cur_builder();

        if self.types.is_float(ty) {
            let (x, y) = (current.into_float_value(), operand.into_float_value());
            let v = match op {
                AssignOp::AddAssign => b.build_float_add(x, y, "fadd").map_err(llerr)?,
                AssignOp::SubAssign => b.build_float_sub(x, y, "fsub").map_err(llerr)?,
                AssignOp::MulAssign => b.build_float_mul(x, y, "fmul").map_err(llerr)?,
                AssignOp::Assign => unreachable!("plain assignment handled by the caller"),
            };
            return Ok(v.into());
        }

        if !self.types.is_int(ty) {
            return Err(self.serr(
                format!("expected numeric expression, got `{}`", self.types.display(ty)),
                pos,
            ));
        }

        let (x, y) = (current.into_int_value(), operand.into_int_value());
        let v = match op {
            AssignOp::AddAssign => b.build_int_add(x, y, "add").map_err(llerr)?,
            AssignOp::SubAssign => b.build_int_sub(x, y, "sub").map_err(llerr)?,
            AssignOp::MulAssign => b.build_int_mul(x, y, "mul").map_err(llerr)?,
            AssignOp::Assign => unreachable!("plain assignment handled by the caller"),
        };
        Ok(v.into())
    }

    /// Resolve an assignment target to an address. Identifiers, field
    /// accesses and index expressions give up the load they just emitted;
    /// a deref writes through the pointer value itself.
    fn evaluate_lvalue(&mut self, expr: &'a Expr) -> Result<LValue<'ctx>> {
        if let ExprKind::Unary { op: UnaryOp::Deref, expr: inner, .. } = &expr.kind {
            let rd = self.evaluate_node(inner, self.types.placeholder)?;
            self.expect_ptr(&rd, inner.pos)?;
            let pointee = self.types.elem_of(rd.ty);
            let is_mut = self.types.ptr_is_mut(rd.ty);
            let ptr = self.rd_value(&rd)?.into_pointer_value();
            return Ok(LValue { ptr, pointee, is_mut });
        }

        let rd = self.evaluate_node(expr, self.types.placeholder)?;
        match self.consume_load(&rd) {
            Some((ptr, is_mut)) => Ok(LValue { ptr, pointee: rd.ty, is_mut }),
            None => Err(self.serr("cannot assign a value to an expression", expr.pos)),
        }
    }
}
