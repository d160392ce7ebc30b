//! Internal calls: `name!(…)` builtins dispatched by name.
//!
//! `internal_call!`/`extern_call!` declare external functions with explicit
//! signatures, uniqued by `(name, argument types, return type)`;
//! `extern_call!` additionally records the library to link, resolved
//! against the calling module's directory.

use inkwell::module::Linkage;
use inkwell::values::BasicMetadataValueEnum;

use brim_common::error::Result;
use brim_common::paths;
use brim_common::span::Pos;
use brim_parser::ast::{CallArg, CallExpr, Expr, ExprKind};

use crate::codegen::types::llvm_fn_type;
use crate::codegen::{llerr, BuildMode, Codegen, CtValue, RealData};
use crate::rt::TypeId;

impl<'a, 'ctx> Codegen<'a, 'ctx> {
    pub(crate) fn evaluate_internal_call(
        &mut self,
        call: &'a CallExpr,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        match call.name.name.as_str() {
            "ptr2int" => self.internal_ptr2int(call, pos),
            "int2ptr" => self.internal_int2ptr(call, pos),
            "is_release_build" => self.internal_build_flag(call, pos, BuildMode::Release),
            "is_debug_build" => self.internal_build_flag(call, pos, BuildMode::Debug),
            "internal_call" => self.internal_lib_call(call, pos, true),
            "extern_call" => self.internal_lib_call(call, pos, false),
            "type_size" => self.internal_type_size(call, pos),
            name => Err(self.serr(format!("unknown internal function `{name}`"), call.name.pos)),
        }
    }

    fn expect_generics_count(&self, call: &CallExpr, count: usize, pos: Pos) -> Result<()> {
        if call.generics.len() == count {
            return Ok(());
        }
        Err(self.serr(format!("unexpected `{}` generic args", call.generics.len()), pos))
    }

    fn expect_args_count(&self, call: &CallExpr, count: usize, pos: Pos) -> Result<()> {
        if call.args.len() == count {
            return Ok(());
        }
        Err(self.serr(format!("unexpected `{}` args", call.args.len()), pos))
    }

    fn internal_ptr2int(&mut self, call: &'a CallExpr, pos: Pos) -> Result<RealData<'ctx>> {
        self.expect_generics_count(call, 1, pos)?;
        self.expect_args_count(call, 1, pos)?;

        let target = self.evaluate_type(&call.generics[0])?;
        if !self.types.is_int(target) {
            return Err(self.terr(
                format!("expected int generic type, got `{}`", self.types.display(target)),
                call.generics[0].pos,
            ));
        }

        let (rd, arg_pos) = self.evaluate_call_arg(&call.args[0], self.types.placeholder)?;
        self.expect_ptr(&rd, arg_pos)?;

        if self.comptime_only > 0 {
            return Err(self.serr("expected comptime expression", pos));
        }

        let int_ll = self.context.custom_width_int_type(self.types.bits(target));
        let ptr = self.rd_value(&rd)?.into_pointer_value();
        let v = self
            .cur_builder()
            .build_ptr_to_int(ptr, int_ll, "ptr2int")
            .map_err(llerr)?;
        Ok(RealData::runtime(target, v.into()))
    }

    fn internal_int2ptr(&mut self, call: &'a CallExpr, pos: Pos) -> Result<RealData<'ctx>> {
        self.expect_generics_count(call, 1, pos)?;
        self.expect_args_count(call, 1, pos)?;

        let target = self.evaluate_type(&call.generics[0])?;
        if !self.types.is_ptr(target) {
            return Err(self.terr(
                format!("expected ptr generic type, got `{}`", self.types.display(target)),
                call.generics[0].pos,
            ));
        }

        let (rd, arg_pos) = self.evaluate_call_arg(&call.args[0], self.types.u64())?;
        self.expect_int(&rd, arg_pos)?;

        if self.comptime_only > 0 {
            return Err(self.serr("expected comptime expression", pos));
        }

        let ptr_ll = self.context.ptr_type(inkwell::AddressSpace::default());
        let int = self.rd_value(&rd)?.into_int_value();
        let v = self
            .cur_builder()
            .build_int_to_ptr(int, ptr_ll, "int2ptr")
            .map_err(llerr)?;
        Ok(RealData::runtime(target, v.into()))
    }

    fn internal_build_flag(
        &mut self,
        call: &'a CallExpr,
        pos: Pos,
        wanted: BuildMode,
    ) -> Result<RealData<'ctx>> {
        self.expect_generics_count(call, 0, pos)?;
        self.expect_args_count(call, 0, pos)?;

        let set = (self.mode == wanted) as i128;
        let ty = self.ctx_if_numeric_or(self.types.u8());
        Ok(RealData::comptime(ty, CtValue::Int(set)))
    }

    fn internal_type_size(&mut self, call: &'a CallExpr, pos: Pos) -> Result<RealData<'ctx>> {
        self.expect_args_count(call, 0, pos)?;
        self.expect_generics_count(call, 1, pos)?;

        let ty = self.evaluate_type(&call.generics[0])?;
        let size = self.types.size_of(ty).ok_or_else(|| {
            self.terr(
                format!("cannot compute size of `{}`", self.types.display(ty)),
                call.generics[0].pos,
            )
        })?;

        let result_ty = self.ctx_if_numeric_or(self.types.u64());
        Ok(RealData::comptime(result_ty, CtValue::Int(size as i128)))
    }

    /// `internal_call!("name", args…)` / `extern_call!("lib", "name", args…)`
    /// with the explicit signature in the generic list: argument types
    /// first, return type last.
    fn internal_lib_call(
        &mut self,
        call: &'a CallExpr,
        pos: Pos,
        is_internal: bool,
    ) -> Result<RealData<'ctx>> {
        let leading = if is_internal { 1 } else { 2 };

        if call.generics.is_empty() {
            return Err(self.serr("unexpected `0` generic args", pos));
        }
        let expected_args = call.generics.len() - 1 + leading;
        if call.args.is_empty() || call.args.len() != expected_args {
            return Err(self.serr(format!("unexpected `{}` args", call.args.len()), pos));
        }

        let (arg_generics, ret_generic) = call.generics.split_at(call.generics.len() - 1);
        let ret = self.evaluate_type_allow_void(&ret_generic[0])?;
        let mut arg_tys = Vec::with_capacity(arg_generics.len());
        for generic in arg_generics {
            arg_tys.push(self.evaluate_type(generic)?);
        }

        let name = self.expect_literal_str(&call.args[leading - 1])?;

        if !is_internal {
            let lib = self.expect_literal_str(&call.args[0])?;
            let module_path = self.unit.module(self.cur_module).path.clone();
            self.libs.insert(paths::resolve_relative(&module_path, &lib));
        }

        let mut llvm_args: Vec<BasicMetadataValueEnum<'ctx>> =
            Vec::with_capacity(arg_tys.len());
        for (arg, &expected) in call.args[leading..].iter().zip(&arg_tys) {
            let (rd, arg_pos) = self.evaluate_call_arg(arg, expected)?;
            self.expect_realtype(expected, rd.ty, arg_pos)?;
            llvm_args.push(self.rd_value(&rd)?.into());
        }

        if self.comptime_only > 0 {
            return Err(self.serr("expected comptime expression", pos));
        }

        let llfn = self.declare_external_fn(&name, &arg_tys, ret);
        let site = self.cur_builder().build_call(llfn, &llvm_args, "").map_err(llerr)?;

        match site.try_as_basic_value().basic() {
            Some(v) => Ok(RealData::runtime(ret, v)),
            None => Ok(RealData::void(ret)),
        }
    }

    /// Declare (once per exact signature) an externally linked function.
    fn declare_external_fn(
        &mut self,
        name: &str,
        args: &[TypeId],
        ret: TypeId,
    ) -> inkwell::values::FunctionValue<'ctx> {
        let existing = self.extern_fns.iter().find(|(n, a, r, _)| {
            n == name && self.types.eq_slices(a, args) && self.types.eq(*r, ret)
        });
        if let Some((_, _, _, llfn)) = existing {
            return *llfn;
        }

        let fn_ty = llvm_fn_type(self.context, &self.types, args, ret);
        let llfn = self.module.add_function(name, fn_ty, Some(Linkage::External));
        self.extern_fns.push((name.to_string(), args.to_vec(), ret, llfn));
        llfn
    }

    fn expect_literal_str(&self, arg: &CallArg) -> Result<String> {
        match arg {
            CallArg::Expr(Expr { kind: ExprKind::Str(value), .. }) => Ok(value.clone()),
            CallArg::Expr(expr) => Err(self.serr(
                "expected literal string containing the internal function name",
                expr.pos,
            )),
            CallArg::Out { pos, .. } => Err(self.serr(
                "expected literal string containing the internal function name",
                *pos,
            )),
        }
    }
}
