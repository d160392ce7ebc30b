//! The Brim generator: typed IR emission over an LLVM module.
//!
//! One `Codegen` drives every module of a [`Unit`] into a single output
//! module. Generation is demand-driven: it starts at `main` and recursively
//! emits every function, named type and global it reaches. Per-invocation
//! state (the context-type stack, builder stack, loop stack, scopes and
//! defer lists) lives in explicit LIFO stacks on the generator.
//!
//! Deferred statements are lowered right before the terminator of each exit
//! path: `return` lowers every pending defer down to the function scope,
//! `break`/`continue` down to the loop scope, and a fall-through scope exit
//! lowers its own frame before branching. The return expression is
//! evaluated before its defers run.

pub(crate) mod expr;
pub(crate) mod intrinsics;
pub(crate) mod stmt;
pub(crate) mod types;

use std::collections::BTreeSet;
use std::path::PathBuf;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::values::{
    BasicValue, BasicValueEnum, FunctionValue, GlobalValue, InstructionValue, PointerValue,
};
use rustc_hash::FxHashMap;

use brim_common::error::{Diagnostic, Result, Stage};
use brim_common::span::Pos;
use brim_parser::ast::{FnDecl, Item, Stmt, TypeDecl, TypeExpr, TypeExprKind, VarDecl};

use crate::map::{ImportList, ModuleId, Symbol, SymbolKind};
use crate::rt::{RealType, TypeId, TypeStore};
use crate::unit::Unit;

use self::types::{llvm_fn_type, llvm_type, undef_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Debug,
    Release,
}

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub mode: BuildMode,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { mode: BuildMode::Debug }
    }
}

/// The compiled unit: the verified LLVM module plus the libraries that
/// `extern_call!` usages asked to link.
pub struct CompileOutput<'ctx> {
    pub module: Module<'ctx>,
    pub libs: BTreeSet<PathBuf>,
}

/// Compile a loaded unit into LLVM IR, starting from the root `main`.
pub fn compile<'ctx>(
    context: &'ctx Context,
    unit: &Unit,
    options: &CompileOptions,
) -> Result<CompileOutput<'ctx>> {
    let mut cg = Codegen::new(context, unit, options.mode);
    cg.generate()?;

    Ok(CompileOutput { module: cg.module, libs: cg.libs })
}

pub(crate) fn llerr(e: BuilderError) -> Diagnostic {
    Diagnostic::new(Stage::Sem, format!("llvm builder error: {e}"), Pos::START)
}

// ── Evaluated values ─────────────────────────────────────────────────────

/// A compile-time value carried by constants.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CtValue {
    Int(i128),
    Float(f64),
    Str(String),
}

impl CtValue {
    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            CtValue::Int(v) => *v != 0,
            CtValue::Float(v) => *v != 0.0,
            CtValue::Str(_) => true,
        }
    }

    pub(crate) fn is_numeric(&self) -> bool {
        matches!(self, CtValue::Int(_) | CtValue::Float(_))
    }
}

/// Where a loaded value came from: the load instruction plus the address it
/// read, with the address's writability. Consuming the address erases the
/// load.
#[derive(Clone, Copy)]
pub(crate) struct LoadedFrom<'ctx> {
    pub inst: InstructionValue<'ctx>,
    pub ptr: PointerValue<'ctx>,
    pub is_mut: bool,
}

/// An evaluated expression: its real type, its LLVM value (materialised
/// lazily for constants), an optional compile-time value, and the coercion
/// flag. A constant is *coercable* while it has a value and has not yet
/// adopted a type from its consumer.
#[derive(Clone)]
pub(crate) struct RealData<'ctx> {
    pub ty: TypeId,
    pub llvm: Option<BasicValueEnum<'ctx>>,
    pub value: Option<CtValue>,
    pub coerced: bool,
    pub addr: Option<LoadedFrom<'ctx>>,
}

impl<'ctx> RealData<'ctx> {
    pub(crate) fn comptime(ty: TypeId, value: CtValue) -> Self {
        Self { ty, llvm: None, value: Some(value), coerced: false, addr: None }
    }

    pub(crate) fn runtime(ty: TypeId, llvm: BasicValueEnum<'ctx>) -> Self {
        Self { ty, llvm: Some(llvm), value: None, coerced: false, addr: None }
    }

    pub(crate) fn void(ty: TypeId) -> Self {
        Self { ty, llvm: None, value: None, coerced: false, addr: None }
    }

    pub(crate) fn is_comptime(&self) -> bool {
        self.value.is_some()
    }

    pub(crate) fn coercable(&self) -> bool {
        self.is_comptime() && !self.coerced
    }
}

// ── Symbols in scope ─────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) enum LocalSym<'ctx> {
    Var {
        is_comptime: bool,
        ty: TypeId,
        ptr: Option<PointerValue<'ctx>>,
        value: Option<RealData<'ctx>>,
    },
    /// A generic parameter bound to a concrete real type.
    TypeAlias(TypeId),
}

pub(crate) enum Resolved<'ctx> {
    Local(LocalSym<'ctx>),
    Global(Symbol),
}

struct ScopeFrame<'a, 'ctx> {
    /// A root frame starts a fresh chain: lookups do not continue past it
    /// into enclosing frames, only into the module base map and imports.
    root: bool,
    symbols: FxHashMap<String, LocalSym<'ctx>>,
    /// Deferred statement bodies in push order; lowered in reverse.
    defers: Vec<&'a [Stmt]>,
}

// ── Function state ───────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct FnProto {
    pub args: Vec<TypeId>,
    pub ret: TypeId,
}

pub(crate) struct FnKey {
    pub module: ModuleId,
    pub item: usize,
    pub generics: Vec<TypeId>,
}

struct FnFrame<'ctx> {
    key: FnKey,
    proto: FnProto,
    llfn: FunctionValue<'ctx>,
    allocas: Builder<'ctx>,
    entry_bb: BasicBlock<'ctx>,
    /// Index of the first scope frame belonging to this function's body;
    /// `return` lowers the defers of every frame from here up.
    scope_base: usize,
}

pub(crate) struct LoopFrame<'ctx> {
    pub cont: BasicBlock<'ctx>,
    pub brk: BasicBlock<'ctx>,
    /// Index of the loop body's scope frame; `break`/`continue` lower the
    /// defers of every frame from here up.
    pub scope_base: usize,
}

struct TypeKey {
    module: ModuleId,
    item: usize,
    generics: Vec<TypeId>,
}

enum GlobalState<'ctx> {
    Comptime(RealData<'ctx>),
    Runtime { ty: TypeId, var: GlobalValue<'ctx> },
}

// ── The generator ────────────────────────────────────────────────────────

pub struct Codegen<'a, 'ctx> {
    pub(crate) context: &'ctx Context,
    pub module: Module<'ctx>,
    pub(crate) unit: &'a Unit,
    pub(crate) types: TypeStore,
    pub(crate) mode: BuildMode,
    pub(crate) cur_module: ModuleId,
    pub libs: BTreeSet<PathBuf>,

    fn_frames: Vec<FnFrame<'ctx>>,
    fns_done: Vec<(FnKey, FnProto, FunctionValue<'ctx>)>,
    named_in_eval: Vec<(TypeKey, TypeId)>,
    globals: Vec<((ModuleId, usize), GlobalState<'ctx>)>,
    globals_in_eval: Vec<(ModuleId, usize)>,
    pub(crate) extern_fns: Vec<(String, Vec<TypeId>, TypeId, FunctionValue<'ctx>)>,

    builders: Vec<Builder<'ctx>>,
    ctx_types: Vec<TypeId>,
    pub(crate) loops: Vec<LoopFrame<'ctx>>,
    scopes: Vec<ScopeFrame<'a, 'ctx>>,

    pub(crate) strings: FxHashMap<String, GlobalValue<'ctx>>,
    pub(crate) str_counter: u32,
    tmp_counter: u32,
    internal_vars: u32,
    /// Non-zero while evaluating an expression that must be compile-time
    /// (array lengths); anything that would emit IR errors instead.
    pub(crate) comptime_only: u32,
    /// True while lowering deferred statements; early-return forms are
    /// rejected there.
    pub(crate) running_defers: bool,
}

impl<'a, 'ctx> Codegen<'a, 'ctx> {
    fn new(context: &'ctx Context, unit: &'a Unit, mode: BuildMode) -> Self {
        let module = context.create_module("brim");

        Self {
            context,
            module,
            unit,
            types: TypeStore::new(),
            mode,
            cur_module: unit.root,
            libs: BTreeSet::new(),
            fn_frames: Vec::new(),
            fns_done: Vec::new(),
            named_in_eval: Vec::new(),
            globals: Vec::new(),
            globals_in_eval: Vec::new(),
            extern_fns: Vec::new(),
            builders: Vec::new(),
            ctx_types: Vec::new(),
            loops: Vec::new(),
            scopes: Vec::new(),
            strings: FxHashMap::default(),
            str_counter: 0,
            tmp_counter: 0,
            internal_vars: 0,
            comptime_only: 0,
            running_defers: false,
        }
    }

    fn generate(&mut self) -> Result<()> {
        let root = self.unit.root;
        let main = self.unit.module(root).map.get("main").ok_or_else(|| {
            Diagnostic::new(Stage::Sem, "symbol `main` not declared", Pos::START)
                .with_path(&self.unit.module(root).path)
        })?;

        let main_decl_pos = match self.unit.item(main.module, main.item) {
            Item::Fn(decl) => decl.pos,
            _ => Pos::START,
        };
        if main.kind != SymbolKind::Fn {
            return Err(self.serr("`main` is not a function", main_decl_pos));
        }

        let (proto, llfn) = self.gen_nongeneric_fn(main)?;
        self.check_main_proto(&proto, main_decl_pos)?;
        self.gen_llvm_main(llfn)?;

        self.module.verify().map_err(|e| {
            Diagnostic::new(
                Stage::Sem,
                format!("module verification failed: {}", e.to_string()),
                Pos::START,
            )
        })
    }

    // ── Diagnostics ────────────────────────────────────────────────────

    pub(crate) fn serr(&self, message: impl Into<String>, pos: Pos) -> Diagnostic {
        Diagnostic::new(Stage::Sem, message, pos)
            .with_path(&self.unit.module(self.cur_module).path)
    }

    pub(crate) fn terr(&self, message: impl Into<String>, pos: Pos) -> Diagnostic {
        Diagnostic::new(Stage::Type, message, pos)
            .with_path(&self.unit.module(self.cur_module).path)
    }

    // ── AST access ─────────────────────────────────────────────────────

    pub(crate) fn fn_decl_of(&self, sym: Symbol) -> &'a FnDecl {
        match self.unit.item(sym.module, sym.item) {
            Item::Fn(decl) => decl,
            item => unreachable!("fn symbol points at {item:?}"),
        }
    }

    fn type_decl_of(&self, sym: Symbol) -> &'a TypeDecl {
        match self.unit.item(sym.module, sym.item) {
            Item::TypeDecl(decl) => decl,
            item => unreachable!("type symbol points at {item:?}"),
        }
    }

    fn global_decl_of(&self, sym: Symbol) -> &'a VarDecl {
        match self.unit.item(sym.module, sym.item) {
            Item::Global(decl) => decl,
            item => unreachable!("global symbol points at {item:?}"),
        }
    }

    pub(crate) fn with_module<T>(
        &mut self,
        module: ModuleId,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let old = std::mem::replace(&mut self.cur_module, module);
        let result = f(self);
        self.cur_module = old;
        result
    }

    /// Mangle a symbol name with its module path.
    pub(crate) fn fixname(&self, name: &str) -> String {
        format!("{}::{name}", self.unit.module(self.cur_module).display_path)
    }

    // ── Builder stack ──────────────────────────────────────────────────

    pub(crate) fn push_builder(&mut self, bb: BasicBlock<'ctx>) {
        let builder = self.context.create_builder();
        builder.position_at_end(bb);
        self.builders.push(builder);
    }

    pub(crate) fn pop_builder(&mut self) {
        self.builders.pop();
    }

    pub(crate) fn cur_builder(&self) -> &Builder<'ctx> {
        self.builders.last().expect("builder stack is never empty during lowering")
    }

    pub(crate) fn cur_block(&self) -> BasicBlock<'ctx> {
        self.cur_builder().get_insert_block().expect("builder is positioned")
    }

    pub(crate) fn reposition(&self, bb: BasicBlock<'ctx>) {
        self.cur_builder().position_at_end(bb);
    }

    pub(crate) fn cur_fn(&self) -> FunctionValue<'ctx> {
        self.fn_frames.last().expect("inside a function").llfn
    }

    pub(crate) fn cur_ret_type(&self) -> TypeId {
        self.fn_frames.last().expect("inside a function").proto.ret
    }

    pub(crate) fn cur_fn_scope_base(&self) -> usize {
        self.fn_frames.last().expect("inside a function").scope_base
    }

    /// Alloca in the function's allocas block.
    pub(crate) fn build_entry_alloca(
        &mut self,
        ty: TypeId,
        name: &str,
    ) -> Result<PointerValue<'ctx>> {
        let ll = llvm_type(self.context, &self.types, ty);
        let frame = self.fn_frames.last().expect("inside a function");
        frame.allocas.build_alloca(ll, name).map_err(llerr)
    }

    pub(crate) fn create_tmp_alloca(&mut self, rd: &RealData<'ctx>) -> Result<PointerValue<'ctx>> {
        self.tmp_counter += 1;
        let name = format!("tmp.{}", self.tmp_counter);
        let tmp = self.build_entry_alloca(rd.ty, &name)?;
        let value = self.rd_value(rd)?;
        self.cur_builder().build_store(tmp, value).map_err(llerr)?;
        Ok(tmp)
    }

    pub(crate) fn internal_var_name(&mut self) -> String {
        self.internal_vars += 1;
        format!("internal.{}", self.internal_vars)
    }

    // ── Context type stack ─────────────────────────────────────────────

    pub(crate) fn push_ctx(&mut self, ty: TypeId) {
        self.ctx_types.push(ty);
    }

    pub(crate) fn pop_ctx(&mut self) {
        self.ctx_types.pop();
    }

    pub(crate) fn ctx(&self) -> TypeId {
        self.ctx_types.last().copied().unwrap_or(self.types.placeholder)
    }

    pub(crate) fn ctx_if_int_or(&self, alternative: TypeId) -> TypeId {
        if self.types.is_int(self.ctx()) {
            self.ctx()
        } else {
            alternative
        }
    }

    pub(crate) fn ctx_if_numeric_or(&self, alternative: TypeId) -> TypeId {
        if self.types.is_numeric(self.ctx()) {
            self.ctx()
        } else {
            alternative
        }
    }

    // ── Scopes ─────────────────────────────────────────────────────────

    /// Start a fresh scope chain rooted at the current module's base map.
    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(ScopeFrame {
            root: true,
            symbols: FxHashMap::default(),
            defers: Vec::new(),
        });
    }

    /// Nest a lexical sub-scope inside the current chain.
    pub(crate) fn push_sub_scope(&mut self) {
        self.scopes.push(ScopeFrame {
            root: false,
            symbols: FxHashMap::default(),
            defers: Vec::new(),
        });
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub(crate) fn push_defer(&mut self, body: &'a [Stmt]) {
        self.scopes
            .last_mut()
            .expect("defer occurs inside a scope")
            .defers
            .push(body);
    }

    /// Lower the pending defers of scope frames `from..`, innermost frame
    /// first and in reverse push order within each frame. Frames are left
    /// intact: every exit path lowers its own copy.
    pub(crate) fn run_defer_frames(&mut self, from: usize) -> Result<()> {
        let mut pending: Vec<&'a [Stmt]> = Vec::new();
        for frame in self.scopes[from..].iter().rev() {
            for body in frame.defers.iter().rev().copied() {
                pending.push(body);
            }
        }

        let was_running = std::mem::replace(&mut self.running_defers, true);
        let mut result = Ok(());
        'outer: for body in pending {
            for stmt in body {
                if let Err(e) = self.evaluate_stmt(stmt) {
                    result = Err(e);
                    break 'outer;
                }
            }
        }
        self.running_defers = was_running;
        result
    }

    pub(crate) fn run_defers_top(&mut self) -> Result<()> {
        let top = self.scopes.len() - 1;
        self.run_defer_frames(top)
    }

    /// Look a name up: imports first (in declaration order, `import *`
    /// re-exports taking precedence), then the local scope chain, then the
    /// module base map.
    pub(crate) fn lookup(&self, name: &str) -> Option<Resolved<'ctx>> {
        let module = self.unit.module(self.cur_module);

        for import in &module.imports {
            match &import.items {
                ImportList::All => {
                    if let Some(sym) = self.unit.module(import.target).map.get(name) {
                        return Some(Resolved::Global(sym));
                    }
                }
                ImportList::Ids(ids) => {
                    if let Some(id) = ids.iter().find(|id| id.alias == name) {
                        return self
                            .unit
                            .module(import.target)
                            .map
                            .get(&id.name)
                            .map(Resolved::Global);
                    }
                }
            }
        }

        for frame in self.scopes.iter().rev() {
            if let Some(sym) = frame.symbols.get(name) {
                return Some(Resolved::Local(sym.clone()));
            }
            if frame.root {
                break;
            }
        }

        module.map.get(name).map(Resolved::Global)
    }

    pub(crate) fn get_symbol(&self, name: &str, pos: Pos) -> Result<Resolved<'ctx>> {
        self.lookup(name)
            .ok_or_else(|| self.serr(format!("symbol `{name}` not declared"), pos))
    }

    /// Declare a local symbol in the innermost frame, rejecting collisions
    /// with imports and with anything already visible in the chain.
    pub(crate) fn declare_local(
        &mut self,
        name: &str,
        sym: LocalSym<'ctx>,
        pos: Pos,
    ) -> Result<()> {
        if crate::map::RESERVED_NAMES.contains(&name) {
            return Err(self.serr(format!("symbol `{name}` is reserved"), pos));
        }

        let module = self.unit.module(self.cur_module);
        for import in &module.imports {
            match &import.items {
                ImportList::All => {
                    if self.unit.module(import.target).map.is_declared(name) {
                        return Err(self.serr(
                            format!(
                                "id `{name}` already declared (from import at {})",
                                import.pos
                            ),
                            pos,
                        ));
                    }
                }
                ImportList::Ids(ids) => {
                    if let Some(id) = ids.iter().find(|id| id.alias == name) {
                        return Err(self.serr(
                            format!("id `{name}` already declared (from import at {})", id.pos),
                            pos,
                        ));
                    }
                }
            }
        }

        let mut visible = module.map.is_declared(name);
        for frame in self.scopes.iter().rev() {
            if frame.symbols.contains_key(name) {
                visible = true;
            }
            if frame.root {
                break;
            }
        }
        if visible {
            return Err(self.serr(format!("symbol `{name}` already declared"), pos));
        }

        self.scopes
            .last_mut()
            .expect("declaration occurs inside a scope")
            .symbols
            .insert(name.to_string(), sym);
        Ok(())
    }

    // ── Constant materialisation ───────────────────────────────────────

    /// The LLVM value of an evaluated expression, materialising constants
    /// on demand from their compile-time value and (possibly coerced) type.
    pub(crate) fn rd_value(&self, rd: &RealData<'ctx>) -> Result<BasicValueEnum<'ctx>> {
        if let Some(v) = rd.llvm {
            return Ok(v);
        }
        let Some(ct) = &rd.value else {
            return Err(Diagnostic::new(
                Stage::Sem,
                "internal: value of a void expression requested",
                Pos::START,
            ));
        };
        Ok(self.ct_const(rd.ty, ct))
    }

    pub(crate) fn ct_const(&self, ty: TypeId, ct: &CtValue) -> BasicValueEnum<'ctx> {
        match self.types.get(ty) {
            RealType::Int { bits, .. } => {
                let int_ty = self.context.custom_width_int_type(*bits);
                let raw = match ct {
                    CtValue::Int(v) => *v as u64,
                    CtValue::Float(f) => *f as i64 as u64,
                    CtValue::Str(_) => 0,
                };
                int_ty.const_int(raw, false).into()
            }
            RealType::Float { .. } => {
                let float_ty = match llvm_type(self.context, &self.types, ty) {
                    inkwell::types::BasicTypeEnum::FloatType(t) => t,
                    other => unreachable!("float type lowered to {other:?}"),
                };
                let raw = match ct {
                    CtValue::Int(v) => *v as f64,
                    CtValue::Float(f) => *f,
                    CtValue::Str(_) => 0.0,
                };
                float_ty.const_float(raw).into()
            }
            RealType::Ptr { .. } | RealType::Fn { .. } => self
                .context
                .ptr_type(inkwell::AddressSpace::default())
                .const_null()
                .into(),
            rt => {
                // A constant whose context never settled on a representable
                // type; undef of whatever the type lowers to.
                let _ = rt;
                undef_of(llvm_type(self.context, &self.types, ty))
            }
        }
    }

    /// Truncate an integer condition to `i1` for conditional branches.
    pub(crate) fn to_i1(
        &self,
        v: inkwell::values::IntValue<'ctx>,
    ) -> Result<inkwell::values::IntValue<'ctx>> {
        if v.get_type().get_bit_width() == 1 {
            return Ok(v);
        }
        self.cur_builder()
            .build_int_truncate(v, self.context.bool_type(), "cond")
            .map_err(llerr)
    }

    /// Consume the load that produced a value: erase it and return the
    /// address it loaded from.
    pub(crate) fn consume_load(&self, rd: &RealData<'ctx>) -> Option<(PointerValue<'ctx>, bool)> {
        let loaded = rd.addr?;
        loaded.inst.erase_from_basic_block();
        Some((loaded.ptr, loaded.is_mut))
    }

    // ── Expectation helpers ────────────────────────────────────────────

    pub(crate) fn expect_realtype(&self, want: TypeId, got: TypeId, pos: Pos) -> Result<()> {
        if self.types.eq(want, got) {
            return Ok(());
        }
        Err(self.serr(
            format!("expected `{}`, found `{}`", self.types.display(want), self.types.display(got)),
            pos,
        ))
    }

    pub(crate) fn expect_compatible(&self, a: TypeId, b: TypeId, pos: Pos) -> Result<()> {
        if self.types.eq(a, b) {
            return Ok(());
        }
        Err(self.serr(
            format!(
                "types `{}` and `{}` are not compatible",
                self.types.display(a),
                self.types.display(b)
            ),
            pos,
        ))
    }

    pub(crate) fn expect_int(&self, rd: &RealData<'ctx>, pos: Pos) -> Result<()> {
        if self.types.is_int(rd.ty) {
            return Ok(());
        }
        Err(self.serr(
            format!("expected integer expression, got `{}`", self.types.display(rd.ty)),
            pos,
        ))
    }

    pub(crate) fn expect_numeric(&self, rd: &RealData<'ctx>, pos: Pos) -> Result<()> {
        if self.types.is_numeric(rd.ty) {
            return Ok(());
        }
        Err(self.serr(
            format!("expected numeric expression, got `{}`", self.types.display(rd.ty)),
            pos,
        ))
    }

    pub(crate) fn expect_numeric_or_ptr(&self, rd: &RealData<'ctx>, pos: Pos) -> Result<()> {
        if self.types.is_numeric(rd.ty) || self.types.is_ptr(rd.ty) {
            return Ok(());
        }
        Err(self.serr(
            format!("expected numeric or ptr expression, got `{}`", self.types.display(rd.ty)),
            pos,
        ))
    }

    pub(crate) fn expect_ptr(&self, rd: &RealData<'ctx>, pos: Pos) -> Result<()> {
        if self.types.is_ptr(rd.ty) {
            return Ok(());
        }
        Err(self.serr(
            format!("expected pointer expression, got `{}`", self.types.display(rd.ty)),
            pos,
        ))
    }

    pub(crate) fn expect_comptime(&self, rd: &RealData<'ctx>, pos: Pos) -> Result<()> {
        if rd.is_comptime() {
            return Ok(());
        }
        Err(self.serr("expected comptime expression", pos))
    }

    // ── Type evaluation ────────────────────────────────────────────────

    fn builtin_type(&self, name: &str) -> Option<TypeId> {
        let id = match name {
            "i8" => self.types.int_ty(true, 8),
            "i16" => self.types.int_ty(true, 16),
            "i32" => self.types.int_ty(true, 32),
            "i64" => self.types.int_ty(true, 64),
            "u8" => self.types.int_ty(false, 8),
            "u16" => self.types.int_ty(false, 16),
            "u32" => self.types.int_ty(false, 32),
            "u64" => self.types.int_ty(false, 64),
            "f32" => self.types.float_ty(32),
            "f64" => self.types.float_ty(64),
            "void" => self.types.void,
            _ => return None,
        };
        Some(id)
    }

    pub(crate) fn evaluate_type(&mut self, node: &'a TypeExpr) -> Result<TypeId> {
        self.evaluate_type_full(node, true, false)
    }

    pub(crate) fn evaluate_type_allow_void(&mut self, node: &'a TypeExpr) -> Result<TypeId> {
        self.evaluate_type_full(node, true, true)
    }

    fn evaluate_type_full(
        &mut self,
        node: &'a TypeExpr,
        is_top: bool,
        allow_void: bool,
    ) -> Result<TypeId> {
        let id = match &node.kind {
            TypeExprKind::Named(name) => {
                let id = match self.builtin_type(name) {
                    Some(id) => id,
                    None => self.evaluate_named_type(name, node.pos)?,
                };
                if self.types.is_void(id) && !allow_void {
                    return Err(self.terr("type `void` not allowed here", node.pos));
                }
                id
            }
            TypeExprKind::Generic { name, args } => self.evaluate_generic_named_type(name, args, node.pos)?,
            TypeExprKind::Ptr { is_mut, target } => {
                let target = self.evaluate_type_full(target, false, false)?;
                self.types.alloc(RealType::Ptr { is_mut: *is_mut, target })
            }
            TypeExprKind::Array { len, elem } => {
                let len = self.evaluate_comptime_len(len)?;
                let elem = self.evaluate_type_full(elem, false, false)?;
                self.types.alloc(RealType::StaticArray { len, elem })
            }
            TypeExprKind::Vector { len, elem } => {
                let len = self.evaluate_comptime_len(len)?;
                let elem = self.evaluate_type_full(elem, false, false)?;
                if !self.types.is_numeric(elem) && !self.types.is_ptr(elem) {
                    return Err(self.terr("vector element must be a scalar type", node.pos));
                }
                self.types.alloc(RealType::StaticVector { len, elem })
            }
            TypeExprKind::Struct(decls) | TypeExprKind::Union(decls) => {
                for (i, field) in decls.iter().enumerate() {
                    if decls[..i].iter().any(|other| other.name.name == field.name.name) {
                        return Err(self.terr(
                            format!("duplicate field `{}`", field.name.name),
                            field.name.pos,
                        ));
                    }
                }

                let mut fields = Vec::with_capacity(decls.len());
                for field in decls {
                    let ty = self.evaluate_type_full(&field.ty, false, false)?;
                    fields.push((field.name.name.clone(), ty));
                }

                match node.kind {
                    TypeExprKind::Struct(_) => self.types.alloc(RealType::Struct { fields }),
                    _ => self.types.alloc(RealType::Union { fields }),
                }
            }
            TypeExprKind::Fn { args, ret } => {
                let mut arg_tys = Vec::with_capacity(args.len());
                for arg in args {
                    arg_tys.push(self.evaluate_type_full(arg, false, false)?);
                }
                let ret = self.evaluate_type_full(ret, false, true)?;
                self.types.alloc(RealType::Fn { args: arg_tys, ret })
            }
        };

        if is_top && self.types.has_infinite_layout(id) {
            return Err(self.terr("type has infinite recursive layout", node.pos));
        }

        Ok(id)
    }

    fn evaluate_named_type(&mut self, name: &str, pos: Pos) -> Result<TypeId> {
        let sym = match self.get_symbol(name, pos)? {
            Resolved::Local(LocalSym::TypeAlias(ty)) => return Ok(ty),
            Resolved::Local(_) => {
                return Err(self.serr(format!("`{name}` is not a type"), pos));
            }
            Resolved::Global(sym) => sym,
        };

        match sym.kind {
            SymbolKind::Type => {}
            SymbolKind::GenericType => {
                let decl = self.type_decl_of(sym);
                return Err(self.terr(
                    format!("expected `{}` generic args, got `0`", decl.generics.len()),
                    pos,
                ));
            }
            _ => return Err(self.serr(format!("`{name}` is not a type"), pos)),
        }

        let decl = self.type_decl_of(sym);
        self.with_module(sym.module, |cg| {
            let key = TypeKey { module: sym.module, item: sym.item, generics: Vec::new() };

            if let Some(placeholder) = cg.find_named_in_eval(&key) {
                return Ok(placeholder);
            }

            let placeholder = cg.types.fresh_placeholder();
            cg.named_in_eval.push((key, placeholder));

            cg.push_scope();
            let evaluated = cg.evaluate_type_full(&decl.ty, false, false);
            cg.pop_scope();

            cg.named_in_eval.pop();
            let evaluated = evaluated?;

            let content = cg.types.get(evaluated).clone();
            cg.types.patch(placeholder, content);
            Ok(placeholder)
        })
    }

    fn evaluate_generic_named_type(
        &mut self,
        name: &brim_parser::ast::Ident,
        args: &'a [TypeExpr],
        pos: Pos,
    ) -> Result<TypeId> {
        let sym = match self.get_symbol(&name.name, name.pos)? {
            Resolved::Local(_) => {
                return Err(self.serr(format!("`{}` is not a generic type", name.name), name.pos));
            }
            Resolved::Global(sym) => sym,
        };
        if sym.kind != SymbolKind::GenericType {
            return Err(self.serr(format!("`{}` is not a generic type", name.name), name.pos));
        }

        let decl = self.type_decl_of(sym);
        if args.len() != decl.generics.len() {
            return Err(self.terr(
                format!("expected `{}` generic args, got `{}`", decl.generics.len(), args.len()),
                pos,
            ));
        }

        let mut generics = Vec::with_capacity(args.len());
        for arg in args {
            generics.push(self.evaluate_type(arg)?);
        }

        self.with_module(sym.module, |cg| {
            let key = TypeKey { module: sym.module, item: sym.item, generics: generics.clone() };

            if let Some(placeholder) = cg.find_named_in_eval(&key) {
                return Ok(placeholder);
            }

            let placeholder = cg.types.fresh_placeholder();
            cg.named_in_eval.push((key, placeholder));

            cg.push_scope();
            for (param, &arg) in decl.generics.iter().zip(&generics) {
                cg.declare_local(&param.name, LocalSym::TypeAlias(arg), param.pos)?;
            }
            let evaluated = cg.evaluate_type_full(&decl.ty, false, false);
            cg.pop_scope();

            cg.named_in_eval.pop();
            let evaluated = evaluated?;

            let content = cg.types.get(evaluated).clone();
            cg.types.patch(placeholder, content);
            Ok(placeholder)
        })
    }

    fn find_named_in_eval(&self, key: &TypeKey) -> Option<TypeId> {
        self.named_in_eval
            .iter()
            .find(|(k, _)| {
                k.module == key.module
                    && k.item == key.item
                    && self.types.eq_slices(&k.generics, &key.generics)
            })
            .map(|(_, placeholder)| *placeholder)
    }

    fn evaluate_comptime_len(&mut self, expr: &'a brim_parser::ast::Expr) -> Result<u64> {
        self.comptime_only += 1;
        let rd = self.evaluate_node(expr, self.types.u64());
        self.comptime_only -= 1;
        let rd = rd?;

        self.expect_comptime(&rd, expr.pos)?;
        self.expect_int(&rd, expr.pos)?;

        match rd.value {
            Some(CtValue::Int(v)) if v >= 0 => Ok(v as u64),
            _ => Err(self.terr("array length cannot be negative", expr.pos)),
        }
    }

    // ── Function generation ────────────────────────────────────────────

    pub(crate) fn evaluate_fn_proto(&mut self, decl: &'a FnDecl) -> Result<FnProto> {
        let mut args = Vec::with_capacity(decl.args.len());
        for arg in &decl.args {
            args.push(self.evaluate_type(&arg.ty)?);
        }
        let ret = self.evaluate_type_allow_void(&decl.ret_type)?;

        Ok(FnProto { args, ret })
    }

    fn fn_key_matches(&self, a: &FnKey, module: ModuleId, item: usize, generics: &[TypeId]) -> bool {
        a.module == module && a.item == item && self.types.eq_slices(&a.generics, generics)
    }

    /// Emit (or fetch) a non-generic function. While the function is being
    /// evaluated its partial state is visible, so recursive calls resolve.
    pub(crate) fn gen_nongeneric_fn(
        &mut self,
        sym: Symbol,
    ) -> Result<(FnProto, FunctionValue<'ctx>)> {
        if let Some(frame) = self
            .fn_frames
            .iter()
            .find(|f| self.fn_key_matches(&f.key, sym.module, sym.item, &[]))
        {
            return Ok((frame.proto.clone(), frame.llfn));
        }
        if let Some((_, proto, llfn)) = self
            .fns_done
            .iter()
            .find(|(k, _, _)| self.fn_key_matches(k, sym.module, sym.item, &[]))
        {
            return Ok((proto.clone(), *llfn));
        }

        let decl = self.fn_decl_of(sym);
        self.with_module(sym.module, |cg| {
            cg.push_scope();
            let mangled = cg.fixname(&decl.name.name);
            let key = FnKey { module: sym.module, item: sym.item, generics: Vec::new() };
            let result = cg.gen_fn(decl, key, mangled);
            cg.pop_scope();
            result
        })
    }

    /// Emit (or fetch) one monomorphisation of a generic function. The
    /// cache key is the symbol plus the concrete argument types, compared
    /// structurally.
    pub(crate) fn gen_generic_fn(
        &mut self,
        sym: Symbol,
        generics: Vec<TypeId>,
    ) -> Result<(FnProto, FunctionValue<'ctx>)> {
        if let Some(frame) = self
            .fn_frames
            .iter()
            .find(|f| self.fn_key_matches(&f.key, sym.module, sym.item, &generics))
        {
            return Ok((frame.proto.clone(), frame.llfn));
        }
        if let Some((_, proto, llfn)) = self
            .fns_done
            .iter()
            .find(|(k, _, _)| self.fn_key_matches(k, sym.module, sym.item, &generics))
        {
            return Ok((proto.clone(), *llfn));
        }

        let decl = self.fn_decl_of(sym);
        self.with_module(sym.module, |cg| {
            cg.push_scope();
            for (param, &arg) in decl.generics.iter().zip(&generics) {
                cg.declare_local(&param.name, LocalSym::TypeAlias(arg), param.pos)?;
            }

            let shown: Vec<String> = generics.iter().map(|&g| cg.types.display(g)).collect();
            let mangled = cg.fixname(&format!(
                "generic.{}<{}>",
                decl.name.name,
                shown.join(", ")
            ));

            let key = FnKey { module: sym.module, item: sym.item, generics };
            let result = cg.gen_fn(decl, key, mangled);
            cg.pop_scope();
            result
        })
    }

    fn gen_fn(
        &mut self,
        decl: &'a FnDecl,
        key: FnKey,
        mangled: String,
    ) -> Result<(FnProto, FunctionValue<'ctx>)> {
        let proto = self.evaluate_fn_proto(decl)?;

        let fn_ty = llvm_fn_type(self.context, &self.types, &proto.args, proto.ret);
        let llfn = self.module.add_function(&mangled, fn_ty, Some(Linkage::Private));

        let allocas_bb = self.context.append_basic_block(llfn, "allocas");
        let entry_bb = self.context.append_basic_block(llfn, "entry");

        let allocas = self.context.create_builder();
        allocas.position_at_end(allocas_bb);

        self.fn_frames.push(FnFrame {
            key,
            proto: proto.clone(),
            llfn,
            allocas,
            entry_bb,
            scope_base: self.scopes.len(),
        });

        let saved_loops = std::mem::take(&mut self.loops);
        self.push_builder(entry_bb);
        self.push_sub_scope();

        let body: Result<()> = (|| {
            self.declare_parameters(decl, &proto)?;
            let has_term = self.evaluate_block(&decl.body)?;

            if !has_term {
                self.run_defer_frames(self.cur_fn_scope_base())?;
            }

            let frame = self.fn_frames.last().expect("frame pushed above");
            frame.allocas.build_unconditional_branch(entry_bb).map_err(llerr)?;

            self.fix_ret_terminator(has_term, proto.ret, decl.pos)?;
            Ok(())
        })();

        self.pop_scope();
        self.pop_builder();
        self.loops = saved_loops;

        let frame = self.fn_frames.pop().expect("frame pushed above");
        body?;

        Self::prune_dead_blocks(llfn);
        self.fns_done.push((frame.key, proto.clone(), llfn));

        Ok((proto, llfn))
    }

    fn declare_parameters(&mut self, decl: &'a FnDecl, proto: &FnProto) -> Result<()> {
        for (i, (arg, &ty)) in decl.args.iter().zip(&proto.args).enumerate() {
            let alloca = self.build_entry_alloca(ty, &format!("arg.{}", i + 1))?;
            let param = self
                .cur_fn()
                .get_nth_param(i as u32)
                .expect("proto and llvm signature agree");
            self.cur_builder().build_store(alloca, param).map_err(llerr)?;

            self.declare_local(
                &arg.name.name,
                LocalSym::Var { is_comptime: false, ty, ptr: Some(alloca), value: None },
                arg.name.pos,
            )?;
        }
        Ok(())
    }

    /// Statements of a block; errors on statements after a terminator.
    /// Returns whether the block ended terminated.
    pub(crate) fn evaluate_block(&mut self, block: &'a [Stmt]) -> Result<bool> {
        for stmt in block {
            if self.cur_block().get_terminator().is_some() {
                return Err(self.serr("unreachable code", stmt.pos));
            }
            self.evaluate_stmt(stmt)?;
        }
        Ok(self.cur_block().get_terminator().is_some())
    }

    fn fix_ret_terminator(&mut self, has_term: bool, ret: TypeId, fn_pos: Pos) -> Result<()> {
        if has_term {
            return Ok(());
        }

        if self.types.is_void(ret) {
            self.cur_builder().build_return(None).map_err(llerr)?;
            return Ok(());
        }

        // A fall-through tail that no path reaches is pruned, not an error.
        if self.cur_block().get_first_use().is_none() {
            return Ok(());
        }

        Err(self.serr("not all paths return a value", fn_pos))
    }

    /// Delete blocks that no branch reaches, repeating until stable. The
    /// first block (allocas) is the function entry and always live.
    fn prune_dead_blocks(llfn: FunctionValue<'ctx>) {
        loop {
            let dead: Vec<BasicBlock<'ctx>> = llfn
                .get_basic_blocks()
                .into_iter()
                .skip(1)
                .filter(|bb| bb.get_first_use().is_none())
                .collect();

            if dead.is_empty() {
                return;
            }
            for bb in dead {
                // The block has no uses, so deleting it cannot dangle.
                unsafe {
                    let _ = bb.delete();
                }
            }
        }
    }

    // ── Globals ────────────────────────────────────────────────────────

    fn find_global(&self, key: (ModuleId, usize)) -> Option<&GlobalState<'ctx>> {
        self.globals.iter().find(|(k, _)| *k == key).map(|(_, g)| g)
    }

    /// Evaluate a module global on first use. Comptime-named globals keep
    /// their constant; others become module-level variables with constant
    /// initialisers.
    pub(crate) fn evaluate_global_sym(&mut self, sym: Symbol) -> Result<()> {
        let key = (sym.module, sym.item);
        if self.find_global(key).is_some() {
            return Ok(());
        }

        let decl = self.global_decl_of(sym);
        if self.globals_in_eval.contains(&key) {
            return Err(self.serr(
                format!("cyclic initializer for global `{}`", decl.name.name),
                decl.name.pos,
            ));
        }
        self.globals_in_eval.push(key);

        let is_comptime = var_is_comptime(&decl.name.name);

        self.push_scope();
        let evaluated: Result<(TypeId, RealData<'ctx>)> = (|| {
            let ty = self.evaluate_type(&decl.ty)?;
            let rd = self.evaluate_node(&decl.init, ty)?;
            self.expect_realtype(ty, rd.ty, decl.init.pos)?;
            self.expect_comptime(&rd, decl.init.pos)?;
            Ok((ty, rd))
        })();
        self.pop_scope();
        self.globals_in_eval.pop();
        let (ty, rd) = evaluated?;

        let state = if is_comptime {
            GlobalState::Comptime(rd)
        } else {
            let ll = llvm_type(self.context, &self.types, ty);
            let var = self.module.add_global(ll, None, &self.fixname(&decl.name.name));
            var.set_initializer(&self.rd_value(&rd)?);
            GlobalState::Runtime { ty, var }
        };

        self.globals.push((key, state));
        Ok(())
    }

    pub(crate) fn global_value(
        &mut self,
        sym: Symbol,
        pos: Pos,
    ) -> Result<RealData<'ctx>> {
        self.with_module(sym.module, |cg| cg.evaluate_global_sym(sym))?;

        let state = self
            .find_global((sym.module, sym.item))
            .expect("global evaluated above");

        match state {
            GlobalState::Comptime(rd) => Ok(rd.clone()),
            GlobalState::Runtime { ty, var } => {
                let (ty, ptr) = (*ty, var.as_pointer_value());
                if self.comptime_only > 0 {
                    return Err(self.serr("expected comptime expression", pos));
                }
                let ll = llvm_type(self.context, &self.types, ty);
                let name = self.global_decl_of(sym).name.name.clone();
                let v = self.cur_builder().build_load(ll, ptr, &name).map_err(llerr)?;
                let inst = value_as_instruction(v);
                Ok(RealData {
                    ty,
                    llvm: Some(v),
                    value: None,
                    coerced: false,
                    addr: inst.map(|inst| LoadedFrom { inst, ptr, is_mut: true }),
                })
            }
        }
    }

    // ── main ───────────────────────────────────────────────────────────

    fn check_main_proto(&mut self, proto: &FnProto, pos: Pos) -> Result<()> {
        let cstring = self.types.cstring;
        let argv_ty = self.types.alloc(RealType::Ptr { is_mut: false, target: cstring });

        let ok = proto.args.len() == 2
            && self.types.eq(proto.args[0], self.types.u32())
            && self.types.eq(proto.args[1], argv_ty)
            && self.types.eq(proto.ret, self.types.i32());

        if ok {
            Ok(())
        } else {
            Err(self.serr("invalid `main` prototype", pos))
        }
    }

    /// The externally visible `main(i32, ptr) -> i32` that forwards to the
    /// user's mangled `main`.
    fn gen_llvm_main(&mut self, user_main: FunctionValue<'ctx>) -> Result<()> {
        let i32_ty = self.context.i32_type();
        let ptr_ty = self.context.ptr_type(inkwell::AddressSpace::default());
        let main_ty = i32_ty.fn_type(&[i32_ty.into(), ptr_ty.into()], false);
        let llmain = self.module.add_function("main", main_ty, None);

        let entry = self.context.append_basic_block(llmain, "entry");
        let builder = self.context.create_builder();
        builder.position_at_end(entry);

        let argc = llmain.get_nth_param(0).expect("argc param");
        let argv = llmain.get_nth_param(1).expect("argv param");
        let call = builder
            .build_call(user_main, &[argc.into(), argv.into()], "ret")
            .map_err(llerr)?;
        let ret = call
            .try_as_basic_value()
            .basic()
            .expect("user main returns i32");
        builder.build_return(Some(&ret as &dyn BasicValue)).map_err(llerr)?;
        Ok(())
    }
}

/// The comptime naming convention: at least one letter, all letters
/// uppercase.
pub(crate) fn var_is_comptime(name: &str) -> bool {
    let mut has_letter = false;
    for c in name.chars() {
        if c.is_ascii_alphabetic() {
            has_letter = true;
            if c.is_ascii_lowercase() {
                return false;
            }
        }
    }
    has_letter
}

/// The instruction that produced a value, if it came from one.
pub(crate) fn value_as_instruction(v: BasicValueEnum<'_>) -> Option<InstructionValue<'_>> {
    match v {
        BasicValueEnum::IntValue(x) => x.as_instruction(),
        BasicValueEnum::FloatValue(x) => x.as_instruction(),
        BasicValueEnum::PointerValue(x) => x.as_instruction(),
        BasicValueEnum::StructValue(x) => x.as_instruction(),
        BasicValueEnum::ArrayValue(x) => x.as_instruction(),
        BasicValueEnum::VectorValue(x) => x.as_instruction(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comptime_naming_convention() {
        assert!(var_is_comptime("MAX_LEN"));
        assert!(var_is_comptime("K2"));
        assert!(!var_is_comptime("max_len"));
        assert!(!var_is_comptime("MaxLen"));
        assert!(!var_is_comptime("_1"));
    }
}
