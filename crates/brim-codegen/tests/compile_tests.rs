//! Whole-pipeline tests: compile in-memory Brim programs and inspect the
//! produced LLVM module. Every successful compile also passes LLVM's module
//! verifier, so these double as CFG well-formedness checks.

use std::path::Path;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::{FunctionValue, InstructionOpcode};

use brim_codegen::{compile, load_unit, CompileOptions, CompileOutput, MemoryLoader};
use brim_common::error::Result;

const MAIN_SIG: &str = "fn main(argc: u32, argv: *(*u8)) -> i32:";

fn compile_files<'ctx>(
    context: &'ctx Context,
    files: &[(&str, &str)],
) -> Result<CompileOutput<'ctx>> {
    let mut loader = MemoryLoader::new();
    for (path, source) in files {
        loader.add(*path, *source);
    }
    let unit = load_unit(&loader, Path::new(files[0].0))?;
    compile(context, &unit, &CompileOptions::default())
}

fn compile_main<'ctx>(context: &'ctx Context, source: &str) -> Result<CompileOutput<'ctx>> {
    compile_files(context, &[("main.brim", source)])
}

fn find_fn<'ctx>(module: &Module<'ctx>, part: &str) -> FunctionValue<'ctx> {
    module
        .get_functions()
        .find(|f| f.get_name().to_string_lossy().contains(part))
        .unwrap_or_else(|| panic!("no function containing `{part}`"))
}

fn opcodes(f: FunctionValue<'_>) -> Vec<InstructionOpcode> {
    let mut out = Vec::new();
    for bb in f.get_basic_blocks() {
        let mut cursor = bb.get_first_instruction();
        while let Some(inst) = cursor {
            out.push(inst.get_opcode());
            cursor = inst.get_next_instruction();
        }
    }
    out
}

// ── Scenarios from the language contract ─────────────────────────────────

#[test]
fn trivial_main_compiles_with_forwarding_wrapper() {
    let context = Context::create();
    let out = compile_main(&context, &format!("{MAIN_SIG}\n  return 0\n")).unwrap();

    let wrapper = out.module.get_function("main").expect("extern wrapper");
    assert_eq!(wrapper.count_params(), 2);

    let user_main = find_fn(&out.module, "main.brim::main");
    assert!(opcodes(wrapper).contains(&InstructionOpcode::Call));
    assert!(user_main.count_basic_blocks() >= 2);
}

#[test]
fn constant_arithmetic_folds_away() {
    let context = Context::create();
    let out = compile_main(
        &context,
        &format!("{MAIN_SIG}\n  x: i32 = 2 + 3 * 4\n  return x\n"),
    )
    .unwrap();

    let user_main = find_fn(&out.module, "main.brim::main");
    let ops = opcodes(user_main);
    assert!(!ops.contains(&InstructionOpcode::Add), "add leaked into {ops:?}");
    assert!(!ops.contains(&InstructionOpcode::Mul), "mul leaked into {ops:?}");

    let ir = out.module.print_to_string().to_string();
    assert!(ir.contains("store i32 14"), "folded constant missing:\n{ir}");
}

#[test]
fn recursive_struct_through_pointer_compiles() {
    let context = Context::create();
    let source = format!(
        "type Node = (next: *Node, v: i32)\n{MAIN_SIG}\n  n: Node = (next: None, v: 7)\n  return n.v\n"
    );
    let out = compile_main(&context, &source).unwrap();
    let ir = out.module.print_to_string().to_string();
    assert!(ir.contains("store i32 7") || ir.contains("i32 7"), "{ir}");
}

#[test]
fn monomorphisation_is_unique_per_type_tuple() {
    let context = Context::create();
    let source = format!(
        "fn id(|T| x: T) -> T:\n  return x\n{MAIN_SIG}\n  a: i32 = id(|i32| 1)\n  b: i32 = id(|i32| 2)\n  c: i64 = id(|i64| 3)\n  return a + b + (cast(i32) c) * 0\n"
    );
    let out = compile_main(&context, &source).unwrap();

    let generic_fns: Vec<String> = out
        .module
        .get_functions()
        .map(|f| f.get_name().to_string_lossy().to_string())
        .filter(|name| name.contains("generic.id<"))
        .collect();

    assert_eq!(generic_fns.len(), 2, "{generic_fns:?}");
    assert!(generic_fns.iter().any(|n| n.contains("generic.id<i32>")));
    assert!(generic_fns.iter().any(|n| n.contains("generic.id<i64>")));
}

#[test]
fn generic_functions_share_one_instantiation_across_calls() {
    let context = Context::create();
    let source = format!(
        "fn id(|T| x: T) -> T:\n  return x\n{MAIN_SIG}\n  return id(|i32| id(|i32| 42))\n"
    );
    let out = compile_main(&context, &source).unwrap();

    let count = out
        .module
        .get_functions()
        .filter(|f| f.get_name().to_string_lossy().contains("generic.id<"))
        .count();
    assert_eq!(count, 1);
}

#[test]
fn short_circuit_with_constant_left_emits_no_branch_or_phi() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  x: u8 = 1\n  y: u8 = True and x\n  z: u8 = False or x\n  return 0\n"
    );
    let out = compile_main(&context, &source).unwrap();

    let user_main = find_fn(&out.module, "main.brim::main");
    let ops = opcodes(user_main);
    assert!(!ops.contains(&InstructionOpcode::Phi), "phi leaked into {ops:?}");
    assert_eq!(user_main.count_basic_blocks(), 2, "diamond blocks were emitted");
}

#[test]
fn short_circuit_with_runtime_left_builds_the_diamond() {
    let context = Context::create();
    let source = format!("{MAIN_SIG}\n  x: u8 = 1\n  y: u8 = x and x\n  return 0\n");
    let out = compile_main(&context, &source).unwrap();

    let user_main = find_fn(&out.module, "main.brim::main");
    let ops = opcodes(user_main);
    assert!(ops.contains(&InstructionOpcode::Phi), "no phi in {ops:?}");
}

#[test]
fn cfg_is_well_formed_after_lowering() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  n: i32 = cast(i32) argc\n  while n > 0:\n    n -= 1\n    if n == 5:\n      break\n    elif n == 3:\n      continue\n  for i: i32 = 0, i < 4, i += 1:\n    pass\n  match n:\n    case 0, 1:\n      n = 7\n    else:\n      n = 8\n  return n\n"
    );
    let out = compile_main(&context, &source).unwrap();

    for f in out.module.get_functions() {
        for bb in f.get_basic_blocks() {
            assert!(
                bb.get_terminator().is_some(),
                "unterminated block in {}",
                f.get_name().to_string_lossy()
            );
        }
        // No dead blocks: every block but the entry has a predecessor.
        for bb in f.get_basic_blocks().into_iter().skip(1) {
            assert!(
                bb.get_first_use().is_some(),
                "dead block survived in {}",
                f.get_name().to_string_lossy()
            );
        }
    }
}

#[test]
fn defers_run_in_reverse_order_before_the_terminator() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  x: i32 = 0\n  defer x = x + 1\n  defer x = x * 2\n  return x\n"
    );
    let out = compile_main(&context, &source).unwrap();

    let ir = out.module.print_to_string().to_string();
    let mul_at = ir.find("mul i32").expect("deferred mul missing");
    let add_at = ir.find("add i32").expect("deferred add missing");
    assert!(mul_at < add_at, "defers ran in push order:\n{ir}");

    // The return value is computed before the defers run.
    let user_main = find_fn(&out.module, "main.brim::main");
    let ops = opcodes(user_main);
    let ret_pos = ops.iter().rposition(|op| *op == InstructionOpcode::Return).unwrap();
    let mul_pos = ops.iter().position(|op| *op == InstructionOpcode::Mul).unwrap();
    assert!(mul_pos < ret_pos);
}

#[test]
fn try_with_zero_falls_through_and_nonzero_returns_early() {
    let context = Context::create();
    let source = format!(
        "fn f() -> i32:\n  try 0\n  return 1\nfn g() -> i32:\n  try 5\n  return 1\n{MAIN_SIG}\n  return f() + g()\n"
    );
    let out = compile_main(&context, &source).unwrap();

    for name in ["::f", "::g"] {
        let f = find_fn(&out.module, name);
        let rets = opcodes(f)
            .into_iter()
            .filter(|op| *op == InstructionOpcode::Return)
            .count();
        assert_eq!(rets, 2, "try should produce an early-return path in {name}");
    }
}

#[test]
fn try_with_binding_and_block_compiles() {
    let context = Context::create();
    let source = format!(
        "fn f() -> i32:\n  return 3\n{MAIN_SIG}\n  try err: i32 = f():\n    return err\n  return 0\n"
    );
    compile_main(&context, &source).unwrap();
}

// ── Types and generics ───────────────────────────────────────────────────

#[test]
fn infinite_recursive_layout_is_rejected() {
    let context = Context::create();
    let source = format!("type T = (x: T)\n{MAIN_SIG}\n  t: T = 0\n  return 0\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("infinite recursive layout"), "{}", err.message);
}

#[test]
fn pointer_breaks_recursive_layout() {
    let context = Context::create();
    let source = format!(
        "type T = (x: *T)\n{MAIN_SIG}\n  t: T = (x: None)\n  return 0\n"
    );
    compile_main(&context, &source).unwrap();
}

#[test]
fn generic_named_types_instantiate() {
    let context = Context::create();
    let source = format!(
        "type Box[T] = (v: T)\n{MAIN_SIG}\n  b: Box[i32] = (v: 5)\n  return b.v\n"
    );
    compile_main(&context, &source).unwrap();
}

#[test]
fn generic_type_arity_is_checked() {
    let context = Context::create();
    let source = format!("type Box[T] = (v: T)\n{MAIN_SIG}\n  b: Box = 0\n  return 0\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("generic args"), "{}", err.message);
}

#[test]
fn union_round_trips_through_memory() {
    let context = Context::create();
    let source = format!(
        "type Raw = [tag: u8, word: u64]\n{MAIN_SIG}\n  r: Raw = [word: 9]\n  w: u64 = r.word\n  return (cast(i32) w) * 0\n"
    );
    compile_main(&context, &source).unwrap();
}

#[test]
fn type_size_uses_the_documented_formulas() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  S: u64 = type_size!(|(a: u8, b: u64)|)\n  U: u64 = type_size!(|[a: u8, b: u64]|)\n  A: u64 = type_size!(|[3 x u32]|)\n  return 0\n"
    );
    let out = compile_main(&context, &source).unwrap();
    // All three are comptime constants; nothing but the prologue remains.
    let user_main = find_fn(&out.module, "main.brim::main");
    let ops = opcodes(user_main);
    assert!(!ops.contains(&InstructionOpcode::Call));
}

#[test]
fn string_literals_are_deduplicated_globals() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  a: *u8 = 'hello'\n  b: *u8 = 'hello'\n  s: (ptr: *u8, len: u64) = 'hello'\n  return 0\n"
    );
    let out = compile_main(&context, &source).unwrap();

    let count = out
        .module
        .get_globals()
        .filter(|g| g.get_name().to_string_lossy().contains("str."))
        .count();
    assert_eq!(count, 1, "string literal was not deduplicated");

    let ir = out.module.print_to_string().to_string();
    assert!(ir.contains("i64 5"), "fat pointer length missing:\n{ir}");
}

#[test]
fn globals_are_emitted_on_first_use() {
    let context = Context::create();
    let source = format!(
        "counter: i32 = 41\nLIMIT: i32 = 1\n{MAIN_SIG}\n  return counter + LIMIT\n"
    );
    let out = compile_main(&context, &source).unwrap();

    // `counter` becomes a module global; comptime-named `LIMIT` does not.
    assert!(out
        .module
        .get_globals()
        .any(|g| g.get_name().to_string_lossy().contains("counter")));
    assert!(!out
        .module
        .get_globals()
        .any(|g| g.get_name().to_string_lossy().contains("LIMIT")));
}

// ── Imports ──────────────────────────────────────────────────────────────

#[test]
fn cross_module_calls_resolve_and_mangle() {
    let context = Context::create();
    let out = compile_files(
        &context,
        &[
            (
                "main.brim",
                &format!("from 'util' import *\n{MAIN_SIG}\n  return add(40, 2)\n"),
            ),
            ("util.brim", "fn add(a: i32, b: i32) -> i32:\n  return a + b\n"),
        ],
    )
    .unwrap();

    assert!(out
        .module
        .get_functions()
        .any(|f| f.get_name().to_string_lossy().contains("util.brim::add")));
}

#[test]
fn import_aliases_rename_symbols() {
    let context = Context::create();
    compile_files(
        &context,
        &[
            (
                "main.brim",
                &format!("from 'util' import [add -> plus]\n{MAIN_SIG}\n  return plus(1, 2)\n"),
            ),
            ("util.brim", "fn add(a: i32, b: i32) -> i32:\n  return a + b\n"),
        ],
    )
    .unwrap();
}

#[test]
fn locals_cannot_shadow_imports() {
    let context = Context::create();
    let err = compile_files(
        &context,
        &[
            (
                "main.brim",
                &format!("from 'util' import *\n{MAIN_SIG}\n  add: i32 = 1\n  return add\n"),
            ),
            ("util.brim", "fn add(a: i32, b: i32) -> i32:\n  return a + b\n"),
        ],
    )
    .unwrap_err();
    assert!(err.message.contains("already declared (from import at"), "{}", err.message);
}

// ── Semantic errors ──────────────────────────────────────────────────────

#[test]
fn invalid_main_prototype_is_fatal() {
    let context = Context::create();
    let err = compile_main(&context, "fn main() -> i32:\n  return 0\n").unwrap_err();
    assert!(err.message.contains("invalid `main` prototype"), "{}", err.message);
}

#[test]
fn break_outside_loop_is_fatal() {
    let context = Context::create();
    let err = compile_main(&context, &format!("{MAIN_SIG}\n  break\n  return 0\n")).unwrap_err();
    assert!(err.message.contains("outside of loop body"), "{}", err.message);
}

#[test]
fn unreachable_code_is_fatal() {
    let context = Context::create();
    let err =
        compile_main(&context, &format!("{MAIN_SIG}\n  return 0\n  pass\n")).unwrap_err();
    assert_eq!(err.message, "unreachable code");
}

#[test]
fn type_mismatch_is_fatal() {
    let context = Context::create();
    let err =
        compile_main(&context, &format!("{MAIN_SIG}\n  x: *u8 = 5\n  return 0\n")).unwrap_err();
    assert!(err.message.contains("expected `*u8`"), "{}", err.message);
}

#[test]
fn missing_return_is_fatal() {
    let context = Context::create();
    let source = format!("fn f() -> i32:\n  pass\n{MAIN_SIG}\n  return f()\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("not all paths return a value"), "{}", err.message);
}

#[test]
fn undiscarded_value_statement_is_fatal() {
    let context = Context::create();
    let source = format!("fn f() -> i32:\n  return 1\n{MAIN_SIG}\n  f()\n  return 0\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("undiscarded expression"), "{}", err.message);
}

#[test]
fn discard_assignment_accepts_values() {
    let context = Context::create();
    let source = format!("fn f() -> i32:\n  return 1\n{MAIN_SIG}\n  .. = f()\n  return 0\n");
    compile_main(&context, &source).unwrap();
}

#[test]
fn writing_through_const_pointer_is_fatal() {
    let context = Context::create();
    let source = format!(
        "fn set(p: *i32) -> void:\n  *p = 1\n{MAIN_SIG}\n  x: i32 = 0\n  set(ref x)\n  return x\n"
    );
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("unmutable pointer"), "{}", err.message);
}

#[test]
fn writing_through_mut_pointer_compiles() {
    let context = Context::create();
    let source = format!(
        "fn set(p: *mut i32) -> void:\n  *p = 1\n{MAIN_SIG}\n  x: i32 = 0\n  set(mut x)\n  return x\n"
    );
    compile_main(&context, &source).unwrap();
}

#[test]
fn field_writes_inherit_pointer_mutability() {
    let context = Context::create();
    let source = format!(
        "type Node = (next: *Node, v: i32)\nfn set(n: *Node) -> void:\n  n.*.v = 5\n{MAIN_SIG}\n  n: Node = (next: None, v: 0)\n  set(ref n)\n  return n.v\n"
    );
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("unmutable pointer"), "{}", err.message);
}

#[test]
fn mutable_reference_to_temporary_is_fatal() {
    let context = Context::create();
    let source = format!("{MAIN_SIG}\n  p: *mut i32 = mut (1 + cast(i32) argc)\n  return 0\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("cannot be mutable"), "{}", err.message);
}

#[test]
fn out_params_declare_and_pass_mutable_storage() {
    let context = Context::create();
    let source = format!(
        "fn fill(p: *mut i32) -> void:\n  *p = 9\n{MAIN_SIG}\n  fill(out slot: i32)\n  return slot\n"
    );
    compile_main(&context, &source).unwrap();
}

#[test]
fn comptime_vars_require_comptime_initialisers() {
    let context = Context::create();
    let source = format!("{MAIN_SIG}\n  N: i32 = argc_as()\n  return N\nfn argc_as() -> i32:\n  return 1\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("expected comptime expression"), "{}", err.message);
}

#[test]
fn comptime_vars_fold_into_uses() {
    let context = Context::create();
    let source = format!("{MAIN_SIG}\n  N: i32 = 20 + 1\n  return N + N\n");
    let out = compile_main(&context, &source).unwrap();
    let ir = out.module.print_to_string().to_string();
    assert!(ir.contains("ret i32 42"), "comptime vars should fold:\n{ir}");
}

#[test]
fn arrays_index_and_assign() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  a: [3 x i32] = [1, 2, 3]\n  a[1] = 9\n  p: *i32 = ref a[0]\n  return a[1] + p[0]\n"
    );
    compile_main(&context, &source).unwrap();
}

#[test]
fn enum_literals_are_rejected_by_the_generator() {
    let context = Context::create();
    let source = format!("{MAIN_SIG}\n  x: i32 = .red\n  return 0\n");
    let err = compile_main(&context, &source).unwrap_err();
    assert!(err.message.contains("enum literal"), "{}", err.message);
}

#[test]
fn internal_call_declares_external_once() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  .. = internal_call!(|u64, i32| 'getuid_like', 7)\n  .. = internal_call!(|u64, i32| 'getuid_like', 8)\n  return 0\n"
    );
    let out = compile_main(&context, &source).unwrap();

    let declared = out
        .module
        .get_functions()
        .filter(|f| f.get_name().to_string_lossy() == "getuid_like")
        .count();
    assert_eq!(declared, 1);
}

#[test]
fn extern_call_records_library_dependencies() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  .. = extern_call!(|u64, i32| 'libs/sys.a', 'read_like', 7)\n  return 0\n"
    );
    let out = compile_main(&context, &source).unwrap();
    assert!(out.libs.iter().any(|lib| lib.ends_with("libs/sys.a")), "{:?}", out.libs);
}

#[test]
fn inline_if_folds_constant_conditions() {
    let context = Context::create();
    let source = format!("{MAIN_SIG}\n  x: i32 = (1 if True else 2)\n  return x\n");
    let out = compile_main(&context, &source).unwrap();

    let user_main = find_fn(&out.module, "main.brim::main");
    assert!(!opcodes(user_main).contains(&InstructionOpcode::Phi));
}

#[test]
fn ptr2int_round_trip_compiles() {
    let context = Context::create();
    let source = format!(
        "{MAIN_SIG}\n  x: i32 = 0\n  n: u64 = ptr2int!(|u64| ref x)\n  p: *u8 = int2ptr!(|*u8| n)\n  return 0\n"
    );
    compile_main(&context, &source).unwrap();
}
