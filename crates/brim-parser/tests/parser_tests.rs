//! Parser integration tests: structure, the print/re-parse idempotence law,
//! and the parser's fatal-error surface.

use brim_parser::ast::*;
use brim_parser::parse;

/// Pretty-print, re-parse, and re-print: the two printed forms must agree.
fn assert_idempotent(source: &str) {
    let first = parse(source).expect("source must parse");
    let printed = first.to_string();
    let second = parse(&printed)
        .unwrap_or_else(|e| panic!("printed form must re-parse: {e}\n---\n{printed}"));
    assert_eq!(printed, second.to_string(), "print fixpoint for:\n{source}");
    assert_eq!(first, second, "structural equality through the printer");
}

#[test]
fn idempotent_basic_function() {
    assert_idempotent("fn main(argc: u32, argv: *(*u8)) -> i32:\n  x: i32 = 2 + 3 * 4\n  return x\n");
}

#[test]
fn idempotent_control_flow() {
    assert_idempotent(
        "fn f(n: i32) -> i32:\n  while n > 0:\n    n -= 1\n    if n == 5:\n      break\n    elif n == 2:\n      continue\n    else:\n      pass\n  return n\n",
    );
}

#[test]
fn idempotent_for_and_defer() {
    assert_idempotent(
        "fn f() -> void:\n  for i: i32 = 0, i < 10, i += 1:\n    pass\n  for .., True, ..:\n    break\n  defer f()\n  defer:\n    x: i32 = 1\n    x = 2\n",
    );
}

#[test]
fn idempotent_types_and_generics() {
    assert_idempotent(
        "type Node = (next: *Node, v: i32)\ntype Pair[T, U] = (a: T, b: U)\ntype Raw = [tag: u8, word: u64]\ntype Buf = [16 x u8]\ntype V4 = <4 x f32>\ntype Cb = fn(i32, *u8) -> void\nfn id(|T| x: T) -> T:\n  return x\nfn main() -> i32:\n  return id(|i32| 42)\n",
    );
}

#[test]
fn idempotent_try_match_imports() {
    assert_idempotent(
        "from 'util' import *\nfrom 'io' import [open -> fopen, close]\nfn f() -> i32:\n  try 0\n  try err: i32 = f():\n    return err\n  match f():\n    case 0, 1:\n      pass\n    else:\n      pass\n  return 1\n",
    );
}

#[test]
fn idempotent_expressions() {
    assert_idempotent(
        "fn g(p: *mut i32, n: i32) -> i32:\n  *p = n + 1\n  q: *mut i32 = mut n\n  r: *i32 = ref n\n  s: i32 = cast(i32) n\n  a: [2 x i32] = [1, 2]\n  .. = g(p, a[0])\n  return (1 if n == 0 else 2)\n",
    );
}

#[test]
fn idempotent_struct_and_union_literals() {
    assert_idempotent(
        "type Node = (next: *Node, v: i32)\nfn main() -> i32:\n  n: Node = (next: None, v: 7)\n  u: [tag: u8, word: u64] = [tag: 3]\n  return n.v\n",
    );
}

#[test]
fn idempotent_tests_and_globals() {
    assert_idempotent(
        "LIMIT: i32 = 100\ngreeting: *u8 = 'hi'\ntest 'limits hold':\n  x: i32 = LIMIT\n  x = 0\n",
    );
}

// ── Structure ────────────────────────────────────────────────────────────

#[test]
fn ufcs_call_prepends_receiver() {
    let module = parse("fn f() -> void:\n  a.push(1)\n").unwrap();
    let Item::Fn(f) = &module.items[0] else { panic!() };
    let StmtKind::Expr(expr) = &f.body[0].kind else { panic!() };
    let ExprKind::Call(call) = &expr.kind else { panic!() };
    assert_eq!(call.name.name, "push");
    assert_eq!(call.args.len(), 2);
    assert!(matches!(
        &call.args[0],
        CallArg::Expr(Expr { kind: ExprKind::Id(name), .. }) if name == "a"
    ));
}

#[test]
fn chained_postfix_forms_desugar_to_prefix() {
    let module = parse("fn f(p: *Node) -> i32:\n  return p.*.v\n").unwrap();
    let Item::Fn(f) = &module.items[0] else { panic!() };
    let StmtKind::Return(Some(expr)) = &f.body[0].kind else { panic!() };
    let ExprKind::Dot { base, field } = &expr.kind else {
        panic!("field access expected, got {expr:?}");
    };
    assert_eq!(field.name, "v");
    assert!(matches!(
        base.kind,
        ExprKind::Unary { op: UnaryOp::Deref, chained: true, .. }
    ));
}

#[test]
fn precedence_and_binds_tighter_than_or() {
    let module = parse("fn f() -> void:\n  x: u8 = a or b and c\n").unwrap();
    let Item::Fn(f) = &module.items[0] else { panic!() };
    let StmtKind::VarDecl(decl) = &f.body[0].kind else { panic!() };
    let ExprKind::Bin { op: BinOp::Or, rhs, .. } = &decl.init.kind else { panic!() };
    assert!(matches!(rhs.kind, ExprKind::Bin { op: BinOp::And, .. }));
}

#[test]
fn internal_call_flag_is_set() {
    let module = parse("fn f() -> u64:\n  return type_size!(|u64|)\n").unwrap();
    let Item::Fn(f) = &module.items[0] else { panic!() };
    let StmtKind::Return(Some(expr)) = &f.body[0].kind else { panic!() };
    let ExprKind::Call(call) = &expr.kind else { panic!() };
    assert!(call.internal);
    assert_eq!(call.generics.len(), 1);
}

// ── Errors ───────────────────────────────────────────────────────────────

#[test]
fn inlined_block_is_rejected() {
    let err = parse("fn f() -> void: pass\n").unwrap_err();
    assert_eq!(err.message, "blocks cannot be inlined");
}

#[test]
fn shallow_block_indent_is_rejected() {
    let err = parse("fn f() -> void:\npass\n").unwrap_err();
    assert_eq!(err.message, "invalid indent");
}

#[test]
fn uneven_sibling_indent_is_rejected() {
    let err = parse("fn f() -> void:\n  pass\n   pass\n").unwrap_err();
    assert_eq!(err.message, "invalid indent");
}

#[test]
fn chained_form_must_chain() {
    let err = parse("fn f(x: i32) -> *i32:\n  return x.ref\n").unwrap_err();
    assert!(err.message.contains("reserved for chaining"), "{}", err.message);
}

#[test]
fn union_initializer_single_field() {
    let err = parse("fn f() -> void:\n  u: [a: u8, b: u64] = [a: 1, b: 2]\n").unwrap_err();
    assert!(err.message.contains("one field assignment"), "{}", err.message);
}

#[test]
fn try_var_requires_block() {
    let err = parse("fn f() -> i32:\n  try e: i32 = f()\n  return 0\n").unwrap_err();
    assert!(err.message.contains("no block"), "{}", err.message);
}

#[test]
fn return_is_rejected_inside_defer_blocks() {
    let err = parse("fn f() -> void:\n  defer:\n    return\n").unwrap_err();
    assert_eq!(err.message, "this statement is not allowed here");
}

#[test]
fn control_flow_is_rejected_in_nested_defer_blocks() {
    let err = parse("fn f() -> void:\n  defer:\n    if True:\n      break\n").unwrap_err();
    assert_eq!(err.message, "this statement is not allowed here");
}

#[test]
fn statement_tail_garbage_is_rejected() {
    let err = parse("fn f() -> void:\n  pass pass\n").unwrap_err();
    assert!(err.message.contains("end of a statement"), "{}", err.message);
}

#[test]
fn globals_must_start_at_column_zero() {
    let err = parse("fn f() -> void:\n  pass\n x: i32 = 1\n").unwrap_err();
    assert_eq!(err.message, "global has bad indent");
}

#[test]
fn match_requires_cases() {
    let err = parse("fn f(x: i32) -> void:\n  match x:\n    else:\n      pass\n").unwrap_err();
    assert!(err.message.contains("at least one case"), "{}", err.message);
}

#[test]
fn eof_inside_expression_is_reported() {
    let err = parse("fn f() -> i32:\n  return 1 +").unwrap_err();
    assert_eq!(err.message, "unexpected `eof`");
}
