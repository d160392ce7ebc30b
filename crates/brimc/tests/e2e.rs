//! End-to-end driver tests: write Brim sources to a temp directory, invoke
//! the built `brimc` binary, and check exit codes and emitted IR.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn brimc() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_brimc"))
}

fn write_project(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    for (name, source) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create module dir");
        }
        std::fs::write(&path, source).expect("failed to write source");
    }
    dir
}

fn run_brimc(root: &Path, extra_args: &[&str]) -> Output {
    Command::new(brimc())
        .arg(root)
        .args(extra_args)
        .output()
        .expect("failed to invoke brimc")
}

const MAIN_OK: &str = "fn main(argc: u32, argv: *(*u8)) -> i32:\n  return 0\n";

#[test]
fn compiles_trivial_main_and_emits_ir() {
    let dir = write_project(&[("main.brim", MAIN_OK)]);
    let out = run_brimc(&dir.path().join("main.brim"), &[]);

    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let ll = dir.path().join("main.ll");
    assert!(ll.exists(), "expected {} to be written", ll.display());

    let ir = std::fs::read_to_string(&ll).unwrap();
    assert!(ir.contains("define i32 @main"), "wrapper main missing:\n{ir}");
}

#[test]
fn emit_flag_overrides_output_path() {
    let dir = write_project(&[("main.brim", MAIN_OK)]);
    let custom = dir.path().join("out").join("program.ll");
    std::fs::create_dir_all(custom.parent().unwrap()).unwrap();

    let out = run_brimc(
        &dir.path().join("main.brim"),
        &["--emit", custom.to_str().unwrap()],
    );

    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(custom.exists());
}

#[test]
fn compiles_imports_across_files() {
    let dir = write_project(&[
        (
            "main.brim",
            "from 'math/ops' import [add]\nfn main(argc: u32, argv: *(*u8)) -> i32:\n  return add(40, 2)\n",
        ),
        (
            "math/ops.brim",
            "fn add(a: i32, b: i32) -> i32:\n  return a + b\n",
        ),
    ]);

    let out = run_brimc(&dir.path().join("main.brim"), &[]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let ir = std::fs::read_to_string(dir.path().join("main.ll")).unwrap();
    assert!(ir.contains("ops.brim::add"), "imported fn not mangled into IR:\n{ir}");
}

#[test]
fn release_flag_flips_build_intrinsics() {
    let source = "fn main(argc: u32, argv: *(*u8)) -> i32:\n  x: i32 = 1\n  if is_release_build!():\n    x = 2\n  return x\n";
    let dir = write_project(&[("main.brim", source)]);

    for (flag, ok) in [("--debug", true), ("--release", true)] {
        let out = run_brimc(&dir.path().join("main.brim"), &[flag]);
        assert_eq!(out.status.success(), ok, "flag {flag}");
    }
}

#[test]
fn lex_errors_exit_nonzero() {
    let dir = write_project(&[("main.brim", "fn main() -> i32:\n\treturn 0\n")]);
    let out = run_brimc(&dir.path().join("main.brim"), &[]);

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("tab illegal"), "stderr: {stderr}");
}

#[test]
fn semantic_errors_carry_path_and_position() {
    let dir = write_project(&[(
        "main.brim",
        "fn main(argc: u32, argv: *(*u8)) -> i32:\n  return missing\n",
    )]);
    let out = run_brimc(&dir.path().join("main.brim"), &[]);

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("symbol `missing` not declared"), "stderr: {stderr}");
    assert!(stderr.contains("main.brim:2:"), "stderr: {stderr}");
}

#[test]
fn missing_file_exits_nonzero() {
    let dir = write_project(&[]);
    let out = run_brimc(&dir.path().join("gone.brim"), &[]);
    assert!(!out.status.success());
}

#[test]
fn invalid_main_signature_is_rejected() {
    let dir = write_project(&[("main.brim", "fn main() -> i32:\n  return 0\n")]);
    let out = run_brimc(&dir.path().join("main.brim"), &[]);

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid `main` prototype"), "stderr: {stderr}");
}
