//! The Brim compiler CLI.
//!
//! `brimc <root.brim>` compiles the root source file and everything it
//! imports into one verified LLVM module, serialised as textual IR next to
//! the input (or at `--emit`). `--debug`/`--release` toggle the
//! `is_debug_build!`/`is_release_build!` intrinsics. Exit code 0 on
//! success, 1 on the first fatal diagnostic.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use inkwell::context::Context;

use brim_codegen::{compile, load_unit, BuildMode, CompileOptions, SourceLoader};

#[derive(Parser)]
#[command(name = "brimc", version, about = "The Brim compiler")]
struct Cli {
    /// Path to the root source file
    file: PathBuf,

    /// Debug build: `is_debug_build!` is 1 (the default)
    #[arg(long, conflicts_with = "release")]
    debug: bool,

    /// Release build: `is_release_build!` is 1
    #[arg(long)]
    release: bool,

    /// Output path for the textual LLVM IR (defaults to the input with a
    /// `.ll` extension)
    #[arg(long)]
    emit: Option<PathBuf>,
}

/// Filesystem-backed module loading for the core.
struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| e.to_string())
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(message) = build(&cli) {
        eprintln!("error: {message}");
        process::exit(1);
    }
}

fn build(cli: &Cli) -> Result<(), String> {
    if !cli.file.exists() {
        return Err(format!("source file '{}' does not exist", cli.file.display()));
    }

    let mode = if cli.release { BuildMode::Release } else { BuildMode::Debug };

    let unit = load_unit(&FsLoader, &cli.file).map_err(|d| d.to_string())?;

    let context = Context::create();
    let output = compile(&context, &unit, &CompileOptions { mode }).map_err(|d| d.to_string())?;

    let out_path = cli
        .emit
        .clone()
        .unwrap_or_else(|| cli.file.with_extension("ll"));
    output
        .module
        .print_to_file(&out_path)
        .map_err(|e| format!("failed to write '{}': {}", out_path.display(), e))?;

    for lib in &output.libs {
        eprintln!("  link: {}", lib.display());
    }
    eprintln!("  LLVM IR: {}", out_path.display());

    Ok(())
}
