// Brim codegen -- symbol mapping, type evaluation and LLVM IR generation.

pub mod codegen;
pub mod map;
pub mod rt;
pub mod unit;

pub use codegen::{compile, BuildMode, Codegen, CompileOptions, CompileOutput};
pub use map::{ModuleId, Symbol, SymbolKind};
pub use unit::{load_unit, MemoryLoader, ModuleUnit, SourceLoader, Unit};
