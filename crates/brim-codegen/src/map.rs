//! Module symbol mapping.
//!
//! The mapper walks a module's top-level declarations and builds its base
//! symbol table, enforcing the reserved-name and duplicate checks. Import
//! records are resolved to module ids by the loader and kept with their
//! aliases; the generator consults them during name lookup.

use brim_common::error::{Diagnostic, Result, Stage};
use brim_common::span::Pos;
use brim_parser::ast::{Item, Module};
use rustc_hash::FxHashMap;

/// Identifiers that name primitive types and can never be declared.
pub const RESERVED_NAMES: &[&str] = &[
    "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "void",
];

/// Index of a module inside a [`crate::unit::Unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Fn,
    Type,
    GenericType,
    GlobalVar,
}

/// A module-level symbol: its kind plus the item that declared it.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub module: ModuleId,
    pub item: usize,
}

/// A module's base symbol table.
#[derive(Debug, Default)]
pub struct ModuleMap {
    symbols: FxHashMap<String, Symbol>,
    /// Item indices of `test "…":` blocks; they carry no identifier and
    /// live outside the symbol table.
    pub tests: Vec<usize>,
}

impl ModuleMap {
    pub fn declare(&mut self, name: &str, sym: Symbol, pos: Pos) -> Result<()> {
        if RESERVED_NAMES.contains(&name) {
            return Err(Diagnostic::new(
                Stage::Map,
                format!("symbol `{name}` is reserved"),
                pos,
            ));
        }
        if self.symbols.contains_key(name) {
            return Err(Diagnostic::new(
                Stage::Map,
                format!("symbol `{name}` already declared"),
                pos,
            ));
        }

        self.symbols.insert(name.to_string(), sym);
        Ok(())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).copied()
    }
}

/// One `from … import …` edge, with the import list kept verbatim.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub target: ModuleId,
    pub items: ImportList,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum ImportList {
    /// `import *`: every symbol of the target module, re-exported.
    All,
    /// `import [name -> alias, …]`.
    Ids(Vec<ImportedId>),
}

#[derive(Debug, Clone)]
pub struct ImportedId {
    pub name: String,
    pub alias: String,
    pub pos: Pos,
}

/// Build a module's base symbol table from its top-level declarations.
pub fn map_module(module: &Module, id: ModuleId) -> Result<ModuleMap> {
    let mut map = ModuleMap::default();

    for (index, item) in module.items.iter().enumerate() {
        match item {
            Item::Fn(decl) => {
                let sym = Symbol { kind: SymbolKind::Fn, module: id, item: index };
                map.declare(&decl.name.name, sym, decl.name.pos)?;
            }
            Item::TypeDecl(decl) => {
                let kind = if decl.generics.is_empty() {
                    SymbolKind::Type
                } else {
                    SymbolKind::GenericType
                };
                let sym = Symbol { kind, module: id, item: index };
                map.declare(&decl.name.name, sym, decl.name.pos)?;
            }
            Item::Global(decl) => {
                let sym = Symbol { kind: SymbolKind::GlobalVar, module: id, item: index };
                map.declare(&decl.name.name, sym, decl.name.pos)?;
            }
            Item::Test(_) => map.tests.push(index),
            Item::Import(_) => {}
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brim_parser::parse;

    #[test]
    fn maps_declaration_kinds() {
        let module = parse(
            "type T = (x: i32)\ntype P[A] = (v: A)\nfn f() -> void:\n  pass\ng: i32 = 1\ntest 'works':\n  pass\n",
        )
        .unwrap();
        let map = map_module(&module, ModuleId(0)).unwrap();

        assert_eq!(map.get("T").unwrap().kind, SymbolKind::Type);
        assert_eq!(map.get("P").unwrap().kind, SymbolKind::GenericType);
        assert_eq!(map.get("f").unwrap().kind, SymbolKind::Fn);
        assert_eq!(map.get("g").unwrap().kind, SymbolKind::GlobalVar);
        assert_eq!(map.tests.len(), 1);
        assert!(!map.is_declared("works"));
    }

    #[test]
    fn duplicate_declaration_is_fatal() {
        let module = parse("fn f() -> void:\n  pass\nf: i32 = 1\n").unwrap();
        let err = map_module(&module, ModuleId(0)).unwrap_err();
        assert_eq!(err.message, "symbol `f` already declared");
    }

    #[test]
    fn reserved_names_cannot_be_declared() {
        let module = parse("fn u8() -> void:\n  pass\n").unwrap();
        let err = map_module(&module, ModuleId(0)).unwrap_err();
        assert_eq!(err.message, "symbol `u8` is reserved");
    }
}
