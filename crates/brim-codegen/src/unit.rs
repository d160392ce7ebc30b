//! Module loading: source text to a fully mapped set of modules.
//!
//! The loader resolves `from 'path' import …` edges relative to the
//! importing file, normalises the result to one canonical path per module,
//! and caches modules by that path. A module's id is reserved before its
//! imports are followed, so import cycles resolve instead of recursing.
//!
//! File access goes through [`SourceLoader`] so the core stays free of
//! filesystem I/O; the driver plugs in a filesystem loader, tests an
//! in-memory one.

use std::path::{Path, PathBuf};

use brim_common::error::{Diagnostic, Result, Stage};
use brim_common::paths;
use brim_common::span::Pos;
use brim_lexer::Lexer;
use brim_parser::ast::{ImportItems, Item, Module};
use brim_parser::parse_tokens;
use rustc_hash::FxHashMap;

use crate::map::{map_module, ImportList, ImportRecord, ImportedId, ModuleId, ModuleMap};

/// Provides module source text by normalised path.
pub trait SourceLoader {
    fn load(&self, path: &Path) -> std::result::Result<String, String>;
}

/// An in-memory loader for tests and tooling.
#[derive(Default)]
pub struct MemoryLoader {
    sources: FxHashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> &mut Self {
        self.sources.insert(paths::normalize(&path.into()), source.into());
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &Path) -> std::result::Result<String, String> {
        self.sources
            .get(path)
            .cloned()
            .ok_or_else(|| format!("no such module: {}", path.display()))
    }
}

/// A loaded, mapped module.
pub struct ModuleUnit {
    pub path: PathBuf,
    /// The path as used in mangled names and diagnostics.
    pub display_path: String,
    pub ast: Module,
    pub map: ModuleMap,
    pub imports: Vec<ImportRecord>,
}

/// Every module reachable from the root, the root first.
pub struct Unit {
    pub modules: Vec<ModuleUnit>,
    pub root: ModuleId,
}

impl Unit {
    pub fn module(&self, id: ModuleId) -> &ModuleUnit {
        &self.modules[id.0]
    }

    pub fn item(&self, module: ModuleId, item: usize) -> &Item {
        &self.module(module).ast.items[item]
    }
}

/// Load, parse and map the root module and everything it imports.
pub fn load_unit(loader: &dyn SourceLoader, root: &Path) -> Result<Unit> {
    let mut state = LoadState {
        loader,
        modules: Vec::new(),
        index: FxHashMap::default(),
    };

    let root_path = paths::normalize(root);
    let root_id = state.load(&root_path, Pos::START, None)?;

    let modules = state
        .modules
        .into_iter()
        .map(|slot| slot.expect("all reserved modules are filled"))
        .collect();

    Ok(Unit { modules, root: root_id })
}

struct LoadState<'l> {
    loader: &'l dyn SourceLoader,
    modules: Vec<Option<ModuleUnit>>,
    index: FxHashMap<PathBuf, ModuleId>,
}

impl LoadState<'_> {
    fn load(&mut self, path: &Path, pos: Pos, importer: Option<&Path>) -> Result<ModuleId> {
        if let Some(&id) = self.index.get(path) {
            return Ok(id);
        }

        let source = self.loader.load(path).map_err(|e| {
            let diag = Diagnostic::new(Stage::Map, format!("cannot load module: {e}"), pos);
            match importer {
                Some(importer) => diag.with_path(importer),
                None => diag.with_path(path),
            }
        })?;

        let tokens = Lexer::tokenize(&source).map_err(|d| d.with_path(path))?;
        let ast = parse_tokens(tokens).map_err(|d| d.with_path(path))?;

        // Reserve the id before walking imports so cycles terminate.
        let id = ModuleId(self.modules.len());
        self.modules.push(None);
        self.index.insert(path.to_path_buf(), id);

        let map = map_module(&ast, id).map_err(|d| d.with_path(path))?;

        let mut imports = Vec::new();
        for item in &ast.items {
            let Item::Import(decl) = item else { continue };

            let target_path = paths::resolve_import(path, &decl.path);
            let target = self.load(&target_path, decl.pos, Some(path))?;

            let items = match &decl.items {
                ImportItems::All => ImportList::All,
                ImportItems::List(ids) => ImportList::Ids(
                    ids.iter()
                        .map(|id| ImportedId {
                            name: id.name.name.clone(),
                            alias: id.alias.name.clone(),
                            pos: id.alias.pos,
                        })
                        .collect(),
                ),
            };
            imports.push(ImportRecord { target, items, pos: decl.pos });
        }

        self.modules[id.0] = Some(ModuleUnit {
            path: path.to_path_buf(),
            display_path: path.display().to_string(),
            ast,
            map,
            imports,
        });

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_transitive_imports_once() {
        let mut loader = MemoryLoader::new();
        loader
            .add("main.brim", "from 'a' import *\nfrom 'b' import *\n")
            .add("a.brim", "from 'b' import *\n")
            .add("b.brim", "fn shared() -> void:\n  pass\n");

        let unit = load_unit(&loader, Path::new("main.brim")).unwrap();
        assert_eq!(unit.modules.len(), 3);
        assert_eq!(unit.module(unit.root).imports.len(), 2);
    }

    #[test]
    fn import_cycles_resolve() {
        let mut loader = MemoryLoader::new();
        loader
            .add("a.brim", "from 'b' import *\nfn fa() -> void:\n  pass\n")
            .add("b.brim", "from 'a' import *\nfn fb() -> void:\n  pass\n");

        let unit = load_unit(&loader, Path::new("a.brim")).unwrap();
        assert_eq!(unit.modules.len(), 2);
    }

    #[test]
    fn missing_module_reports_import_site() {
        let mut loader = MemoryLoader::new();
        loader.add("main.brim", "from 'gone' import *\n");

        let err = load_unit(&loader, Path::new("main.brim")).unwrap_err();
        assert!(err.message.contains("cannot load module"), "{}", err.message);
        assert_eq!(err.path.as_deref(), Some(Path::new("main.brim")));
        assert_eq!(err.pos.line, 1);
    }

    #[test]
    fn relative_imports_resolve_against_importer_dir() {
        let mut loader = MemoryLoader::new();
        loader
            .add("src/main.brim", "from './util/log' import *\n")
            .add("src/util/log.brim", "fn log() -> void:\n  pass\n");

        let unit = load_unit(&loader, Path::new("src/main.brim")).unwrap();
        assert_eq!(unit.modules.len(), 2);
        assert_eq!(unit.modules[1].path, PathBuf::from("src/util/log.brim"));
    }
}
