//! Import-path resolution helpers.
//!
//! `from 'path' import …` paths are resolved relative to the importing
//! file's directory, get the default `.brim` extension when none is given,
//! and are normalised lexically (no filesystem access) so that every module
//! has one canonical cache key.

use std::path::{Component, Path, PathBuf};

/// File extension of Brim sources.
pub const SOURCE_EXTENSION: &str = "brim";

/// Resolve an import string against the directory of the importing module.
pub fn resolve_import(importer: &Path, import: &str) -> PathBuf {
    let dir = importer.parent().unwrap_or_else(|| Path::new(""));
    let mut target = dir.join(import);

    if target.extension().is_none() {
        target.set_extension(SOURCE_EXTENSION);
    }

    normalize(&target)
}

/// Resolve an arbitrary relative path (a linked library, not a module)
/// against the directory of the referencing module. No extension is added.
pub fn resolve_relative(importer: &Path, relative: &str) -> PathBuf {
    let dir = importer.parent().unwrap_or_else(|| Path::new(""));
    normalize(&dir.join(relative))
}

/// Collapse `.` and `..` segments without touching the filesystem.
///
/// Leading `..` segments that would escape the root of a relative path are
/// kept as-is.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();

    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }

    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_extension() {
        let p = resolve_import(Path::new("src/main.brim"), "util");
        assert_eq!(p, PathBuf::from("src/util.brim"));
    }

    #[test]
    fn keeps_explicit_extension() {
        let p = resolve_import(Path::new("src/main.brim"), "util.brim");
        assert_eq!(p, PathBuf::from("src/util.brim"));
    }

    #[test]
    fn collapses_dot_segments() {
        let p = resolve_import(Path::new("a/b/main.brim"), "./c/../d/mod");
        assert_eq!(p, PathBuf::from("a/b/d/mod.brim"));
    }

    #[test]
    fn parent_segments_walk_up() {
        let p = resolve_import(Path::new("a/b/main.brim"), "../shared/lib");
        assert_eq!(p, PathBuf::from("a/shared/lib.brim"));
    }

    #[test]
    fn leading_parent_segments_survive() {
        assert_eq!(normalize(Path::new("../x/./y")), PathBuf::from("../x/y"));
    }
}
