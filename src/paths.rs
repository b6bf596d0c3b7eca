//! Path helpers shared by the analyzer, the store and the query facade.
//!
//! Store keys are absolute, lexically normalized paths under the canonical
//! project root. Paths reported by the OS for deleted files cannot be
//! canonicalized, so normalization here is purely lexical.

use std::path::{Component, Path, PathBuf};

use crate::error::{CodectxError, Result};

/// Removes `.` components and folds `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Makes `path` absolute against `base` (if relative) and normalizes it.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Resolves a user-supplied path that must exist on disk.
///
/// Relative paths are taken relative to `base`. The result is canonical,
/// so symlinked inputs map onto the same keys the walker produced.
pub fn resolve_existing(path: &Path, base: &Path) -> Result<PathBuf> {
    let candidate = absolutize(path, base);
    if !candidate.exists() {
        return Err(CodectxError::PathResolution {
            path: path.to_path_buf(),
            reason: "path does not exist".to_string(),
        });
    }
    candidate
        .canonicalize()
        .map_err(|e| CodectxError::PathResolution {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Relative POSIX-style rendering of `path` under `root`, or `None` if it lies outside.
pub fn relative_posix(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_folds_dots() {
        assert_eq!(
            normalize(Path::new("/proj/./src/../lib/mod.py")),
            PathBuf::from("/proj/lib/mod.py")
        );
    }

    #[test]
    fn test_absolutize_relative() {
        assert_eq!(
            absolutize(Path::new("pkg/a.py"), Path::new("/proj")),
            PathBuf::from("/proj/pkg/a.py")
        );
        assert_eq!(
            absolutize(Path::new("/other/b.py"), Path::new("/proj")),
            PathBuf::from("/other/b.py")
        );
    }

    #[test]
    fn test_relative_posix() {
        let root = Path::new("/proj");
        assert_eq!(
            relative_posix(Path::new("/proj/lib/helpers.py"), root),
            Some("lib/helpers.py".to_string())
        );
        assert_eq!(relative_posix(Path::new("/elsewhere/x.py"), root), None);
    }

    #[test]
    fn test_resolve_existing_missing_path() {
        let dir = TempDir::new().unwrap();
        let err = resolve_existing(Path::new("missing.py"), dir.path()).unwrap_err();
        assert!(matches!(err, CodectxError::PathResolution { .. }));
    }

    #[test]
    fn test_resolve_existing_relative_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1").unwrap();
        let resolved = resolve_existing(Path::new("a.py"), dir.path()).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a.py"));
    }
}
