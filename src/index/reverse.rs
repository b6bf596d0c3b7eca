//! Reverse-dependency index: file -> files that import it.
//!
//! Resolution is best-effort. An internal import contributes an edge only
//! when its module name maps onto a `<name>.py` module or a
//! `<name>/__init__.py` package that is itself a key in the record map.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::index::models::{DependencyKind, DependencyRecord, FileRecord};
use crate::languages::python::MODULE_EXTENSIONS;
use crate::paths;

#[derive(Debug, Default, Clone)]
pub struct ReverseDependencyIndex {
    dependents: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl ReverseDependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the whole index from the current record map.
    pub fn build(root: &Path, records: &HashMap<PathBuf, FileRecord>) -> Self {
        let mut dependents: HashMap<PathBuf, BTreeSet<PathBuf>> = HashMap::new();

        for record in records.values() {
            for dep in record.internal_dependencies() {
                let Some(target) = resolve_dependency(root, &record.path, dep, |p| {
                    records.contains_key(p)
                }) else {
                    continue;
                };
                if target == record.path {
                    continue;
                }
                dependents
                    .entry(target)
                    .or_default()
                    .insert(record.path.clone());
            }
        }

        Self { dependents }
    }

    /// Files that import `path`, sorted.
    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        self.dependents
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    /// Number of (target, dependent) edges.
    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(BTreeSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.dependents.clear();
    }
}

/// Maps an import written in `importer` onto a file for which `is_known` holds.
///
/// Relative imports start at the importer's directory and ascend one
/// directory per level beyond the first (Python semantics). Absolute
/// internal imports start at the project root. External imports never
/// resolve.
pub fn resolve_dependency(
    root: &Path,
    importer: &Path,
    dep: &DependencyRecord,
    is_known: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let base = match dep.kind {
        DependencyKind::External => return None,
        DependencyKind::InternalAbsolute => root.to_path_buf(),
        DependencyKind::InternalRelative { level } => {
            let mut dir = importer.parent()?.to_path_buf();
            for _ in 1..level {
                if !dir.pop() {
                    return None;
                }
            }
            dir
        }
    };

    let mut module_dir = base;
    for part in dep.module_name.split('.').filter(|p| !p.is_empty()) {
        module_dir.push(part);
    }

    candidates(&module_dir, dep.module_name.is_empty())
        .into_iter()
        .map(|c| paths::normalize(&c))
        .find(|c| is_known(c))
}

fn candidates(module_path: &Path, package_only: bool) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(MODULE_EXTENSIONS.len() * 2);
    if !package_only {
        for ext in MODULE_EXTENSIONS {
            out.push(module_path.with_extension(ext));
        }
    }
    for ext in MODULE_EXTENSIONS {
        out.push(module_path.join(format!("__init__.{}", ext)));
    }
    out
}
