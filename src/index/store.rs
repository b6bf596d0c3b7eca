//! In-memory Analysis Store.
//!
//! Records and the reverse-dependency index live behind one mutex so a
//! reader never sees an index that disagrees with the records. Callers do
//! all file I/O before calling into the store; the lock only covers the
//! in-memory update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::index::models::{DependencyRecord, FileRecord};
use crate::index::reverse::ReverseDependencyIndex;

/// Counters describing how the store has been mutated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub files: usize,
    pub dependency_edges: usize,
    pub upserts: u64,
    pub removals: u64,
    pub full_replacements: u64,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<PathBuf, FileRecord>,
    reverse: ReverseDependencyIndex,
    analyzed: bool,
    upserts: u64,
    removals: u64,
    full_replacements: u64,
}

pub struct AnalysisStore {
    root: PathBuf,
    state: Mutex<StoreState>,
}

impl AnalysisStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Mutations swap in fully built values, so a poisoned lock still guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces every record and marks the store as analyzed.
    pub fn replace_all(&self, records: Vec<FileRecord>) {
        let map: HashMap<PathBuf, FileRecord> = records
            .into_iter()
            .filter(|r| {
                let inside = r.path.starts_with(&self.root);
                if !inside {
                    tracing::warn!("Dropping record outside project root: {}", r.path.display());
                }
                inside
            })
            .map(|r| (r.path.clone(), r))
            .collect();
        let reverse = ReverseDependencyIndex::build(&self.root, &map);

        let mut state = self.lock();
        state.records = map;
        state.reverse = reverse;
        state.analyzed = true;
        state.full_replacements += 1;
        tracing::debug!(
            "Store replaced: {} files, {} dependency edges",
            state.records.len(),
            state.reverse.edge_count()
        );
    }

    /// Inserts or replaces the record for its path and rebuilds the index.
    pub fn upsert(&self, record: FileRecord) {
        if !record.path.starts_with(&self.root) {
            tracing::warn!(
                "Refusing to store record outside project root: {}",
                record.path.display()
            );
            return;
        }
        let mut state = self.lock();
        state.records.insert(record.path.clone(), record);
        state.reverse = ReverseDependencyIndex::build(&self.root, &state.records);
        state.upserts += 1;
    }

    /// Removes the record for `path`. Returns the removed record, if any.
    pub fn remove(&self, path: &Path) -> Option<FileRecord> {
        let mut state = self.lock();
        let removed = state.records.remove(path);
        if removed.is_some() {
            state.reverse = ReverseDependencyIndex::build(&self.root, &state.records);
            state.removals += 1;
        }
        removed
    }

    /// Copy of all records, sorted by path.
    pub fn snapshot(&self) -> Vec<FileRecord> {
        let state = self.lock();
        let mut records: Vec<FileRecord> = state.records.values().cloned().collect();
        drop(state);
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    pub fn get(&self, path: &Path) -> Option<FileRecord> {
        self.lock().records.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().records.contains_key(path)
    }

    /// True if any stored path lies strictly below `dir`.
    pub fn has_descendants(&self, dir: &Path) -> bool {
        self.lock()
            .records
            .keys()
            .any(|p| p != dir && p.starts_with(dir))
    }

    /// True if any stored file has a dependency matching `pred`.
    pub fn any_dependency(&self, pred: impl Fn(&DependencyRecord) -> bool) -> bool {
        self.lock()
            .records
            .values()
            .any(|r| r.dependencies.iter().any(&pred))
    }

    /// Files that import `path`, sorted.
    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        self.lock().reverse.dependents_of(path)
    }

    pub fn is_analyzed(&self) -> bool {
        self.lock().analyzed
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all records and resets the analyzed flag.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.reverse.clear();
        state.analyzed = false;
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.lock();
        StoreStats {
            files: state.records.len(),
            dependency_edges: state.reverse.edge_count(),
            upserts: state.upserts,
            removals: state.removals,
            full_replacements: state.full_replacements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::models::DependencyKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::UNIX_EPOCH;

    fn rec(path: &str) -> FileRecord {
        FileRecord::new(path, UNIX_EPOCH, 1)
    }

    #[test]
    fn test_new_store_is_unanalyzed() {
        let store = AnalysisStore::new("/p");
        assert!(!store.is_analyzed());
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_all_marks_analyzed_even_when_empty() {
        let store = AnalysisStore::new("/p");
        store.replace_all(Vec::new());
        assert!(store.is_analyzed());
        assert_eq!(store.stats().full_replacements, 1);
    }

    #[test]
    fn test_replace_all_drops_paths_outside_root() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![rec("/p/a.py"), rec("/elsewhere/b.py")]);
        assert_eq!(store.len(), 1);
        assert!(store.contains(Path::new("/p/a.py")));
    }

    #[test]
    fn test_upsert_replaces_whole_record_and_rebuilds_index() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![rec("/p/a.py"), rec("/p/b.py")]);
        assert!(store.dependents_of(Path::new("/p/a.py")).is_empty());

        store.upsert(rec("/p/b.py").with_dependencies(vec![DependencyRecord::absolute("a")]));
        assert_eq!(store.dependents_of(Path::new("/p/a.py")), vec![PathBuf::from("/p/b.py")]);

        store.upsert(rec("/p/b.py"));
        assert!(store.dependents_of(Path::new("/p/a.py")).is_empty());
        assert_eq!(store.stats().upserts, 2);
    }

    #[test]
    fn test_remove_drops_edges() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![
            rec("/p/a.py"),
            rec("/p/b.py").with_dependencies(vec![DependencyRecord::absolute("a")]),
        ]);
        assert!(store.remove(Path::new("/p/b.py")).is_some());
        assert!(store.dependents_of(Path::new("/p/a.py")).is_empty());
        assert!(store.remove(Path::new("/p/b.py")).is_none());
        assert_eq!(store.stats().removals, 1);
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![rec("/p/z.py"), rec("/p/a.py"), rec("/p/m/x.py")]);
        let paths: Vec<_> = store.snapshot().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/p/a.py"),
                PathBuf::from("/p/m/x.py"),
                PathBuf::from("/p/z.py")
            ]
        );
    }

    #[test]
    fn test_any_dependency() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![
            rec("/p/a.py").with_dependencies(vec![DependencyRecord::external("os")]),
            rec("/p/b.py"),
        ]);
        assert!(store.any_dependency(|d| d.module_name == "os"));
        assert!(!store.any_dependency(|d| d.kind == DependencyKind::InternalAbsolute));
    }

    #[test]
    fn test_has_descendants() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![rec("/p/pkg/a.py")]);
        assert!(store.has_descendants(Path::new("/p/pkg")));
        assert!(!store.has_descendants(Path::new("/p/pkg/a.py")));
        assert!(!store.has_descendants(Path::new("/p/other")));
    }

    #[test]
    fn test_clear_resets_analyzed() {
        let store = AnalysisStore::new("/p");
        store.replace_all(vec![rec("/p/a.py")]);
        store.clear();
        assert!(!store.is_analyzed());
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_upserts_and_reads() {
        let store = Arc::new(AnalysisStore::new("/p"));
        store.replace_all(Vec::new());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        store.upsert(rec(&format!("/p/t{}_{}.py", t, i)));
                    }
                })
            })
            .collect();
        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let snap = store.snapshot();
                    assert!(snap.windows(2).all(|w| w[0].path < w[1].path));
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(store.len(), 200);
        assert_eq!(store.stats().upserts, 200);
    }
}
