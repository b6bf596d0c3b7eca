//! Differential Updater: applies change events to the Analysis Store.
//!
//! Single files are re-analyzed in place; anything the updater cannot
//! handle precisely (directories, moves, ignore-rule changes, analysis
//! errors) falls back to a full re-scan.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::index::cache::DiskCache;
use crate::index::models::{ChangeEvent, ChangeKind, DependencyKind, EventOrigin};
use crate::index::store::AnalysisStore;
use crate::indexer::analyzer::ProjectAnalyzer;
use crate::indexer::ignore_rules::IgnoreRules;
use crate::indexer::queue::{EventQueue, QueueItem};
use crate::languages::python;
use crate::paths;

/// Invoked on the worker thread after each event has been applied.
pub type EventCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Event touched only ignored paths
    Ignored,
    /// A record was inserted or replaced
    Upserted,
    /// A record was removed
    Removed,
    /// Nothing to do (e.g. created file vanished, deleted file unknown)
    Skipped,
    /// The store was rebuilt from a full scan
    Rescanned,
    /// The full re-scan fallback itself failed; the store is unchanged
    Failed,
}

impl UpdateOutcome {
    fn changed_store(self) -> bool {
        matches!(
            self,
            UpdateOutcome::Upserted | UpdateOutcome::Removed | UpdateOutcome::Rescanned
        )
    }
}

pub struct DifferentialUpdater {
    root: PathBuf,
    store: Arc<AnalysisStore>,
    analyzer: Arc<ProjectAnalyzer>,
    rules: Arc<IgnoreRules>,
    queue: Arc<EventQueue>,
    cache: Option<Arc<DiskCache>>,
    max_hops: u32,
    persist_on_idle: bool,
    dirty: AtomicBool,
}

impl DifferentialUpdater {
    pub fn new(
        store: Arc<AnalysisStore>,
        analyzer: Arc<ProjectAnalyzer>,
        rules: Arc<IgnoreRules>,
        queue: Arc<EventQueue>,
    ) -> Self {
        Self {
            root: store.root().to_path_buf(),
            store,
            analyzer,
            rules,
            queue,
            cache: None,
            max_hops: 8,
            persist_on_idle: false,
            dirty: AtomicBool::new(false),
        }
    }

    /// Persist the store to `cache` whenever the queue drains after a change.
    pub fn with_cache(mut self, cache: Arc<DiskCache>, persist_on_idle: bool) -> Self {
        self.cache = Some(cache);
        self.persist_on_idle = persist_on_idle;
        self
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Applies one event to the store, enqueueing propagated events as needed.
    pub fn apply(&self, event: &ChangeEvent) -> UpdateOutcome {
        let src = paths::absolutize(&event.src_path, &self.root);
        let dest = event.dest_path.as_deref().map(|d| paths::absolutize(d, &self.root));

        if IgnoreRules::is_rules_file(&src)
            || dest.as_deref().is_some_and(IgnoreRules::is_rules_file)
        {
            tracing::info!("Ignore rules changed ({}), reloading", event);
            self.rules.reload();
            return self.full_rescan();
        }

        let touches_tracked = !self.rules.is_ignored(&src)
            || dest.as_deref().is_some_and(|d| !self.rules.is_ignored(d));
        if !touches_tracked {
            tracing::debug!("Ignoring event for ignored path: {}", event);
            return UpdateOutcome::Ignored;
        }

        if event.is_directory || event.kind == ChangeKind::Moved {
            tracing::info!("Falling back to full re-scan for {}", event);
            return self.full_rescan();
        }

        let outcome = match event.kind {
            ChangeKind::Created => self.apply_created(&src),
            ChangeKind::Modified => self.apply_modified(&src, &event.origin),
            ChangeKind::Deleted => self.apply_deleted(&src),
            ChangeKind::Moved => self.full_rescan(),
        };
        if outcome.changed_store() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        outcome
    }

    fn apply_created(&self, path: &Path) -> UpdateOutcome {
        if path.is_dir() {
            tracing::info!("Created path is a directory, re-scanning: {}", path.display());
            return self.full_rescan();
        }
        match self.analyzer.scan_one(path) {
            Ok(Some(record)) => {
                tracing::debug!("Differentially added {}", path.display());
                self.store.upsert(record);
                if self.reclassifies_imports(path) {
                    return self.full_rescan();
                }
                UpdateOutcome::Upserted
            }
            Ok(None) => {
                tracing::debug!("Created file no longer present, skipping: {}", path.display());
                UpdateOutcome::Skipped
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to analyze {}: {}. Falling back to full re-scan",
                    path.display(),
                    e
                );
                self.full_rescan()
            }
        }
    }

    fn apply_modified(&self, path: &Path, origin: &EventOrigin) -> UpdateOutcome {
        match self.analyzer.scan_one(path) {
            Ok(Some(record)) => {
                tracing::debug!("Differentially updated {}", path.display());
                self.store.upsert(record);
                self.propagate(path, origin);
                UpdateOutcome::Upserted
            }
            Ok(None) => {
                if self.store.remove(path).is_some() {
                    tracing::debug!("Modified file is gone, removed {}", path.display());
                    if self.reclassifies_imports(path) {
                        return self.full_rescan();
                    }
                    UpdateOutcome::Removed
                } else {
                    UpdateOutcome::Skipped
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to analyze {}: {}. Falling back to full re-scan",
                    path.display(),
                    e
                );
                self.full_rescan()
            }
        }
    }

    fn apply_deleted(&self, path: &Path) -> UpdateOutcome {
        if self.store.remove(path).is_some() {
            tracing::debug!("Differentially removed {}", path.display());
            if self.reclassifies_imports(path) {
                return self.full_rescan();
            }
            return UpdateOutcome::Removed;
        }
        if self.store.has_descendants(path) {
            tracing::info!("Deleted path {} was a directory, re-scanning", path.display());
            return self.full_rescan();
        }
        tracing::debug!("Deleted path was not tracked: {}", path.display());
        UpdateOutcome::Skipped
    }

    /// True if `path` appearing or disappearing flips how some stored import
    /// of a top-level module is classified.
    ///
    /// Absolute imports are internal only while their first segment exists
    /// under the root, so records parsed before the change are stale.
    fn reclassifies_imports(&self, path: &Path) -> bool {
        let Some(name) = python::top_level_module(&self.root, path) else {
            return false;
        };
        let stale = if python::is_project_module(&self.root, &name) {
            DependencyKind::External
        } else {
            DependencyKind::InternalAbsolute
        };
        let affected = self.store.any_dependency(|dep| {
            dep.kind == stale && python::top_level_name(&dep.module_name) == name
        });
        if affected {
            tracing::info!(
                "Module {} changed import classification, re-scanning",
                name
            );
        }
        affected
    }

    /// Enqueues a modified event for every file that imports `path`.
    fn propagate(&self, path: &Path, origin: &EventOrigin) {
        let (source, hops) = match origin {
            EventOrigin::Watcher => (path.to_path_buf(), 0),
            EventOrigin::Propagated { source, hops } => (source.clone(), *hops),
        };
        let dependents = self.store.dependents_of(path);
        if dependents.is_empty() {
            return;
        }
        if hops >= self.max_hops {
            tracing::debug!(
                "Propagation from {} stopped after {} hops",
                source.display(),
                hops
            );
            return;
        }

        for dependent in dependents {
            if dependent == path || dependent == source {
                continue;
            }
            if self.queue.has_pending_modified(&dependent) {
                tracing::debug!("Re-analysis already pending for {}", dependent.display());
                continue;
            }
            tracing::debug!(
                "Propagating change of {} to {}",
                path.display(),
                dependent.display()
            );
            self.queue
                .push_event(ChangeEvent::propagated(dependent, &source, hops + 1));
        }
    }

    /// Re-runs the full analysis and replaces the store wholesale.
    ///
    /// On failure the previous store contents are kept.
    pub fn full_rescan(&self) -> UpdateOutcome {
        match self.analyzer.scan() {
            Ok(records) => {
                self.store.replace_all(records);
                self.dirty.store(true, Ordering::SeqCst);
                UpdateOutcome::Rescanned
            }
            Err(e) => {
                tracing::error!("Full re-scan failed: {}", e);
                UpdateOutcome::Failed
            }
        }
    }

    /// Applies one event the way the worker thread does: callback, persist, acknowledge.
    fn handle(&self, event: &ChangeEvent, callback: Option<&EventCallback>) {
        let outcome = self.apply(event);
        tracing::debug!("Processed {} -> {:?}", event, outcome);

        if let Some(cb) = callback {
            if outcome != UpdateOutcome::Ignored
                && catch_unwind(AssertUnwindSafe(|| cb(event))).is_err()
            {
                tracing::error!("Event callback panicked for {}", event);
            }
        }

        if self.queue.is_empty() {
            self.persist_if_dirty();
        }
    }

    fn persist_if_dirty(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        if !self.persist_on_idle || !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = cache.save(&self.store.snapshot()) {
            tracing::warn!("Failed to persist analysis cache: {}", e);
        }
    }

    /// Drains the queue on the calling thread without waiting for new events.
    ///
    /// Returns the number of events processed. Stops at a shutdown marker.
    pub fn process_pending(&self) -> usize {
        let mut processed = 0;
        while let Some(item) = self.queue.pop_timeout(Duration::ZERO) {
            match item {
                QueueItem::Event(event) => {
                    self.handle(&event, None);
                    processed += 1;
                    self.queue.task_done();
                }
                QueueItem::Shutdown => {
                    self.queue.task_done();
                    break;
                }
            }
        }
        processed
    }

    /// Worker loop: runs until `stop` is set or a shutdown marker is popped.
    pub fn run(&self, stop: &AtomicBool, poll_interval: Duration, callback: Option<EventCallback>) {
        tracing::debug!("Differential updater started");

        while !stop.load(Ordering::SeqCst) {
            let Some(item) = self.queue.pop_timeout(poll_interval) else {
                continue;
            };
            match item {
                QueueItem::Event(event) => {
                    if stop.load(Ordering::SeqCst) {
                        tracing::debug!("Stop requested, dropping {}", event);
                        self.queue.task_done();
                        break;
                    }
                    self.handle(&event, callback.as_ref());
                    self.queue.task_done();
                }
                QueueItem::Shutdown => {
                    self.queue.task_done();
                    break;
                }
            }
        }

        tracing::debug!("Differential updater stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        store: Arc<AnalysisStore>,
        queue: Arc<EventQueue>,
        updater: DifferentialUpdater,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for (name, content) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let rules = Arc::new(IgnoreRules::new(&root, ".codectx_cache", &[]));
        let analyzer = Arc::new(ProjectAnalyzer::new(&root, rules.clone()));
        let store = Arc::new(AnalysisStore::new(&root));
        store.replace_all(analyzer.scan().unwrap());
        let queue = Arc::new(EventQueue::new());
        let updater = DifferentialUpdater::new(store.clone(), analyzer, rules, queue.clone());
        Fixture {
            _dir: dir,
            root,
            store,
            queue,
            updater,
        }
    }

    #[test]
    fn test_created_file_is_upserted() {
        let fx = fixture(&[("a.py", "")]);
        let path = fx.root.join("new.py");
        fs::write(&path, "import a\n").unwrap();

        assert_eq!(fx.updater.apply(&ChangeEvent::created(&path)), UpdateOutcome::Upserted);
        assert!(fx.store.contains(&path));
        assert_eq!(fx.store.dependents_of(&fx.root.join("a.py")), vec![path]);
    }

    #[test]
    fn test_created_then_vanished_is_skipped() {
        let fx = fixture(&[]);
        let outcome = fx.updater.apply(&ChangeEvent::created(fx.root.join("ghost.py")));
        assert_eq!(outcome, UpdateOutcome::Skipped);
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_modified_missing_file_removes_record() {
        let fx = fixture(&[("a.py", "x = 1\n")]);
        let path = fx.root.join("a.py");
        fs::remove_file(&path).unwrap();

        assert_eq!(fx.updater.apply(&ChangeEvent::modified(&path)), UpdateOutcome::Removed);
        assert!(!fx.store.contains(&path));
    }

    #[test]
    fn test_ignored_event_is_dropped() {
        let fx = fixture(&[(".gitignore", "*.log\n")]);
        let log = fx.root.join("c.log");
        fs::write(&log, "x").unwrap();

        assert_eq!(fx.updater.apply(&ChangeEvent::created(&log)), UpdateOutcome::Ignored);
        assert!(!fx.store.contains(&log));
    }

    #[test]
    fn test_relative_event_path_is_resolved_against_root() {
        let fx = fixture(&[]);
        fs::write(fx.root.join("rel.py"), "").unwrap();
        fx.updater.apply(&ChangeEvent::created("rel.py"));
        assert!(fx.store.contains(&fx.root.join("rel.py")));
    }

    #[test]
    fn test_deleted_unknown_path_is_noop() {
        let fx = fixture(&[("a.py", "")]);
        let before = fx.store.stats();
        let outcome = fx.updater.apply(&ChangeEvent::deleted(fx.root.join("never.py")));
        assert_eq!(outcome, UpdateOutcome::Skipped);
        assert_eq!(fx.store.stats(), before);
    }

    #[test]
    fn test_deleted_directory_without_flag_rescans() {
        let fx = fixture(&[("pkg/a.py", ""), ("b.py", "")]);
        fs::remove_dir_all(fx.root.join("pkg")).unwrap();

        let outcome = fx.updater.apply(&ChangeEvent::deleted(fx.root.join("pkg")));
        assert_eq!(outcome, UpdateOutcome::Rescanned);
        assert_eq!(fx.store.len(), 1);
    }

    #[test]
    fn test_moves_and_directory_events_rescan() {
        let fx = fixture(&[("a.py", "")]);
        fs::rename(fx.root.join("a.py"), fx.root.join("b.py")).unwrap();

        let moved = ChangeEvent::moved(fx.root.join("a.py"), fx.root.join("b.py"), false);
        assert_eq!(fx.updater.apply(&moved), UpdateOutcome::Rescanned);
        assert!(fx.store.contains(&fx.root.join("b.py")));
        assert!(!fx.store.contains(&fx.root.join("a.py")));

        assert_eq!(fx.updater.apply(&ChangeEvent::rescan(&fx.root)), UpdateOutcome::Rescanned);
        assert_eq!(fx.store.stats().full_replacements, 3);
    }

    #[test]
    fn test_gitignore_change_reloads_rules() {
        let fx = fixture(&[("a.py", ""), ("notes.txt", "")]);
        assert!(fx.store.contains(&fx.root.join("notes.txt")));

        let gitignore = fx.root.join(".gitignore");
        fs::write(&gitignore, "*.txt\n").unwrap();
        assert_eq!(fx.updater.apply(&ChangeEvent::created(&gitignore)), UpdateOutcome::Rescanned);
        assert!(!fx.store.contains(&fx.root.join("notes.txt")));
        assert!(fx.store.contains(&gitignore));
    }

    #[test]
    fn test_modify_propagates_one_hop_per_cycle() {
        let fx = fixture(&[
            ("a.py", "x = 1\n"),
            ("b.py", "import a\n"),
            ("c.py", "import b\n"),
        ]);
        let a = fx.root.join("a.py");
        fs::write(&a, "x = 2\n").unwrap();

        fx.queue.push_event(ChangeEvent::modified(&a));
        assert_eq!(fx.updater.process_pending(), 3);
        assert_eq!(fx.store.stats().upserts, 3);
        assert!(fx.queue.wait_idle(Duration::ZERO));
    }

    #[test]
    fn test_propagation_stops_at_cycle_origin() {
        let fx = fixture(&[("a.py", "import b\n"), ("b.py", "import a\n")]);
        fx.queue.push_event(ChangeEvent::modified(fx.root.join("a.py")));

        assert_eq!(fx.updater.process_pending(), 2);
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn test_propagation_respects_hop_limit() {
        let fx = fixture(&[
            ("a.py", ""),
            ("b.py", "import a\n"),
            ("c.py", "import b\n"),
        ]);
        let updater = DifferentialUpdater::new(
            fx.store.clone(),
            fx.updater.analyzer.clone(),
            fx.updater.rules.clone(),
            fx.queue.clone(),
        )
        .with_max_hops(1);

        fx.queue.push_event(ChangeEvent::modified(fx.root.join("a.py")));
        assert_eq!(updater.process_pending(), 2);
    }

    #[test]
    fn test_pending_dependent_is_not_enqueued_twice() {
        let fx = fixture(&[
            ("a.py", ""),
            ("b.py", ""),
            ("c.py", "import a\nimport b\n"),
        ]);
        fx.queue.push_event(ChangeEvent::modified(fx.root.join("a.py")));
        fx.queue.push_event(ChangeEvent::modified(fx.root.join("b.py")));

        // a, b, then a single propagated event for c
        assert_eq!(fx.updater.process_pending(), 3);
    }

    #[test]
    fn test_idle_persists_to_cache() {
        let fx = fixture(&[("a.py", "")]);
        let cache = Arc::new(DiskCache::new(&fx.root));
        let updater = DifferentialUpdater::new(
            fx.store.clone(),
            fx.updater.analyzer.clone(),
            fx.updater.rules.clone(),
            fx.queue.clone(),
        )
        .with_cache(cache.clone(), true);

        fs::write(fx.root.join("b.py"), "import a\n").unwrap();
        fx.queue.push_event(ChangeEvent::created(fx.root.join("b.py")));
        updater.process_pending();

        let (records, _) = cache.load().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_callback_panic_does_not_stop_worker() {
        let fx = fixture(&[("a.py", "")]);
        let stop = AtomicBool::new(false);
        let callback: EventCallback = Arc::new(|_| panic!("boom"));

        fx.queue.push_event(ChangeEvent::modified(fx.root.join("a.py")));
        fx.queue.push_event(ChangeEvent::modified(fx.root.join("a.py")));
        fx.queue.push(QueueItem::Shutdown);
        fx.updater.run(&stop, Duration::from_millis(10), Some(callback));

        assert_eq!(fx.store.stats().upserts, 2);
        assert!(fx.queue.wait_idle(Duration::ZERO));
    }
}
