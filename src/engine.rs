//! Query facade over the incremental analysis core.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::context::{render_tree, ContextBuilder};
use crate::error::{CodectxError, Result};
use crate::index::cache::{compute_state_hash, DiskCache};
use crate::index::models::{ChangeEvent, ContextData, DependencyRecord, FileRecord};
use crate::index::store::{AnalysisStore, StoreStats};
use crate::indexer::analyzer::ProjectAnalyzer;
use crate::indexer::ignore_rules::IgnoreRules;
use crate::indexer::queue::{EventQueue, QueueItem};
use crate::indexer::updater::{DifferentialUpdater, EventCallback};
use crate::indexer::watcher::FileWatcher;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct WatchSession {
    state: WatchState,
    stop: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Default for WatchSession {
    fn default() -> Self {
        Self {
            state: WatchState::Stopped,
            stop: Arc::new(AtomicBool::new(false)),
            watcher: None,
            worker: None,
        }
    }
}

/// Stop flag plus watcher and worker handles of a freshly spawned session.
type SessionThreads = (Arc<AtomicBool>, JoinHandle<()>, JoinHandle<()>);

/// Entry point for analyzing one project and querying the results.
pub struct ContextEngine {
    root: PathBuf,
    config: Config,
    rules: Arc<IgnoreRules>,
    analyzer: Arc<ProjectAnalyzer>,
    store: Arc<AnalysisStore>,
    cache: Arc<DiskCache>,
    queue: Arc<EventQueue>,
    context_builder: ContextBuilder,
    session: Mutex<WatchSession>,
}

impl ContextEngine {
    /// Engine for `root` with configuration discovered from the project.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::open(root, None)
    }

    /// Engine for `root`, loading configuration from `config_path` if given.
    pub fn open(root: impl AsRef<Path>, config_path: Option<&Path>) -> Result<Self> {
        let root = canonical_root(root.as_ref())?;
        let config = Config::load(&root, config_path)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        let root = canonical_root(root.as_ref())?;
        let rules = Arc::new(IgnoreRules::new(
            &root,
            &config.cache.directory,
            &config.analysis.exclude,
        ));
        let analyzer = Arc::new(ProjectAnalyzer::new(&root, rules.clone()));
        let cache = Arc::new(DiskCache::with_dir_name(&root, &config.cache.directory));

        tracing::info!(
            "Engine initialized for {} (cache {})",
            root.display(),
            if config.cache.enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            store: Arc::new(AnalysisStore::new(&root)),
            queue: Arc::new(EventQueue::new()),
            context_builder: ContextBuilder::default(),
            session: Mutex::new(WatchSession::default()),
            root,
            config,
            rules,
            analyzer,
            cache,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_analyzed(&self) -> bool {
        self.store.is_analyzed()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    // ===== Analysis =====

    /// Populates the store, reusing the disk cache when it is still valid.
    ///
    /// Without `force`, an already analyzed store is returned as is. A failed
    /// scan leaves the previous store contents untouched.
    pub fn analyze(&self, force: bool) -> Result<Vec<FileRecord>> {
        if self.store.is_analyzed() && !force {
            tracing::debug!("Returning in-memory analysis results");
            return Ok(self.store.snapshot());
        }

        if self.config.cache.enabled && !force {
            if let Some(records) = self.load_valid_cache()? {
                self.store.replace_all(records);
                return Ok(self.store.snapshot());
            }
        }

        let records = self.analyzer.scan()?;
        self.store.replace_all(records);
        let snapshot = self.store.snapshot();
        if self.config.cache.enabled {
            if let Err(e) = self.cache.save(&snapshot) {
                tracing::warn!("Failed to save analysis cache: {}", e);
            }
        }
        Ok(snapshot)
    }

    fn load_valid_cache(&self) -> Result<Option<Vec<FileRecord>>> {
        let Some((cached, metadata)) = self.cache.load() else {
            return Ok(None);
        };
        // The state hash is root-relative, so a moved project still matches.
        if let Some(stray) = cached.iter().find(|r| !r.path.starts_with(&self.root)) {
            tracing::info!(
                "Cache was written for another location ({}), ignoring it",
                stray.path.display()
            );
            return Ok(None);
        }
        let current = compute_state_hash(&self.root, &self.analyzer.fingerprint()?);
        if current == metadata.state_hash {
            tracing::info!(
                "Cache is valid (state hash {}), reusing {} records",
                &current[..8],
                cached.len()
            );
            Ok(Some(cached))
        } else {
            tracing::info!(
                "Cache is stale (expected {}, found {})",
                &metadata.state_hash[..8.min(metadata.state_hash.len())],
                &current[..8]
            );
            Ok(None)
        }
    }

    /// Clears the disk cache and the in-memory store.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()?;
        self.store.clear();
        tracing::info!("Cache cleared for {}", self.root.display());
        Ok(())
    }

    // ===== Queries =====

    fn ensure_analyzed(&self) -> Result<()> {
        if self.store.is_analyzed() {
            Ok(())
        } else {
            Err(CodectxError::NotAnalyzed)
        }
    }

    /// Maps a user path onto a store key. Errors if the path does not exist.
    fn resolve_key(&self, path: &Path) -> Result<PathBuf> {
        let lexical = paths::absolutize(path, &self.root);
        if self.store.contains(&lexical) {
            return Ok(lexical);
        }
        paths::resolve_existing(path, &self.root)
    }

    /// Sorted paths of every analyzed file, relative POSIX-style or absolute.
    pub fn list_files(&self, relative: bool) -> Result<Vec<String>> {
        self.ensure_analyzed()?;
        Ok(self
            .store
            .snapshot()
            .into_iter()
            .map(|r| {
                if relative {
                    paths::relative_posix(&r.path, &self.root)
                        .unwrap_or_else(|| r.path.display().to_string())
                } else {
                    r.path.display().to_string()
                }
            })
            .collect())
    }

    pub fn get_tree(&self, max_depth: Option<usize>) -> Result<String> {
        self.ensure_analyzed()?;
        let files: Vec<PathBuf> = self.store.snapshot().into_iter().map(|r| r.path).collect();
        Ok(render_tree(&self.root, &files, max_depth))
    }

    /// Dependencies recorded for one file, in source order.
    pub fn get_dependencies(&self, path: impl AsRef<Path>) -> Result<Vec<DependencyRecord>> {
        self.ensure_analyzed()?;
        let key = self.resolve_key(path.as_ref())?;
        self.store
            .get(&key)
            .map(|r| r.dependencies)
            .ok_or(CodectxError::NotInAnalysis(key))
    }

    /// Files that import `path`, sorted.
    pub fn get_dependents(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        self.ensure_analyzed()?;
        let key = self.resolve_key(path.as_ref())?;
        if !self.store.contains(&key) {
            return Err(CodectxError::NotInAnalysis(key));
        }
        Ok(self.store.dependents_of(&key))
    }

    /// Formatted context for the given files.
    ///
    /// Every unresolvable or unanalyzed path is reported together; no
    /// partial context is returned.
    pub fn get_context<P: AsRef<Path>>(&self, paths: &[P]) -> Result<ContextData> {
        self.ensure_analyzed()?;

        let mut targets = Vec::with_capacity(paths.len());
        let mut problems = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match self.resolve_key(path) {
                Ok(key) if self.store.contains(&key) => targets.push(key),
                Ok(key) => problems.push(format!(
                    "{}: not found in analysis results",
                    key.display()
                )),
                Err(e) => problems.push(e.to_string()),
            }
        }

        if !problems.is_empty() {
            return Err(CodectxError::Context(problems));
        }
        self.context_builder.build(&self.root, &targets)
    }

    // ===== Watching =====

    /// Differential updater wired to this engine's store, queue and cache.
    pub fn updater(&self) -> DifferentialUpdater {
        let updater = DifferentialUpdater::new(
            self.store.clone(),
            self.analyzer.clone(),
            self.rules.clone(),
            self.queue.clone(),
        )
        .with_max_hops(self.config.watch.max_propagation_hops);
        if self.config.cache.enabled {
            updater.with_cache(self.cache.clone(), self.config.watch.persist_on_idle)
        } else {
            updater
        }
    }

    /// Queues an event for the differential updater.
    pub fn enqueue_event(&self, event: ChangeEvent) {
        self.queue.push_event(event);
    }

    /// Waits until every queued event has been processed.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }

    fn session(&self) -> MutexGuard<'_, WatchSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn watch_state(&self) -> WatchState {
        self.session().state
    }

    pub fn is_watching(&self) -> bool {
        self.watch_state() == WatchState::Running
    }

    /// Starts the watcher and worker threads. No-op if already running.
    ///
    /// The project is analyzed first if it has not been yet. The session
    /// lock is not held while analyzing or spawning.
    pub fn start_watching(&self, callback: Option<EventCallback>) -> Result<()> {
        {
            let mut session = self.session();
            if session.state != WatchState::Stopped {
                tracing::info!("File watcher is already running");
                return Ok(());
            }
            session.state = WatchState::Starting;
        }

        match self.spawn_session(callback) {
            Ok((stop, watcher, worker)) => {
                let mut session = self.session();
                session.stop = stop;
                session.watcher = Some(watcher);
                session.worker = Some(worker);
                session.state = WatchState::Running;
                tracing::info!("Watch session started for {}", self.root.display());
                Ok(())
            }
            Err(e) => {
                self.session().state = WatchState::Stopped;
                Err(e)
            }
        }
    }

    fn spawn_session(&self, callback: Option<EventCallback>) -> Result<SessionThreads> {
        if !self.store.is_analyzed() {
            self.analyze(false)?;
        }

        let watch = &self.config.watch;
        let stop = Arc::new(AtomicBool::new(false));
        let watcher = FileWatcher::new(&self.root)?;

        let watcher_handle = {
            let rules = self.rules.clone();
            let queue = self.queue.clone();
            let stop = stop.clone();
            let capacity = watch.queue_capacity.max(1);
            let poll = watch.poll_interval();
            thread::Builder::new()
                .name("codectx-watcher".to_string())
                .spawn(move || watcher.run(rules, queue, capacity, stop, poll))?
        };

        let worker_spawn = {
            let updater = self.updater();
            let stop = stop.clone();
            let poll = watch.poll_interval();
            thread::Builder::new()
                .name("codectx-updater".to_string())
                .spawn(move || updater.run(&stop, poll, callback))
        };
        match worker_spawn {
            Ok(worker_handle) => Ok((stop, watcher_handle, worker_handle)),
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                join_with_timeout(watcher_handle, "watcher", watch.stop_timeout());
                Err(e.into())
            }
        }
    }

    /// Stops both background threads, waiting a bounded time for each.
    /// No-op if not running.
    pub fn stop_watching(&self) {
        let (stop, watcher, worker) = {
            let mut session = self.session();
            if session.state != WatchState::Running {
                tracing::info!("File watcher is not running");
                return;
            }
            session.state = WatchState::Stopping;
            (
                session.stop.clone(),
                session.watcher.take(),
                session.worker.take(),
            )
        };

        tracing::info!("Stopping file watcher...");
        stop.store(true, Ordering::SeqCst);
        self.queue.push(QueueItem::Shutdown);

        let timeout = self.config.watch.stop_timeout();
        if let Some(handle) = watcher {
            join_with_timeout(handle, "watcher", timeout);
        }
        if let Some(handle) = worker {
            join_with_timeout(handle, "updater", timeout);
        }
        self.queue.clear();

        self.session().state = WatchState::Stopped;
        tracing::info!("Watch session stopped");
    }
}

impl Drop for ContextEngine {
    fn drop(&mut self) {
        if self.is_watching() {
            self.stop_watching();
        }
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    let canonical = root
        .canonicalize()
        .map_err(|e| CodectxError::PathResolution {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !canonical.is_dir() {
        return Err(CodectxError::PathResolution {
            path: root.to_path_buf(),
            reason: "project root is not a directory".to_string(),
        });
    }
    Ok(canonical)
}

/// Joins `handle`, giving up (with a warning) after `timeout`.
fn join_with_timeout(handle: JoinHandle<()>, name: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("{} thread did not stop within {:?}", name, timeout);
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        tracing::error!("{} thread panicked", name);
    }
}
