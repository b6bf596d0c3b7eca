use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;
use crate::index::models::{ChangeEvent, ChangeKind};
use crate::indexer::ignore_rules::IgnoreRules;
use crate::indexer::queue::EventQueue;

/// OS notification subscription for one project tree.
///
/// The notify callback only forwards raw events; translation, filtering and
/// enqueueing happen on the thread that calls [`FileWatcher::run`].
pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!("Watching {} for changes", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Waits up to `timeout` for the next batch of translated events.
    ///
    /// Returns `None` on timeout; `Some(vec![])` for events that translate to
    /// nothing (e.g. access events).
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<ChangeEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => Some(translate(&event, &self.root)),
            Ok(Err(e)) => {
                tracing::warn!("File watcher error: {}", e);
                Some(Vec::new())
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("File watcher channel disconnected");
                None
            }
        }
    }

    /// Pumps events into `queue` until `stop` is set.
    ///
    /// Events under ignored paths are dropped here. When the queue already
    /// holds `capacity` items the backlog collapses into one root re-scan.
    pub fn run(
        self,
        rules: Arc<IgnoreRules>,
        queue: Arc<EventQueue>,
        capacity: usize,
        stop: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        tracing::debug!("Watcher thread started");

        while !stop.load(Ordering::SeqCst) {
            let Some(events) = self.recv_timeout(poll_interval) else {
                continue;
            };
            for event in events {
                if !should_enqueue(&event, &rules) {
                    tracing::debug!("Dropping event for ignored path: {}", event);
                    continue;
                }
                if queue.len() >= capacity {
                    let dropped = queue.replace_all(ChangeEvent::rescan(&self.root));
                    tracing::warn!(
                        "Event queue full, collapsed {} pending events into a full re-scan",
                        dropped
                    );
                    continue;
                }
                tracing::debug!("Queued {}", event);
                queue.push_event(event);
            }
        }

        tracing::debug!("Watcher thread stopped");
    }
}

fn should_enqueue(event: &ChangeEvent, rules: &IgnoreRules) -> bool {
    let tracked = |p: &Path| IgnoreRules::is_rules_file(p) || !rules.is_ignored(p);
    tracked(&event.src_path) || event.dest_path.as_deref().is_some_and(tracked)
}

/// Maps one notify event onto change events.
pub fn translate(event: &Event, root: &Path) -> Vec<ChangeEvent> {
    if event.need_rescan() {
        return vec![ChangeEvent::rescan(root)];
    }

    let paths = &event.paths;
    match event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(kind) => paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Created, p, kind == CreateKind::Folder))
            .collect(),
        EventKind::Remove(kind) => paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Deleted, p, kind == RemoveKind::Folder))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            let is_dir = paths[1].is_dir();
            vec![ChangeEvent::moved(&paths[0], &paths[1], is_dir)]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(ChangeEvent::deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Created, p, p.is_dir()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    ChangeEvent::new(ChangeKind::Created, p, p.is_dir())
                } else {
                    ChangeEvent::deleted(p)
                }
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(ChangeEvent::modified)
            .collect(),
    }
}
