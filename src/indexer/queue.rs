//! Event queue between the change watcher and the differential updater.
//!
//! FIFO with join semantics: every pushed item must be acknowledged with
//! [`EventQueue::task_done`] once processed, and [`EventQueue::wait_idle`]
//! blocks until nothing is queued or in flight.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::index::models::{ChangeEvent, ChangeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Event(ChangeEvent),
    /// Stops the worker that pops it
    Shutdown,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    /// Pushed but not yet acknowledged
    unfinished: usize,
}

#[derive(Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: QueueItem) {
        let mut state = self.lock();
        state.items.push_back(item);
        state.unfinished += 1;
        drop(state);
        self.available.notify_one();
    }

    pub fn push_event(&self, event: ChangeEvent) {
        self.push(QueueItem::Event(event));
    }

    /// Removes every queued event and enqueues `event` in their place.
    ///
    /// Items already popped stay unfinished until acknowledged.
    pub fn replace_all(&self, event: ChangeEvent) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        state.unfinished -= dropped;
        state.items.push_back(QueueItem::Event(event));
        state.unfinished += 1;
        drop(state);
        self.available.notify_one();
        dropped
    }

    /// Pops the oldest item, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Acknowledges one popped item.
    pub fn task_done(&self) {
        let mut state = self.lock();
        if state.unfinished == 0 {
            tracing::warn!("task_done called more times than items were queued");
            return;
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.idle.notify_all();
        }
    }

    /// Waits until every pushed item has been acknowledged.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.unfinished > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Number of queued (not yet popped) items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a modified event for `path` is waiting to be popped.
    pub fn has_pending_modified(&self, path: &Path) -> bool {
        self.lock().items.iter().any(|item| {
            matches!(
                item,
                QueueItem::Event(ev) if ev.kind == ChangeKind::Modified && ev.src_path == path
            )
        })
    }

    /// Drops all queued items and forgets outstanding acknowledgements.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        state.unfinished = 0;
        drop(state);
        self.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        queue.push_event(ChangeEvent::created("/p/a.py"));
        queue.push_event(ChangeEvent::modified("/p/b.py"));
        queue.push(QueueItem::Shutdown);

        let first = queue.pop_timeout(Duration::ZERO).unwrap();
        assert_eq!(first, QueueItem::Event(ChangeEvent::created("/p/a.py")));
        let second = queue.pop_timeout(Duration::ZERO).unwrap();
        assert_eq!(second, QueueItem::Event(ChangeEvent::modified("/p/b.py")));
        assert_eq!(queue.pop_timeout(Duration::ZERO), Some(QueueItem::Shutdown));
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wait_idle_requires_task_done() {
        let queue = EventQueue::new();
        assert!(queue.wait_idle(Duration::ZERO));

        queue.push_event(ChangeEvent::modified("/p/a.py"));
        queue.pop_timeout(Duration::ZERO).unwrap();
        assert!(queue.is_empty());
        assert!(!queue.wait_idle(Duration::from_millis(10)));

        queue.task_done();
        assert!(queue.wait_idle(Duration::ZERO));
    }

    #[test]
    fn test_pop_wakes_on_push_from_other_thread() {
        let queue = Arc::new(EventQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push_event(ChangeEvent::deleted("/p/a.py"));
            })
        };
        let item = queue.pop_timeout(Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(item, Some(QueueItem::Event(ChangeEvent::deleted("/p/a.py"))));
    }

    #[test]
    fn test_has_pending_modified() {
        let queue = EventQueue::new();
        queue.push_event(ChangeEvent::created("/p/a.py"));
        assert!(!queue.has_pending_modified(Path::new("/p/a.py")));
        queue.push_event(ChangeEvent::modified("/p/a.py"));
        assert!(queue.has_pending_modified(Path::new("/p/a.py")));
    }

    #[test]
    fn test_replace_all_collapses_backlog() {
        let queue = EventQueue::new();
        for i in 0..5 {
            queue.push_event(ChangeEvent::modified(format!("/p/{}.py", i)));
        }
        assert_eq!(queue.replace_all(ChangeEvent::rescan("/p")), 5);
        assert_eq!(queue.len(), 1);

        queue.pop_timeout(Duration::ZERO).unwrap();
        queue.task_done();
        assert!(queue.wait_idle(Duration::ZERO));
    }

    #[test]
    fn test_clear_releases_waiters() {
        let queue = EventQueue::new();
        queue.push_event(ChangeEvent::modified("/p/a.py"));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.wait_idle(Duration::ZERO));
    }
}
