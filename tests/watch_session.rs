//! Differential updates driven through the engine's queue, and a live watch session.

use std::ffi::OsStr;
use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use codectx::config::Config;
use codectx::engine::{ContextEngine, WatchState};
use codectx::index::{ChangeEvent, ChangeKind, DependencyRecord};
use codectx::indexer::EventCallback;

fn create_project() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(dir.path().join("a.py"), "import os\n").unwrap();
    fs::write(dir.path().join("b.py"), "import a\n").unwrap();
    fs::write(dir.path().join("d.py"), "x = 1\n").unwrap();
    fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
    fs::write(dir.path().join("c.log"), "noise\n").unwrap();
    dir
}

fn analyzed(dir: &TempDir) -> ContextEngine {
    let mut config = Config::default();
    config.cache.enabled = false;
    let engine = ContextEngine::with_config(dir.path(), config).unwrap();
    engine.analyze(false).unwrap();
    engine
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    check()
}

// ============================================================================
// Queue-driven updates (deterministic, no OS notifications)
// ============================================================================

#[test]
fn test_modify_propagates_to_dependents() {
    let dir = create_project();
    let engine = analyzed(&dir);
    let before = engine.store_stats();

    fs::write(dir.path().join("a.py"), "import os\nimport json\n").unwrap();
    engine.enqueue_event(ChangeEvent::modified(engine.project_root().join("a.py")));
    let processed = engine.updater().process_pending();

    assert_eq!(processed, 2);
    assert_eq!(engine.store_stats().upserts, before.upserts + 2);
    assert_eq!(engine.get_dependencies("a.py").unwrap().len(), 2);
    assert_eq!(engine.store_stats().full_replacements, before.full_replacements);
    assert!(engine.wait_idle(Duration::ZERO));
}

#[test]
fn test_deletion_is_differential() {
    let dir = create_project();
    let engine = analyzed(&dir);
    let before = engine.store_stats();

    fs::remove_file(dir.path().join("d.py")).unwrap();
    engine.enqueue_event(ChangeEvent::deleted(engine.project_root().join("d.py")));
    engine.updater().process_pending();

    let files = engine.list_files(true).unwrap();
    assert!(!files.contains(&"d.py".to_string()));
    let after = engine.store_stats();
    assert_eq!(after.removals, before.removals + 1);
    assert_eq!(after.full_replacements, before.full_replacements);
}

#[test]
fn test_ignored_paths_leave_store_untouched() {
    let dir = create_project();
    let engine = analyzed(&dir);
    let before = engine.store_stats();

    fs::write(dir.path().join("c.log"), "more noise\n").unwrap();
    engine.enqueue_event(ChangeEvent::modified(engine.project_root().join("c.log")));
    engine.enqueue_event(ChangeEvent::created(engine.project_root().join("new.log")));
    engine.updater().process_pending();

    assert_eq!(engine.store_stats(), before);
}

#[test]
fn test_gitignore_change_reloads_rules() {
    let dir = create_project();
    let engine = analyzed(&dir);

    fs::write(dir.path().join(".gitignore"), "*.log\nd.py\n").unwrap();
    engine.enqueue_event(ChangeEvent::modified(engine.project_root().join(".gitignore")));
    engine.updater().process_pending();

    let files = engine.list_files(true).unwrap();
    assert!(!files.contains(&"d.py".to_string()));
    assert!(files.contains(&"a.py".to_string()));
}

/// Dependencies per relative path, for comparing incremental and full results.
fn dependency_map(engine: &ContextEngine) -> Vec<(String, Vec<DependencyRecord>)> {
    engine
        .list_files(true)
        .unwrap()
        .into_iter()
        .map(|f| {
            let deps = engine.get_dependencies(&f).unwrap();
            (f, deps)
        })
        .collect()
}

fn full_scan_of(dir: &TempDir) -> ContextEngine {
    let mut config = Config::default();
    config.cache.enabled = false;
    let engine = ContextEngine::with_config(dir.path(), config).unwrap();
    engine.analyze(true).unwrap();
    engine
}

#[test]
fn test_module_created_after_importer_links_dependents() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("b.py"), "import a\n").unwrap();
    let engine = analyzed(&dir);
    assert_eq!(
        engine.get_dependencies("b.py").unwrap(),
        vec![DependencyRecord::external("a")]
    );

    fs::write(dir.path().join("a.py"), "VALUE = 1\n").unwrap();
    engine.enqueue_event(ChangeEvent::created(engine.project_root().join("a.py")));
    engine.updater().process_pending();

    let root = engine.project_root().to_path_buf();
    assert_eq!(
        engine.get_dependencies("b.py").unwrap(),
        vec![DependencyRecord::absolute("a")]
    );
    assert_eq!(engine.get_dependents("a.py").unwrap(), vec![root.join("b.py")]);

    fs::write(dir.path().join("a.py"), "VALUE = 2\n").unwrap();
    engine.enqueue_event(ChangeEvent::modified(root.join("a.py")));
    assert_eq!(engine.updater().process_pending(), 2);

    assert_eq!(dependency_map(&engine), dependency_map(&full_scan_of(&dir)));
}

#[test]
fn test_module_deleted_reverts_importers_to_external() {
    let dir = create_project();
    let engine = analyzed(&dir);
    assert_eq!(
        engine.get_dependencies("b.py").unwrap(),
        vec![DependencyRecord::absolute("a")]
    );

    fs::remove_file(dir.path().join("a.py")).unwrap();
    engine.enqueue_event(ChangeEvent::deleted(engine.project_root().join("a.py")));
    engine.updater().process_pending();

    assert_eq!(
        engine.get_dependencies("b.py").unwrap(),
        vec![DependencyRecord::external("a")]
    );
    assert_eq!(dependency_map(&engine), dependency_map(&full_scan_of(&dir)));
}

#[test]
fn test_unrelated_module_creation_stays_differential() {
    let dir = create_project();
    let engine = analyzed(&dir);
    let before = engine.store_stats();

    fs::write(dir.path().join("f.py"), "import os\n").unwrap();
    engine.enqueue_event(ChangeEvent::created(engine.project_root().join("f.py")));
    engine.updater().process_pending();

    let after = engine.store_stats();
    assert_eq!(after.upserts, before.upserts + 1);
    assert_eq!(after.full_replacements, before.full_replacements);
}

// ============================================================================
// Live watch session
// ============================================================================

#[test]
fn test_watch_session_picks_up_changes() {
    let dir = create_project();
    let engine = analyzed(&dir);

    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let callback: EventCallback = {
        let seen = seen.clone();
        Arc::new(move |event: &ChangeEvent| seen.lock().unwrap().push(event.clone()))
    };
    engine.start_watching(Some(callback)).unwrap();
    assert_eq!(engine.watch_state(), WatchState::Running);

    // Give the OS subscription a moment before producing events
    thread::sleep(Duration::from_millis(200));
    fs::write(dir.path().join("e.py"), "import d\n").unwrap();

    let root = engine.project_root().to_path_buf();
    let appeared = wait_until(Duration::from_secs(10), || {
        engine
            .get_dependents(root.join("d.py"))
            .map(|deps| deps.contains(&root.join("e.py")))
            .unwrap_or(false)
    });
    assert!(appeared, "e.py was never picked up by the watcher");

    engine.stop_watching();
    assert_eq!(engine.watch_state(), WatchState::Stopped);

    let seen = seen.lock().unwrap();
    assert!(seen
        .iter()
        .any(|e| {
            e.src_path.file_name() == Some(OsStr::new("e.py")) && e.kind != ChangeKind::Deleted
        }));
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let dir = create_project();
    let engine = analyzed(&dir);

    engine.stop_watching();
    engine.start_watching(None).unwrap();
    engine.start_watching(None).unwrap();
    assert!(engine.is_watching());
    engine.stop_watching();
    engine.stop_watching();
    assert!(!engine.is_watching());
}

#[test]
fn test_watching_unanalyzed_project_analyzes_first() {
    let dir = create_project();
    let engine = ContextEngine::with_config(dir.path(), Config::default()).unwrap();
    assert!(!engine.is_analyzed());

    engine.start_watching(None).unwrap();
    assert!(engine.is_analyzed());
    assert_eq!(engine.list_files(true).unwrap().len(), 4);
    engine.stop_watching();
}

#[test]
fn test_watch_state_is_readable_while_starting() {
    let dir = TempDir::new().unwrap();
    for i in 0..200 {
        fs::write(dir.path().join(format!("m{}.py", i)), "import os\n").unwrap();
    }
    let engine = Arc::new(ContextEngine::with_config(dir.path(), Config::default()).unwrap());

    let starter = {
        let engine = engine.clone();
        thread::spawn(move || engine.start_watching(None))
    };

    let mut observed = Vec::new();
    while !starter.is_finished() {
        let asked = Instant::now();
        observed.push(engine.watch_state());
        assert!(asked.elapsed() < Duration::from_secs(1));
        thread::sleep(Duration::from_millis(1));
    }
    starter.join().unwrap().unwrap();

    assert!(observed
        .iter()
        .all(|s| matches!(s, WatchState::Stopped | WatchState::Starting | WatchState::Running)));
    assert_eq!(engine.watch_state(), WatchState::Running);
    engine.stop_watching();
}
