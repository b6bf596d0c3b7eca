pub mod analyzer;
pub mod hasher;
pub mod ignore_rules;
pub mod parser;
pub mod queue;
pub mod updater;
pub mod walker;
pub mod watcher;

pub use analyzer::ProjectAnalyzer;
pub use hasher::hash_file;
pub use ignore_rules::IgnoreRules;
pub use parser::{parse_source, ParsedFile};
pub use queue::{EventQueue, QueueItem};
pub use updater::{DifferentialUpdater, EventCallback, UpdateOutcome};
pub use walker::FileWalker;
pub use watcher::FileWatcher;
