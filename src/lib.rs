pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod index;
pub mod indexer;
pub mod languages;
pub mod paths;

pub use config::Config;
pub use context::{BasicFileContentFormatter, ContextBuilder, FileContentFormatter};
pub use engine::{ContextEngine, WatchState};
pub use error::{CodectxError, Result};
pub use index::{
    AnalysisStore, CacheMetadata, ChangeEvent, ChangeKind, ContextData, DependencyKind,
    DependencyRecord, DiskCache, EventOrigin, FileRecord, ReverseDependencyIndex, StoreStats,
};
pub use indexer::{DifferentialUpdater, EventCallback, UpdateOutcome};
pub use languages::{detect_language, DependencyExtractor, LanguageRegistry};
