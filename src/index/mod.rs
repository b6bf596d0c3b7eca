pub mod cache;
pub mod models;
pub mod reverse;
pub mod store;

pub use cache::{compute_state_hash, DiskCache};
pub use models::*;
pub use reverse::ReverseDependencyIndex;
pub use store::{AnalysisStore, StoreStats};
