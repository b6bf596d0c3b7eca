use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodectxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Project must be analyzed first. Call analyze() before querying")]
    NotAnalyzed,

    #[error("File not found in analysis results: {}", .0.display())]
    NotInAnalysis(PathBuf),

    #[error("Cannot resolve path {}: {reason}", .path.display())]
    PathResolution { path: PathBuf, reason: String },

    #[error("Cannot build context:\n  - {}", .0.join("\n  - "))]
    Context(Vec<String>),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl From<toml::de::Error> for CodectxError {
    fn from(e: toml::de::Error) -> Self {
        CodectxError::Config(e.to_string())
    }
}

impl From<notify::Error> for CodectxError {
    fn from(e: notify::Error) -> Self {
        CodectxError::Watcher(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CodectxError>;
