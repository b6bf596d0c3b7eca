use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;

use crate::error::{CodectxError, Result};
use crate::indexer::ignore_rules::IgnoreRules;

/// Enumerates project files, pruning ignored directories before descent.
pub struct FileWalker {
    rules: Arc<IgnoreRules>,
}

impl FileWalker {
    pub fn new(rules: Arc<IgnoreRules>) -> Self {
        Self { rules }
    }

    /// All non-ignored regular files under `root`, sorted.
    ///
    /// An unreadable root is an error; unreadable entries below it are
    /// logged and skipped.
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(CodectxError::Analysis(format!(
                "project root is not a directory: {}",
                root.display()
            )));
        }
        std::fs::read_dir(root).map_err(|e| {
            CodectxError::Analysis(format!("cannot read project root {}: {}", root.display(), e))
        })?;

        let rules = self.rules.clone();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .filter_entry(move |entry| !rules.is_ignored(entry.path()))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_some_and(|ft| ft.is_file()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => tracing::warn!("Skipping unreadable entry: {}", e),
            }
        }

        files.sort();
        Ok(files)
    }
}
