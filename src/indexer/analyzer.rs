//! Analysis Engine: turns project files into [`FileRecord`]s.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::Result;
use crate::index::models::FileRecord;
use crate::indexer::hasher::hash_file;
use crate::indexer::ignore_rules::IgnoreRules;
use crate::indexer::walker::FileWalker;
use crate::languages::{detect_language, LanguageRegistry};

pub struct ProjectAnalyzer {
    root: PathBuf,
    walker: FileWalker,
    languages: LanguageRegistry,
}

impl ProjectAnalyzer {
    pub fn new(root: &Path, rules: Arc<IgnoreRules>) -> Self {
        Self {
            root: root.to_path_buf(),
            walker: FileWalker::new(rules),
            languages: LanguageRegistry::for_project(root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full scan of the project.
    ///
    /// Per-file failures degrade that file's record; only a failure to walk
    /// the root aborts the scan. Records are sorted by path.
    pub fn scan(&self) -> Result<Vec<FileRecord>> {
        tracing::info!("Starting analysis of {}", self.root.display());
        let files = self.walker.walk(&self.root)?;

        let mut records: Vec<FileRecord> = files
            .par_iter()
            .filter_map(|path| self.analyze_path(path, true).unwrap_or_else(|e| {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                None
            }))
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!("Analysis complete: {} non-ignored files", records.len());
        Ok(records)
    }

    /// Lightweight scan: path, mtime, size and hash only.
    ///
    /// Used to validate the disk cache without paying for parsing.
    pub fn fingerprint(&self) -> Result<Vec<FileRecord>> {
        let files = self.walker.walk(&self.root)?;
        let mut records: Vec<FileRecord> = files
            .par_iter()
            .filter_map(|path| self.analyze_path(path, false).ok().flatten())
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("Fingerprinted {} files", records.len());
        Ok(records)
    }

    /// Re-analyzes a single file.
    ///
    /// `Ok(None)` means the file no longer exists (or is not a regular file);
    /// any other stat failure is an error.
    pub fn scan_one(&self, path: &Path) -> Result<Option<FileRecord>> {
        self.analyze_path(path, true)
    }

    fn analyze_path(&self, path: &Path, full: bool) -> Result<Option<FileRecord>> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        let mut record = FileRecord::new(path, meta.modified()?, meta.len());

        match hash_file(path) {
            Ok(hash) => record.hash = Some(hash),
            Err(e) => tracing::warn!("Could not calculate hash for {}: {}", path.display(), e),
        }

        if !full {
            return Ok(Some(record));
        }

        let Some(language) = detect_language(path) else {
            tracing::debug!("Language not detected for {}", path.display());
            return Ok(Some(record));
        };
        record.language = Some(language.to_string());

        if let Some(extractor) = self.languages.get(language) {
            match fs::read_to_string(path) {
                Ok(source) => match extractor.parse(&source, path) {
                    Ok(deps) => {
                        tracing::debug!("Found {} dependencies in {}", deps.len(), path.display());
                        record.dependencies = deps;
                    }
                    Err(e) => tracing::warn!(
                        "Skipping dependency parsing for {}: {}",
                        path.display(),
                        e
                    ),
                },
                Err(e) => tracing::warn!(
                    "Could not read {} to parse dependencies: {}",
                    path.display(),
                    e
                ),
            }
        }

        Ok(Some(record))
    }
}
