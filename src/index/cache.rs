//! Disk cache for analysis results.
//!
//! The cache is one JSON document holding every record plus validity
//! metadata. It is only consulted at startup; the aggregate state hash is
//! the sole validity check, so any change to any tracked file's path,
//! mtime, size or content invalidates the whole cache.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::error::Result;
use crate::index::models::{CacheMetadata, FileRecord};
use crate::paths;

pub const DEFAULT_CACHE_DIR: &str = ".codectx_cache";
pub const CACHE_FILE_NAME: &str = "analysis_cache.json";

/// Bumped whenever the cached document layout changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    metadata: CacheMetadata,
    records: Vec<FileRecord>,
}

/// Aggregate hash over (relative path, mtime, size, content hash) of every record.
///
/// Independent of input order. Paths outside `root` are skipped with a warning.
pub fn compute_state_hash(root: &Path, records: &[FileRecord]) -> String {
    let mut hasher = Xxh3::new();
    if records.is_empty() {
        hasher.update(b"empty_project");
        return format!("{:032x}", hasher.digest128());
    }

    let mut entries: Vec<String> = records
        .iter()
        .filter_map(|r| match paths::relative_posix(&r.path, root) {
            Some(rel) => Some(format!(
                "{}|{}|{}|{}\n",
                rel,
                r.mtime_nanos(),
                r.size,
                r.hash.as_deref().unwrap_or("NOHASH")
            )),
            None => {
                tracing::warn!(
                    "Skipping {} in state hash: outside {}",
                    r.path.display(),
                    root.display()
                );
                None
            }
        })
        .collect();
    entries.sort();

    for entry in &entries {
        hasher.update(entry.as_bytes());
    }
    format!("{:032x}", hasher.digest128())
}

pub struct DiskCache {
    root: PathBuf,
    cache_dir: PathBuf,
    cache_file: PathBuf,
}

impl DiskCache {
    pub fn new(root: &Path) -> Self {
        Self::with_dir_name(root, DEFAULT_CACHE_DIR)
    }

    pub fn with_dir_name(root: &Path, dir_name: &str) -> Self {
        let cache_dir = root.join(dir_name);
        let cache_file = cache_dir.join(CACHE_FILE_NAME);
        Self {
            root: root.to_path_buf(),
            cache_dir,
            cache_file,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    pub fn exists(&self) -> bool {
        self.cache_file.is_file()
    }

    /// Loads cached records and metadata.
    ///
    /// Any decode failure or layout mismatch deletes the cache file and
    /// yields `None`; corruption is never reported as an error.
    pub fn load(&self) -> Option<(Vec<FileRecord>, CacheMetadata)> {
        if !self.cache_file.is_file() {
            tracing::info!("Cache file not found: {}", self.cache_file.display());
            return None;
        }

        let bytes = match fs::read(&self.cache_file) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to read cache file {}: {}", self.cache_file.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheDocument>(&bytes) {
            Ok(doc) if doc.metadata.format_version == CACHE_FORMAT_VERSION => {
                tracing::info!(
                    "Loaded {} cached records from {}",
                    doc.records.len(),
                    self.cache_file.display()
                );
                Some((doc.records, doc.metadata))
            }
            Ok(doc) => {
                tracing::warn!(
                    "Cache format version {} does not match {}. Ignoring cache.",
                    doc.metadata.format_version,
                    CACHE_FORMAT_VERSION
                );
                self.discard_corrupt();
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to decode cache file {}: {}. Ignoring cache.",
                    self.cache_file.display(),
                    e
                );
                self.discard_corrupt();
                None
            }
        }
    }

    /// Writes records with freshly computed metadata.
    ///
    /// The document goes to a temp file in the cache directory which is then
    /// renamed over the cache file, so a crash never leaves a torn cache.
    /// An empty record list is not written and yields `None`.
    pub fn save(&self, records: &[FileRecord]) -> Result<Option<CacheMetadata>> {
        if records.is_empty() {
            tracing::info!("Skipping cache update for empty analysis results");
            return Ok(None);
        }
        let metadata = CacheMetadata {
            cache_time: SystemTime::now(),
            state_hash: compute_state_hash(&self.root, records),
            format_version: CACHE_FORMAT_VERSION,
        };

        fs::create_dir_all(&self.cache_dir)?;
        let doc = CacheDocument {
            metadata: metadata.clone(),
            records: records.to_vec(),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{}.{}.", CACHE_FILE_NAME, std::process::id()))
            .suffix(".tmp")
            .tempfile_in(&self.cache_dir)?;
        serde_json::to_writer(&mut tmp, &doc)?;
        tmp.flush()?;
        tmp.persist(&self.cache_file).map_err(|e| e.error)?;

        tracing::info!(
            "Saved {} records to cache (state hash {})",
            records.len(),
            &metadata.state_hash[..8]
        );
        Ok(Some(metadata))
    }

    /// Removes the cache file. A missing file counts as success.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.cache_file) {
            Ok(()) => {
                tracing::info!("Cache file {} deleted", self.cache_file.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Cache file does not exist, nothing to clear");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn discard_corrupt(&self) {
        if let Err(e) = fs::remove_file(&self.cache_file) {
            tracing::error!("Failed to delete corrupt cache {}: {}", self.cache_file.display(), e);
        }
    }
}
