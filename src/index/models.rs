use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =====================================================
// File Records
// =====================================================

/// Analysis result for a single file.
///
/// Records are immutable once built: re-analysis of a path produces a new
/// record that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute, normalized path (identity key)
    pub path: PathBuf,
    /// Last modification time reported by the filesystem
    pub mtime: SystemTime,
    /// Size in bytes
    pub size: u64,
    /// Content hash (xxh3-128, hex); `None` if hashing failed
    pub hash: Option<String>,
    /// Detected language; `None` if unknown
    pub language: Option<String>,
    /// Import-like statements found in the file, in source order
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, mtime: SystemTime, size: u64) -> Self {
        Self {
            path: path.into(),
            mtime,
            size,
            hash: None,
            language: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<DependencyRecord>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Modification time as nanoseconds since the epoch (0 for pre-epoch times).
    pub fn mtime_nanos(&self) -> u128 {
        self.mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }

    /// Dependencies that may point at files inside the project.
    pub fn internal_dependencies(&self) -> impl Iterator<Item = &DependencyRecord> {
        self.dependencies.iter().filter(|d| d.kind.is_internal())
    }
}

// =====================================================
// Dependency Records
// =====================================================

/// How an import statement relates to the project.
///
/// Derived from syntax alone (leading dots, first segment resolvable
/// against the project root), never from the imported file existing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DependencyKind {
    /// `from .mod import x`; `level` is the number of leading dots
    InternalRelative { level: u32 },
    /// `import pkg.mod` where `pkg` lives under the project root
    InternalAbsolute,
    /// Anything else (stdlib, third-party)
    External,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::InternalRelative { .. } => "internal_relative",
            DependencyKind::InternalAbsolute => "internal_absolute",
            DependencyKind::External => "external",
        }
    }

    pub fn is_internal(&self) -> bool {
        !matches!(self, DependencyKind::External)
    }

    /// Relative-import level; `None` for anything but relative imports.
    pub fn level(&self) -> Option<u32> {
        match self {
            DependencyKind::InternalRelative { level } => Some(*level),
            _ => None,
        }
    }
}

/// One import-like statement found in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// Module name as written, without leading dots (e.g. "os.path", "models")
    pub module_name: String,
    /// Classification of the import
    pub kind: DependencyKind,
}

impl DependencyRecord {
    pub fn external(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            kind: DependencyKind::External,
        }
    }

    pub fn absolute(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            kind: DependencyKind::InternalAbsolute,
        }
    }

    pub fn relative(module_name: impl Into<String>, level: u32) -> Self {
        Self {
            module_name: module_name.into(),
            kind: DependencyKind::InternalRelative { level },
        }
    }

    pub fn level(&self) -> Option<u32> {
        self.kind.level()
    }
}

// =====================================================
// Cache Metadata
// =====================================================

/// Validity metadata stored next to the cached records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the cache file was written
    pub cache_time: SystemTime,
    /// Aggregate hash over (path, mtime, size, hash) of every record
    pub state_hash: String,
    /// Layout version of the cache document
    pub format_version: u32,
}

// =====================================================
// Change Events
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Moved => "moved",
        }
    }
}

/// Where a change event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOrigin {
    /// Reported by the filesystem watcher (or injected by a caller)
    Watcher,
    /// Synthesized because a file this path imports was modified
    Propagated {
        /// File whose modification started the chain
        source: PathBuf,
        /// Number of dependency edges between `source` and this event's path
        hops: u32,
    },
}

/// A filesystem change, as consumed by the differential updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub src_path: PathBuf,
    pub is_directory: bool,
    /// Destination for `Moved` events
    pub dest_path: Option<PathBuf>,
    pub origin: EventOrigin,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, src_path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind,
            src_path: src_path.into(),
            is_directory,
            dest_path: None,
            origin: EventOrigin::Watcher,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Created, path, false)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Modified, path, false)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Deleted, path, false)
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            dest_path: Some(to.into()),
            ..Self::new(ChangeKind::Moved, from, is_directory)
        }
    }

    /// Directory-level event that always forces a full re-scan.
    pub fn rescan(root: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Modified, root, true)
    }

    /// Modified event for `dependent`, caused by a change to `source`.
    pub fn propagated(dependent: impl Into<PathBuf>, source: &Path, hops: u32) -> Self {
        Self {
            origin: EventOrigin::Propagated {
                source: source.to_path_buf(),
                hops,
            },
            ..Self::modified(dependent)
        }
    }

    pub fn is_propagated(&self) -> bool {
        matches!(self.origin, EventOrigin::Propagated { .. })
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = if self.is_directory { "directory" } else { "file" };
        write!(f, "{} {}: {}", self.kind.as_str(), target, self.src_path.display())?;
        if let Some(dest) = &self.dest_path {
            write!(f, " -> {}", dest.display())?;
        }
        if let EventOrigin::Propagated { source, hops } = &self.origin {
            write!(f, " (via {}, hop {})", source.display(), hops)?;
        }
        Ok(())
    }
}

// =====================================================
// Context
// =====================================================

/// Formatted LLM context for a set of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextData {
    /// Concatenated, formatted file contents
    pub context: String,
    /// Absolute paths of the files included, in the order requested
    pub targets: Vec<PathBuf>,
}
