use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;

/// Ignore Engine: decides whether a project path takes part in analysis.
///
/// Matchers are kept in precedence order: configured excludes first, then
/// `.gitignore` files from the project root upward. The first matcher with
/// an opinion (ignore or whitelist) decides.
pub struct IgnoreRules {
    root: PathBuf,
    cache_dir: String,
    exclude: Vec<String>,
    matchers: RwLock<Vec<Gitignore>>,
}

impl IgnoreRules {
    pub fn new(root: &Path, cache_dir: &str, exclude: &[String]) -> Self {
        let rules = Self {
            root: root.to_path_buf(),
            cache_dir: cache_dir.to_string(),
            exclude: exclude.to_vec(),
            matchers: RwLock::new(Vec::new()),
        };
        rules.reload();
        rules
    }

    /// Recompiles every matcher from disk.
    pub fn reload(&self) {
        let mut matchers = Vec::new();

        if !self.exclude.is_empty() {
            let mut builder = GitignoreBuilder::new(&self.root);
            for pattern in &self.exclude {
                if let Err(e) = builder.add_line(None, pattern) {
                    tracing::warn!("Invalid exclude pattern '{}': {}", pattern, e);
                }
            }
            match builder.build() {
                Ok(gi) => matchers.push(gi),
                Err(e) => tracing::warn!("Failed to compile exclude patterns: {}", e),
            }
        }

        for dir in self.root.ancestors() {
            let file = dir.join(".gitignore");
            if !file.is_file() {
                continue;
            }
            let mut builder = GitignoreBuilder::new(dir);
            if let Some(e) = builder.add(&file) {
                tracing::warn!("Problem reading {}: {}", file.display(), e);
            }
            match builder.build() {
                Ok(gi) if gi.is_empty() => {
                    tracing::debug!("{} has no patterns", file.display());
                }
                Ok(gi) => matchers.push(gi),
                Err(e) => tracing::warn!("Failed to compile {}: {}", file.display(), e),
            }
        }

        tracing::debug!(
            "Loaded {} ignore matcher(s) for {}",
            matchers.len(),
            self.root.display()
        );
        *self.matchers.write().unwrap_or_else(PoisonError::into_inner) = matchers;
    }

    /// True if `path` (absolute) or any of its parents is ignored.
    ///
    /// Paths outside the project root are never ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            tracing::debug!("Path outside project root, not ignored: {}", path.display());
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        if self.is_builtin_ignored(rel) {
            return true;
        }

        let is_dir = path.is_dir();
        let matchers = self.matchers.read().unwrap_or_else(PoisonError::into_inner);
        for matcher in matchers.iter() {
            match matcher.matched_path_or_any_parents(path, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }

    /// True if the path is a `.gitignore` file, whose change invalidates the rules.
    pub fn is_rules_file(path: &Path) -> bool {
        path.file_name().is_some_and(|n| n == ".gitignore")
    }

    fn is_builtin_ignored(&self, rel: &Path) -> bool {
        let mut components = rel.components();
        let first = components.next().map(|c| c.as_os_str());
        if first.is_some_and(|c| c == self.cache_dir.as_str()) {
            return true;
        }
        rel.components().any(|c| c.as_os_str() == ".git")
    }
}
