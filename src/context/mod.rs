pub mod tree;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::index::models::ContextData;
use crate::paths;

pub use tree::render_tree;

/// Turns file contents into one context string.
pub trait FileContentFormatter: Send + Sync {
    /// `files` maps absolute paths to their contents, in sorted order.
    fn format(&self, root: &Path, files: &BTreeMap<PathBuf, String>) -> String;
}

/// Emits each file as a `# --- File: <relative path> ---` header followed by its content.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicFileContentFormatter;

impl FileContentFormatter for BasicFileContentFormatter {
    fn format(&self, root: &Path, files: &BTreeMap<PathBuf, String>) -> String {
        files
            .iter()
            .map(|(path, content)| {
                let name = paths::relative_posix(path, root)
                    .unwrap_or_else(|| path.display().to_string());
                format!("# --- File: {} ---\n{}", name, content.trim_end_matches('\n'))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct ContextBuilder {
    formatter: Box<dyn FileContentFormatter>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(Box::new(BasicFileContentFormatter))
    }
}

impl ContextBuilder {
    pub fn new(formatter: Box<dyn FileContentFormatter>) -> Self {
        Self { formatter }
    }

    /// Reads every target and formats them together.
    ///
    /// Targets must be absolute; any read failure fails the whole build.
    pub fn build(&self, root: &Path, targets: &[PathBuf]) -> Result<ContextData> {
        let mut contents = BTreeMap::new();
        for path in targets {
            if contents.contains_key(path) {
                continue;
            }
            let bytes = fs::read(path)?;
            contents.insert(path.clone(), String::from_utf8_lossy(&bytes).into_owned());
        }

        let context = self.formatter.format(root, &contents);
        tracing::debug!(
            "Built context from {} files ({} bytes)",
            contents.len(),
            context.len()
        );
        Ok(ContextData {
            context,
            targets: targets.to_vec(),
        })
    }
}
