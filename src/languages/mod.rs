pub mod python;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::Result;
use crate::index::models::DependencyRecord;

/// Extension (lowercase, without dot) -> language name.
static EXTENSION_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let table: &[(&str, &[&str])] = &[
        ("python", &["py", "pyi", "pyw"]),
        ("rust", &["rs"]),
        ("javascript", &["js", "mjs", "cjs", "jsx"]),
        ("typescript", &["ts", "tsx", "mts", "cts"]),
        ("java", &["java"]),
        ("kotlin", &["kt", "kts"]),
        ("go", &["go"]),
        ("c", &["c", "h"]),
        ("cpp", &["cpp", "cc", "cxx", "hpp", "hh", "hxx"]),
        ("csharp", &["cs"]),
        ("ruby", &["rb"]),
        ("php", &["php"]),
        ("swift", &["swift"]),
        ("scala", &["scala"]),
        ("lua", &["lua"]),
        ("shell", &["sh", "bash", "zsh"]),
        ("markdown", &["md", "markdown"]),
        ("restructuredtext", &["rst"]),
        ("json", &["json"]),
        ("yaml", &["yaml", "yml"]),
        ("toml", &["toml"]),
        ("ini", &["ini", "cfg"]),
        ("xml", &["xml"]),
        ("html", &["html", "htm"]),
        ("css", &["css", "scss", "sass"]),
        ("sql", &["sql"]),
        ("text", &["txt"]),
    ];
    table
        .iter()
        .flat_map(|(lang, exts)| exts.iter().map(move |ext| (*ext, *lang)))
        .collect()
});

/// Extensionless file names with a well-known language.
static FILENAME_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Makefile", "makefile"),
        ("Dockerfile", "dockerfile"),
        ("Gemfile", "ruby"),
        ("Rakefile", "ruby"),
    ])
});

/// Best-effort language detection from the file name alone.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    if let Some(lang) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| FILENAME_MAP.get(n))
    {
        return Some(lang);
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSION_MAP.get(ext.as_str()).copied()
}

/// Extracts import-like dependencies for one language.
pub trait DependencyExtractor: Send + Sync {
    /// Language name as returned by [`detect_language`]
    fn language(&self) -> &'static str;

    /// Parses `source` (the contents of `path`) into dependency records.
    ///
    /// Returns `CodectxError::Parse` when the source is not syntactically valid.
    fn parse(&self, source: &str, path: &Path) -> Result<Vec<DependencyRecord>>;
}

pub struct LanguageRegistry {
    extractors: HashMap<&'static str, Arc<dyn DependencyExtractor>>,
}

impl LanguageRegistry {
    /// Registry with the built-in extractors for a project rooted at `root`.
    pub fn for_project(root: &Path) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(python::PythonExtractor::new(root)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    pub fn register(&mut self, extractor: Arc<dyn DependencyExtractor>) {
        self.extractors.insert(extractor.language(), extractor);
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn DependencyExtractor>> {
        self.extractors.get(language).cloned()
    }

    pub fn supported_languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.extractors.keys().copied().collect();
        langs.sort_unstable();
        langs
    }
}
