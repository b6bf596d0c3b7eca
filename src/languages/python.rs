use std::path::{Path, PathBuf};

use tree_sitter::Node;

use super::DependencyExtractor;
use crate::error::Result;
use crate::index::models::DependencyRecord;
use crate::indexer::parser::{parse_source, ParsedFile};

/// Extensions a Python module file may carry.
pub const MODULE_EXTENSIONS: &[&str] = &["py", "pyi"];

/// Python import extractor.
///
/// Absolute imports are classified against the project root: a name whose
/// first segment is a module file or directory directly under the root is
/// internal, anything else is external.
pub struct PythonExtractor {
    root: PathBuf,
}

impl PythonExtractor {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn classify_absolute(&self, module_name: &str) -> DependencyRecord {
        if is_project_module(&self.root, top_level_name(module_name)) {
            DependencyRecord::absolute(module_name)
        } else {
            DependencyRecord::external(module_name)
        }
    }

    fn collect(&self, parsed: &ParsedFile, node: Node, out: &mut Vec<DependencyRecord>) {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    if let Some(module) = imported_name(parsed, name) {
                        out.push(self.classify_absolute(module));
                    }
                }
            }
            "import_from_statement" | "future_import_statement" => {
                self.collect_from_import(parsed, node, out);
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.collect(parsed, child, out);
                }
            }
        }
    }

    fn collect_from_import(
        &self,
        parsed: &ParsedFile,
        node: Node,
        out: &mut Vec<DependencyRecord>,
    ) {
        if node.kind() == "future_import_statement" {
            out.push(DependencyRecord::external("__future__"));
            return;
        }
        let Some(module) = node.child_by_field_name("module_name") else {
            return;
        };

        if module.kind() != "relative_import" {
            out.push(self.classify_absolute(parsed.node_text(&module)));
            return;
        }

        let (level, module_name) = split_relative(parsed, module);
        if !module_name.is_empty() {
            out.push(DependencyRecord::relative(module_name, level));
            return;
        }

        // `from . import a, b`: each imported name is a sibling module.
        let mut cursor = node.walk();
        let names: Vec<&str> = node
            .children_by_field_name("name", &mut cursor)
            .filter_map(|n| imported_name(parsed, n))
            .collect();
        if names.is_empty() {
            out.push(DependencyRecord::relative("", level));
        } else {
            out.extend(names.into_iter().map(|n| DependencyRecord::relative(n, level)));
        }
    }
}

impl DependencyExtractor for PythonExtractor {
    fn language(&self) -> &'static str {
        "python"
    }

    fn parse(&self, source: &str, path: &Path) -> Result<Vec<DependencyRecord>> {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let parsed = parse_source(source, &language, path)?;
        let mut found = Vec::new();
        self.collect(&parsed, parsed.root_node(), &mut found);

        let mut deps: Vec<DependencyRecord> = Vec::with_capacity(found.len());
        for dep in found {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        Ok(deps)
    }
}

/// First segment of a dotted module name (`pkg` for `pkg.mod`).
pub fn top_level_name(module_name: &str) -> &str {
    module_name.split('.').next().unwrap_or(module_name)
}

/// True if `name` is importable from the project root as a package
/// directory or a module file.
pub fn is_project_module(root: &Path, name: &str) -> bool {
    !name.is_empty()
        && (root.join(name).is_dir()
            || MODULE_EXTENSIONS
                .iter()
                .any(|ext| root.join(format!("{}.{}", name, ext)).is_file()))
}

/// Module name provided by `path` at the top level of the project, if any.
///
/// Only files directly under `root` with a module extension qualify;
/// package directories are handled by the directory re-scan path.
pub fn top_level_module(root: &Path, path: &Path) -> Option<String> {
    if path.parent() != Some(root) {
        return None;
    }
    let ext = path.extension()?.to_str()?;
    if !MODULE_EXTENSIONS.contains(&ext) {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

/// Module path named by a `dotted_name` or `aliased_import` node.
fn imported_name<'a>(parsed: &'a ParsedFile, node: Node) -> Option<&'a str> {
    match node.kind() {
        "dotted_name" => Some(parsed.node_text(&node)),
        "aliased_import" => node.child_by_field_name("name").map(|n| parsed.node_text(&n)),
        _ => None,
    }
}

/// Splits `..pkg.mod` into (2, "pkg.mod").
fn split_relative<'a>(parsed: &'a ParsedFile, node: Node) -> (u32, &'a str) {
    let text = parsed.node_text(&node);
    let trimmed = text.trim_start_matches('.');
    let level = (text.len() - trimmed.len()) as u32;
    (level, trimmed.trim())
}
