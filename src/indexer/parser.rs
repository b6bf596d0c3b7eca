use std::path::Path;

use crate::error::{CodectxError, Result};

/// Parses `source` with the given tree-sitter grammar.
///
/// A tree containing error or missing nodes is reported as
/// `CodectxError::Parse`; callers decide whether that is fatal.
pub fn parse_source(
    source: &str,
    language: &tree_sitter::Language,
    path: &Path,
) -> Result<ParsedFile> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(language)
        .map_err(|e| CodectxError::Parse(e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| {
            CodectxError::Parse(format!("{}: parser returned no tree", path.display()))
        })?;

    if tree.root_node().has_error() {
        return Err(CodectxError::Parse(format!("{}: syntax error", path.display())));
    }

    Ok(ParsedFile {
        tree,
        source: source.to_string(),
    })
}

pub struct ParsedFile {
    pub tree: tree_sitter::Tree,
    pub source: String,
}

impl ParsedFile {
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn source_bytes(&self) -> &[u8] {
        self.source.as_bytes()
    }

    pub fn node_text(&self, node: &tree_sitter::Node) -> &str {
        node.utf8_text(self.source_bytes()).unwrap_or("")
    }
}
