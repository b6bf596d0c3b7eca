use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const EMPTY_TREE: &str = "(Project is empty or all files were ignored)";

#[derive(Default)]
struct DirNode {
    children: BTreeMap<String, Option<DirNode>>,
}

/// Renders project files as a connector-style tree.
///
/// Directory contents deeper than `max_depth` collapse to a single `└── ...` line.
pub fn render_tree(root: &Path, files: &[PathBuf], max_depth: Option<usize>) -> String {
    if files.is_empty() {
        return EMPTY_TREE.to_string();
    }

    let mut top = DirNode::default();
    for file in files {
        let Ok(rel) = file.strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some((name, dirs)) = parts.split_last() else {
            continue;
        };
        let mut node = &mut top;
        for dir in dirs {
            node = node
                .children
                .entry(dir.clone())
                .or_insert_with(|| Some(DirNode::default()))
                .get_or_insert_with(DirNode::default);
        }
        node.children.entry(name.clone()).or_insert(None);
    }

    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![format!("{}/", root_name)];
    render_children(&top, "", 0, max_depth, &mut lines);
    lines.join("\n")
}

fn render_children(
    node: &DirNode,
    prefix: &str,
    depth: usize,
    max_depth: Option<usize>,
    lines: &mut Vec<String>,
) {
    if max_depth.is_some_and(|max| depth >= max) {
        if !node.children.is_empty() {
            lines.push(format!("{}└── ...", prefix));
        }
        return;
    }

    let count = node.children.len();
    for (i, (name, child)) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        lines.push(format!("{}{}{}", prefix, connector, name));
        if let Some(dir) = child {
            let extension = if last { "    " } else { "│   " };
            render_children(dir, &format!("{}{}", prefix, extension), depth + 1, max_depth, lines);
        }
    }
}
