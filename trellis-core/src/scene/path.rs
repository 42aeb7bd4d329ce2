//! Path Index
//!
//! The symbol table expressions resolve against: absolute node paths mapped
//! to node IDs, kept in sync by the scene on add, rename and remove.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::graph::NodeId;

/// Bidirectional map between absolute node paths and node IDs.
#[derive(Debug, Default)]
pub struct PathIndex {
    by_path: IndexMap<String, NodeId>,
    by_node: HashMap<NodeId, String>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: String, node: NodeId) {
        if let Some(previous) = self.by_node.insert(node, path.clone()) {
            self.by_path.shift_remove(&previous);
        }
        self.by_path.insert(path, node);
    }

    pub fn remove(&mut self, node: NodeId) -> Option<String> {
        let path = self.by_node.remove(&node)?;
        self.by_path.shift_remove(&path);
        Some(path)
    }

    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn path_of(&self, node: NodeId) -> Option<&str> {
        self.by_node.get(&node).map(String::as_str)
    }

    /// Replace every entry.
    pub fn rebuild(&mut self, entries: impl IntoIterator<Item = (String, NodeId)>) {
        self.by_path.clear();
        self.by_node.clear();
        for (path, node) in entries {
            self.insert(path, node);
        }
    }
}

/// Whether `name` can be used as a node name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Apply `reference` to the absolute path `base`.
///
/// Absolute references ignore `base`. `.` stays put, `..` goes one level up.
/// Returns `None` when the reference climbs above the root.
pub fn resolve_path(base: &str, reference: &str) -> Option<String> {
    let mut segments: Vec<&str> = if reference.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            name => segments.push(name),
        }
    }

    Some(format!("/{}", segments.join("/")))
}

/// Absolute path of a child of `parent`.
pub fn child_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{}/{name}", parent.trim_end_matches('/')),
        None => format!("/{name}"),
    }
}
