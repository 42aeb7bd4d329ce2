//! Reference Resolution
//!
//! Maps the references collected by the parser to concrete scene entities
//! through a [`SymbolTable`]. Resolution is pure: wiring the resulting edges
//! into the dependency graph is the scene's job.

use super::ast::{Expression, NodeTarget, Reference};
use crate::error::ResolveError;
use crate::graph::{NodeId, ParamId};
use crate::scene::path::resolve_path;

/// What a reference slot resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Param { node: NodeId, param: ParamId },
    /// A node named by path.
    Node(NodeId),
    /// A node found through an input slot of the owner.
    Input { index: usize, node: NodeId },
}

impl Resolved {
    /// The node whose output this reference reads, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Resolved::Param { .. } => None,
            Resolved::Node(node) | Resolved::Input { node, .. } => Some(*node),
        }
    }
}

/// Lookup interface expressions resolve against.
pub trait SymbolTable {
    fn node_path(&self, node: NodeId) -> Option<String>;

    fn find_node(&self, path: &str) -> Option<NodeId>;

    fn find_param(&self, node: NodeId, name: &str) -> Option<ParamId>;

    /// Number of input slots of `node`.
    fn input_slots(&self, node: NodeId) -> usize;

    /// Upstream node connected to an input slot.
    fn input(&self, node: NodeId, index: usize) -> Option<NodeId>;
}

/// Resolve every reference of `expression`, owned by `param` on `owner`.
///
/// Returns one entry per reference slot, or the first failure.
pub fn resolve(
    expression: &Expression,
    owner: NodeId,
    param: ParamId,
    table: &impl SymbolTable,
) -> Result<Vec<Resolved>, ResolveError> {
    let base = table
        .node_path(owner)
        .ok_or_else(|| ResolveError::NodeNotFound(owner.to_string()))?;

    expression
        .references()
        .iter()
        .map(|reference| match reference {
            Reference::Param(path) => resolve_param(path, &base, owner, param, table),
            Reference::Node(NodeTarget::Input(index)) => resolve_input(*index, owner, table),
            Reference::Node(NodeTarget::Path(path)) => {
                resolve_node(path, &base, table).map(Resolved::Node)
            }
        })
        .collect()
}

fn resolve_node(path: &str, base: &str, table: &impl SymbolTable) -> Result<NodeId, ResolveError> {
    resolve_path(base, path)
        .and_then(|absolute| table.find_node(&absolute))
        .ok_or_else(|| ResolveError::NodeNotFound(path.to_owned()))
}

fn resolve_param(
    path: &str,
    base: &str,
    owner: NodeId,
    param: ParamId,
    table: &impl SymbolTable,
) -> Result<Resolved, ResolveError> {
    let (node_part, name) = match path.rsplit_once('/') {
        Some((node_part, name)) => (node_part, name),
        None => (".", path),
    };

    let node = if node_part == "." {
        owner
    } else if node_part.is_empty() {
        return Err(ResolveError::NodeNotFound("/".to_owned()));
    } else {
        resolve_node(node_part, base, table)?
    };

    let found = table
        .find_param(node, name)
        .ok_or_else(|| ResolveError::ParamNotFound(path.to_owned()))?;

    if found == param {
        return Err(ResolveError::SelfReference(path.to_owned()));
    }

    Ok(Resolved::Param { node, param: found })
}

fn resolve_input(
    index: usize,
    owner: NodeId,
    table: &impl SymbolTable,
) -> Result<Resolved, ResolveError> {
    let count = table.input_slots(owner);
    if index >= count {
        return Err(ResolveError::InputOutOfRange { index, count });
    }
    table
        .input(owner, index)
        .map(|node| Resolved::Input { index, node })
        .ok_or(ResolveError::InputDisconnected { index })
}
