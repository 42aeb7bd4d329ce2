//! Graph Entities
//!
//! This module defines the entries that live in the dependency graph.
//! Scene nodes, parameters and the time controller each own exactly one.

use std::fmt;

use indexmap::IndexSet;

/// Identifier of an entity in the dependency graph.
///
/// Identifiers are allocated by the owning [`DependencyGraph`] and are unique
/// per graph instance, not per process.
///
/// [`DependencyGraph`]: super::DependencyGraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(GraphId);

impl NodeId {
    pub(crate) fn new(id: GraphId) -> Self {
        Self(id)
    }

    /// The dependency graph entry backing this node.
    pub fn graph_id(&self) -> GraphId {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Handle to a node parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(GraphId);

impl ParamId {
    pub(crate) fn new(id: GraphId) -> Self {
        Self(id)
    }

    /// The dependency graph entry backing this parameter.
    pub fn graph_id(&self) -> GraphId {
        self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param{}", self.0)
    }
}

/// What owns a graph entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A scene node. Starts dirty since it has never cooked.
    Node,

    /// A node parameter. Starts dirty so the first evaluation resolves it.
    Param,

    /// The scene's time controller. A pure source: it starts clean and has
    /// no predecessors.
    Time,
}

/// A single entry in the dependency graph.
///
/// Edges are stored on both ends: `successors` are the entities that must be
/// dirtied when this one changes, `predecessors` are the entities this one
/// reads from. Only [`DependencyGraph`](super::DependencyGraph) mutates them,
/// always in pairs.
#[derive(Debug)]
pub struct DependencyNode {
    id: GraphId,
    kind: EntityKind,
    dirty: bool,
    /// Bumped every time the entity is reached by a dirtying pass.
    version: u64,
    /// Dirty, but some successor was settled against its current state.
    open: bool,
    predecessors: IndexSet<GraphId>,
    successors: IndexSet<GraphId>,
}

impl DependencyNode {
    pub(crate) fn new(id: GraphId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            dirty: !matches!(kind, EntityKind::Time),
            version: 0,
            open: false,
            predecessors: IndexSet::new(),
            successors: IndexSet::new(),
        }
    }

    /// Get the entity's ID.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Get the entity's kind.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Whether the cached output of this entity may be stale.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of times the entity has been dirtied.
    ///
    /// A computation records the version it started at; if the version moved
    /// by the time it finishes, its result is already stale.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mark dirty and bump the version. Returns `true` if the flag changed.
    pub(crate) fn mark_dirty(&mut self) -> bool {
        self.version += 1;
        !std::mem::replace(&mut self.dirty, true)
    }

    /// Clear the dirty flag. Returns `true` if the flag changed.
    pub(crate) fn mark_clean(&mut self) -> bool {
        self.open = false;
        std::mem::replace(&mut self.dirty, false)
    }

    /// Whether dirtying this entity again must still reach its successors.
    ///
    /// Set on a dirty entity when something downstream of it settles clean
    /// anyway, e.g. a node that substituted a fallback for a failed input.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = self.dirty;
    }

    pub(crate) fn take_open(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }

    pub(crate) fn add_predecessor(&mut self, id: GraphId) -> bool {
        self.predecessors.insert(id)
    }

    pub(crate) fn remove_predecessor(&mut self, id: GraphId) -> bool {
        self.predecessors.shift_remove(&id)
    }

    pub(crate) fn add_successor(&mut self, id: GraphId) -> bool {
        self.successors.insert(id)
    }

    pub(crate) fn remove_successor(&mut self, id: GraphId) -> bool {
        self.successors.shift_remove(&id)
    }

    /// Entities this one reads from, in insertion order.
    pub fn predecessors(&self) -> &IndexSet<GraphId> {
        &self.predecessors
    }

    /// Entities that read from this one, in insertion order.
    pub fn successors(&self) -> &IndexSet<GraphId> {
        &self.successors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_dirty_state_depends_on_kind() {
        assert!(DependencyNode::new(GraphId(0), EntityKind::Node).is_dirty());
        assert!(DependencyNode::new(GraphId(1), EntityKind::Param).is_dirty());
        assert!(!DependencyNode::new(GraphId(2), EntityKind::Time).is_dirty());
    }

    #[test]
    fn dirty_transitions_report_changes() {
        let mut node = DependencyNode::new(GraphId(0), EntityKind::Node);

        assert!(!node.mark_dirty());
        assert!(node.mark_clean());
        assert!(!node.mark_clean());
        assert!(node.mark_dirty());
        assert!(node.is_dirty());
    }

    #[test]
    fn every_dirtying_bumps_the_version() {
        let mut node = DependencyNode::new(GraphId(0), EntityKind::Node);
        assert_eq!(node.version(), 0);
        node.mark_dirty();
        node.mark_dirty();
        assert_eq!(node.version(), 2);
        node.mark_clean();
        assert_eq!(node.version(), 2);
    }

    #[test]
    fn only_dirty_entities_stay_open() {
        let mut node = DependencyNode::new(GraphId(0), EntityKind::Node);
        node.mark_open();
        assert!(node.is_open());
        node.mark_clean();
        assert!(!node.is_open());

        node.mark_open();
        assert!(!node.is_open());
        node.mark_dirty();
        node.mark_open();
        assert!(node.take_open());
        assert!(!node.is_open());
    }

    #[test]
    fn edge_sets_keep_insertion_order() {
        let mut node = DependencyNode::new(GraphId(0), EntityKind::Node);
        node.add_successor(GraphId(3));
        node.add_successor(GraphId(1));
        node.add_successor(GraphId(2));
        assert!(!node.add_successor(GraphId(1)));

        let order: Vec<_> = node.successors().iter().map(|id| id.raw()).collect();
        assert_eq!(order, vec![3, 1, 2]);

        node.remove_successor(GraphId(1));
        let order: Vec<_> = node.successors().iter().map(|id| id.raw()).collect();
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn handles_display_their_graph_id() {
        let node = NodeId::new(GraphId(7));
        assert_eq!(node.to_string(), "node#7");
        assert_eq!(ParamId::new(GraphId(9)).graph_id().raw(), 9);
    }
}
