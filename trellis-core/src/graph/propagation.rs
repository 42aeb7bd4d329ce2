//! Dirty Propagation
//!
//! [`DependencyGraph`] owns every [`DependencyNode`] of a scene and is the
//! only place where edges and dirty flags change.
//!
//! # Algorithm
//!
//! `set_dirty(n)`:
//!
//! 1. If `n` is already dirty and not open, stop. Its successors were
//!    dirtied when it became dirty.
//! 2. Mark `n` dirty.
//! 3. If the graph is blocked, remember `n` as a pending root and stop.
//! 4. Otherwise walk the successors, marking each newly dirtied entity and
//!    continuing from it. Already dirty entities are reached but only walked
//!    when open.
//!
//! Every entity is visited at most once per pass, so diamonds and fan-in are
//! handled without duplicate work. Cycles are rejected when edges are added,
//! which lets the walk assume a DAG.
//!
//! # Settling
//!
//! Every time an entity is reached its version is bumped, even if it was
//! already dirty. A computation takes a [`Snapshot`] of the versions of the
//! entity and all of its ancestors when it starts, and calls `settle` when it
//! succeeds. The flag is only cleared if none of those versions moved, so an
//! entity dirtied while it is being computed stays dirty.
//!
//! A computation may succeed while a predecessor stays dirty, for instance
//! when a node substitutes a fallback for an input that failed to cook. The
//! dirty ancestors are then marked open: the next dirtying of any of them
//! walks through to the settled entity instead of stopping early.
//!
//! # Blocking
//!
//! `block()` / `unblock()` nest. While blocked, roots are marked but not
//! walked. The outermost `unblock()` flushes all pending roots in a single
//! pass, coalescing what would otherwise be many partial propagations.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use tracing::{trace, warn};

use super::node::{DependencyNode, EntityKind, GraphId};
use crate::config::PropagationOrder;
use crate::error::GraphError;

/// The dependency graph of one scene.
#[derive(Debug)]
pub struct DependencyGraph {
    /// All entities, indexed by ID.
    nodes: HashMap<GraphId, DependencyNode>,

    next_id: u64,

    order: PropagationOrder,

    /// Nesting depth of `block()` calls.
    block_depth: usize,

    /// Roots dirtied while blocked, waiting for the outermost `unblock()`.
    pending: IndexSet<GraphId>,
}

/// Versions of an entity and its ancestors, taken when a computation starts.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    versions: Vec<(GraphId, u64)>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new(order: PropagationOrder) -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
            order,
            block_depth: 0,
            pending: IndexSet::new(),
        }
    }

    /// Allocate a new entity.
    pub fn add_entity(&mut self, kind: EntityKind) -> GraphId {
        let id = GraphId::from_raw(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, DependencyNode::new(id, kind));
        id
    }

    /// Remove an entity.
    ///
    /// Also removes all edges involving it from its neighbours.
    pub fn remove_entity(&mut self, id: GraphId) -> Option<DependencyNode> {
        let node = self.nodes.remove(&id)?;

        for predecessor in node.predecessors() {
            if let Some(pred) = self.nodes.get_mut(predecessor) {
                pred.remove_successor(id);
            }
        }

        for successor in node.successors() {
            if let Some(succ) = self.nodes.get_mut(successor) {
                succ.remove_predecessor(id);
            }
        }

        self.pending.shift_remove(&id);
        Some(node)
    }

    /// Get a reference to an entity.
    pub fn get(&self, id: GraphId) -> Option<&DependencyNode> {
        self.nodes.get(&id)
    }

    /// Whether the entity exists.
    pub fn contains(&self, id: GraphId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Get the total number of entities in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no entities.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an edge: `to` reads from `from`, so dirtying `from` dirties `to`.
    ///
    /// Returns `Ok(false)` if the edge already existed.
    pub fn add_edge(&mut self, from: GraphId, to: GraphId) -> Result<bool, GraphError> {
        if from == to {
            return Err(GraphError::SelfReference(from));
        }
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(GraphError::UnknownEntity(id));
            }
        }
        if self.reaches(to, from) {
            return Err(GraphError::Cycle { from, to });
        }

        let mut added = false;
        if let Some(node) = self.nodes.get_mut(&from) {
            added |= node.add_successor(to);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            added |= node.add_predecessor(from);
        }
        Ok(added)
    }

    /// Remove an edge. Returns `true` if it existed.
    pub fn remove_edge(&mut self, from: GraphId, to: GraphId) -> bool {
        let mut removed = false;
        if let Some(node) = self.nodes.get_mut(&from) {
            removed |= node.remove_successor(to);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            removed |= node.remove_predecessor(from);
        }
        removed
    }

    /// Whether `target` is reachable from `start` along successor edges.
    pub fn reaches(&self, start: GraphId, target: GraphId) -> bool {
        let mut stack = vec![start];
        let mut visited = HashSet::new();

        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.successors().iter().copied());
            }
        }

        false
    }

    /// Whether the entity is dirty. Unknown entities report clean.
    pub fn is_dirty(&self, id: GraphId) -> bool {
        self.nodes.get(&id).is_some_and(DependencyNode::is_dirty)
    }

    /// Mark an entity dirty and propagate to its transitive successors.
    ///
    /// Returns every entity reached by this call, each exactly once: the
    /// newly dirtied ones plus the already dirty ones where the walk stopped.
    /// While blocked, only the root is marked and reported.
    pub fn set_dirty(&mut self, id: GraphId) -> Vec<GraphId> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Vec::new();
        };

        let newly = node.mark_dirty();
        if !newly && !node.take_open() {
            return vec![id];
        }

        if self.block_depth > 0 {
            self.pending.insert(id);
            trace!(entity = %id, "propagation deferred");
            return vec![id];
        }

        self.propagate([id])
    }

    /// Walk successors from roots that are already marked dirty.
    fn propagate(&mut self, roots: impl IntoIterator<Item = GraphId>) -> Vec<GraphId> {
        let mut reached = Vec::new();
        let mut visited = HashSet::new();
        let mut frontier = VecDeque::new();

        for root in roots {
            if visited.insert(root) {
                reached.push(root);
                frontier.push_back(root);
            }
        }

        loop {
            let next = match self.order {
                PropagationOrder::BreadthFirst => frontier.pop_front(),
                PropagationOrder::DepthFirst => frontier.pop_back(),
            };
            let Some(id) = next else { break };

            let successors: Vec<GraphId> = match self.nodes.get(&id) {
                Some(node) => node.successors().iter().copied().collect(),
                None => continue,
            };

            for successor in successors {
                if !visited.insert(successor) {
                    continue;
                }
                if let Some(node) = self.nodes.get_mut(&successor) {
                    reached.push(successor);
                    let newly = node.mark_dirty();
                    if newly || node.take_open() {
                        frontier.push_back(successor);
                    }
                }
            }
        }

        trace!(reached = reached.len(), "dirty propagation pass");
        reached
    }

    /// Clear an entity's dirty flag unconditionally.
    ///
    /// Only for pure sources such as the time controller, which have no
    /// predecessors to be stale against. Returns whether the entity was dirty.
    pub fn remove_dirty_state(&mut self, id: GraphId) -> bool {
        self.nodes
            .get_mut(&id)
            .is_some_and(DependencyNode::mark_clean)
    }

    /// Current version of an entity.
    pub fn version(&self, id: GraphId) -> Option<u64> {
        self.nodes.get(&id).map(DependencyNode::version)
    }

    /// Record the versions of an entity and all of its ancestors.
    pub fn snapshot(&self, id: GraphId) -> Snapshot {
        let mut versions = Vec::new();
        let mut stack = vec![id];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                versions.push((current, node.version()));
                stack.extend(node.predecessors().iter().copied());
            }
        }

        Snapshot { versions }
    }

    /// Mark an entity clean after a successful computation.
    ///
    /// `started` is the snapshot taken when the computation began. The flag
    /// is cleared only if nothing the computation read from has been dirtied
    /// since. Dirty ancestors left behind are marked open. Returns whether the
    /// entity is now clean.
    pub fn settle(&mut self, id: GraphId, started: &Snapshot) -> bool {
        let moved = started
            .versions
            .iter()
            .find(|(entity, version)| self.version(*entity) != Some(*version));
        if let Some((entity, _)) = moved {
            trace!(entity = %id, changed = %entity, "dirtied while computing");
            return false;
        }

        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        node.mark_clean();
        let mut stack: Vec<GraphId> = node.predecessors().iter().copied().collect();
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&current) {
                if node.is_dirty() {
                    node.mark_open();
                    stack.extend(node.predecessors().iter().copied());
                }
            }
        }
        true
    }

    /// Suspend propagation traversal. Nests.
    pub fn block(&mut self) {
        self.block_depth += 1;
    }

    /// Resume propagation traversal.
    ///
    /// When the outermost block is released, every pending root is walked in
    /// one pass and the reached entities are returned.
    pub fn unblock(&mut self) -> Vec<GraphId> {
        if self.block_depth == 0 {
            warn!("unblock called on an unblocked dependency graph");
            return Vec::new();
        }

        self.block_depth -= 1;
        if self.block_depth > 0 || self.pending.is_empty() {
            return Vec::new();
        }

        let roots: Vec<GraphId> = self.pending.drain(..).collect();
        self.propagate(roots)
    }

    /// Whether propagation is currently suspended.
    pub fn is_blocked(&self) -> bool {
        self.block_depth > 0
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new(PropagationOrder::default())
    }
}
