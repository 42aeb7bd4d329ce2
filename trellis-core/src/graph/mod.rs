//! Dependency Graph
//!
//! This module implements the graph that tracks which entities read from
//! which, and the dirty propagation that runs over it.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Entries represent scene nodes, parameters and the time controller
//! - Edges represent dependencies: if B reads from A, there is an edge from A to B
//!
//! When an entity changes, we traverse the graph to find all affected
//! entities and mark them as dirty. Nothing is recomputed here; cooking is
//! lazy and happens when somebody asks for a node's output.
//!
//! # Design Decisions
//!
//! 1. The graph is a single arena owned by the scene rather than pointers
//!    stored on every entity:
//!    - Edge pairs are updated atomically under one lock
//!    - Cycle detection is a plain reachability query
//!    - Teardown of an entity removes every edge referencing it
//!
//! 2. The graph is indexed by entity ID for O(1) lookups.
//!
//! 3. We maintain both forward (successors) and reverse (predecessors) edges
//!    to enable efficient traversal in both directions.

mod node;
mod propagation;

pub use node::{DependencyNode, EntityKind, GraphId, NodeId, ParamId};
pub use propagation::{DependencyGraph, Snapshot};
