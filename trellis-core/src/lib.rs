//! Trellis Core
//!
//! This crate provides the dependency and cook engine of the Trellis
//! procedural scene graph. It implements:
//!
//! - A dependency graph with batched dirty propagation
//! - Per-node cook scheduling with caching and single-flight semantics
//! - Parameter expressions that reference other parameters and nodes
//! - Immutable cook results with memoized derived data
//!
//! Concrete node behaviour (geometry, shading, loading) lives outside this
//! crate and plugs in through the [`Operator`] and [`Capability`] traits.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: dependency entities, edges and dirty propagation
//! - `cook`: containers, the operator contract and the cook scheduler
//! - `expr`: expression parsing, resolution and evaluation
//! - `scene`: the context tying the above together
//! - `config`, `error`, `value`: supporting types
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{EngineConfig, Scene};
//!
//! let scene = Scene::new(EngineConfig::default());
//! let grid = scene.add_node("grid", Grid::default())?;
//! let scatter = scene.add_node("scatter", Scatter::default())?;
//! scene.connect(scatter, 0, grid)?;
//!
//! // Parameters can follow other nodes.
//! scene.set_expression(scatter, "seed", "count(0) + $F")?;
//!
//! let points = scene.compute(scatter).await?;
//! scene.set_frame(2.0);
//! // Only the time-dependent part of the graph recooks.
//! let points = scene.compute(scatter).await?;
//! ```

pub mod config;
pub mod cook;
pub mod error;
pub mod expr;
pub mod graph;
pub mod scene;
pub mod value;

pub use config::{EngineConfig, PropagationOrder};
pub use cook::{
    Capability, Container, CookContext, CookResult, CookState, InputSpec, InputState, Operator,
    ParamSpec, Payload, Points,
};
pub use error::{CookError, EvalError, GraphError, ParamError, ParseError, ResolveError, SceneError};
pub use graph::{NodeId, ParamId};
pub use scene::{BlockGuard, NodeBuilder, ParamInput, Scene};
pub use value::{ParamKind, Value};
