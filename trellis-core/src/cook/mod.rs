//! Cooking
//!
//! A cook turns a node's inputs and parameters into a new [`Container`].
//!
//! - [`container`]: immutable results with memoized derived data
//! - [`operator`]: the contract node logic implements
//! - [`scheduler`]: per-node state machine and single-flight cooking

pub mod container;
pub mod operator;
pub mod scheduler;

pub use container::{Bounds, Container, Payload, Points};
pub use operator::{
    Capability, CookContext, InputSpec, InputState, Operator, ParamSlot, ParamSpec,
};
pub use scheduler::{CookResult, CookScheduler, CookState};
