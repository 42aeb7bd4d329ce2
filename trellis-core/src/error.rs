//! Error Types
//!
//! Errors fall into three families:
//!
//! - computation errors ([`CookError`]) raised by node logic,
//! - resolution errors ([`ResolveError`], [`ParseError`], [`EvalError`])
//!   raised while wiring or evaluating an expression,
//! - structural errors ([`GraphError`]) raised when an edge would create a
//!   cycle or a self-reference.
//!
//! Cook and parameter errors are recorded on the failing entity and handed to
//! dependents as values. They are `Clone` because one cook result is shared by
//! every concurrent caller.

use thiserror::Error;

use crate::graph::{GraphId, NodeId};

/// Structural errors of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown graph entity {0}")]
    UnknownEntity(GraphId),

    #[error("entity {0} cannot depend on itself")]
    SelfReference(GraphId),

    #[error("edge {from} -> {to} would create a cycle")]
    Cycle { from: GraphId, to: GraphId },
}

/// Malformed expression text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A reference in an expression that cannot be wired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("parameter not found: {0}")]
    ParamNotFound(String),

    #[error("input {index} out of range, node has {count} inputs")]
    InputOutOfRange { index: usize, count: usize },

    #[error("input {index} is not connected")]
    InputDisconnected { index: usize },

    #[error("parameter references itself: {0}")]
    SelfReference(String),

    #[error("reference to {0} would create a dependency cycle")]
    Cycle(String),
}

/// A failure while computing an expression's value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("reference slot {0} was not resolved")]
    UnresolvedReference(usize),

    #[error("referenced node has no bounds")]
    EmptyBounds,

    #[error("element attribute used outside a per-element evaluation")]
    ElementContext,

    #[error("reference chain deeper than {0}")]
    DepthExceeded(usize),

    #[error("non-finite result")]
    NonFinite,
}

/// Everything that can land in a parameter's error slot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("referenced node {path} failed to cook")]
    Upstream {
        path: String,
        #[source]
        source: Box<CookError>,
    },
}

/// Failure of a node's cook.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CookError {
    /// Raised explicitly by node logic.
    #[error("{0}")]
    Failed(String),

    #[error("required input {index} is not connected")]
    MissingInput { index: usize },

    #[error("input {index} failed")]
    Input {
        index: usize,
        #[source]
        source: Box<CookError>,
    },

    #[error("parameter {name} is invalid")]
    Param {
        name: String,
        #[source]
        source: ParamError,
    },

    #[error("node was removed from the scene")]
    NodeRemoved,
}

impl CookError {
    /// Shorthand for node logic failures.
    pub fn failed(message: impl Into<String>) -> Self {
        CookError::Failed(message.into())
    }
}

/// Misuse of the scene API, reported synchronously.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {node} has no parameter {name}")]
    UnknownParam { node: NodeId, name: String },

    #[error("invalid node name {0:?}")]
    InvalidName(String),

    #[error("a node named {0} already exists")]
    DuplicateName(String),

    #[error("parameter {0} is declared twice")]
    DuplicateParam(String),

    #[error("input {index} out of range, node accepts {max} inputs")]
    InputOutOfRange { index: usize, max: usize },

    #[error("invalid literal for parameter {name}")]
    InvalidLiteral {
        name: String,
        #[source]
        source: EvalError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
