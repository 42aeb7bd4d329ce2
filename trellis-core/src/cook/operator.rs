//! Node Logic Contract
//!
//! Concrete node types implement [`Operator`]. The engine calls
//! [`Operator::cook`] once all inputs have been computed and all parameters
//! evaluated, and stores the returned [`Container`].
//!
//! Optional behaviour is attached with [`Capability`] objects: a node owns a
//! list of them, each contributing parameters and a post-processing step on
//! the produced container.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use smallvec::SmallVec;

use super::container::Container;
use crate::error::{CookError, EvalError, ParamError};
use crate::expr::Program;
use crate::value::{ParamKind, Value};

/// How many inputs a node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSpec {
    /// Leading inputs that must be connected for a cook to start.
    pub required: usize,
    /// Total number of input slots.
    pub max: usize,
}

impl InputSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn exactly(count: usize) -> Self {
        Self {
            required: count,
            max: count,
        }
    }

    pub fn range(required: usize, max: usize) -> Self {
        Self {
            required,
            max: max.max(required),
        }
    }
}

/// Declaration of a node parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: Value,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            default: default.into(),
        }
    }

    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self::new(name, ParamKind::Float, default)
    }

    pub fn integer(name: impl Into<String>, default: i32) -> Self {
        Self::new(name, ParamKind::Integer, default)
    }

    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, ParamKind::Boolean, default)
    }

    pub fn text(name: impl Into<String>, default: &str) -> Self {
        Self::new(name, ParamKind::Text, default)
    }
}

/// Outcome of computing one input before a cook.
#[derive(Debug, Clone)]
pub enum InputState {
    Disconnected,
    Ready(Arc<Container>),
    /// The upstream node errored; the operator decides whether that is fatal.
    Failed(CookError),
}

/// A parameter as handed to a cook.
#[derive(Debug, Clone)]
pub enum ParamSlot {
    Value(Value),
    /// Expression using element attributes; evaluate per element.
    PerElement(Program),
}

/// Everything a cook may read.
#[derive(Debug, Clone)]
pub struct CookContext {
    path: String,
    inputs: SmallVec<[InputState; 4]>,
    params: Arc<IndexMap<String, ParamSlot>>,
}

impl CookContext {
    pub fn new(
        path: impl Into<String>,
        inputs: SmallVec<[InputState; 4]>,
        params: IndexMap<String, ParamSlot>,
    ) -> Self {
        Self {
            path: path.into(),
            inputs,
            params: Arc::new(params),
        }
    }

    /// Absolute path of the node being cooked.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_state(&self, index: usize) -> Option<&InputState> {
        self.inputs.get(index)
    }

    /// The container of input `index`, or why it is unavailable.
    ///
    /// Operators that want the default policy propagate with `?`; others
    /// match on [`CookContext::input_state`] and substitute a fallback.
    pub fn input(&self, index: usize) -> Result<Arc<Container>, CookError> {
        match self.inputs.get(index) {
            Some(InputState::Ready(container)) => Ok(Arc::clone(container)),
            Some(InputState::Failed(err)) => Err(CookError::Input {
                index,
                source: Box::new(err.clone()),
            }),
            Some(InputState::Disconnected) | None => Err(CookError::MissingInput { index }),
        }
    }

    /// Containers of every ready input, in slot order.
    pub fn ready_inputs(&self) -> impl Iterator<Item = &Arc<Container>> + '_ {
        self.inputs.iter().filter_map(|input| match input {
            InputState::Ready(container) => Some(container),
            _ => None,
        })
    }

    pub fn param_slot(&self, name: &str) -> Option<&ParamSlot> {
        self.params.get(name)
    }

    /// Uniform value of a parameter.
    ///
    /// Per-element parameters have no single value; read them with
    /// [`CookContext::param_per_element`].
    pub fn param(&self, name: &str) -> Result<&Value, CookError> {
        match self.params.get(name) {
            Some(ParamSlot::Value(value)) => Ok(value),
            Some(ParamSlot::PerElement(_)) => {
                Err(param_error(name, EvalError::ElementContext.into()))
            }
            None => Err(CookError::failed(format!("no parameter named {name}"))),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, CookError> {
        self.param(name)?
            .as_number()
            .map_err(|err| param_error(name, err.into()))
    }

    pub fn integer(&self, name: &str) -> Result<i64, CookError> {
        self.float(name).map(|n| n.round() as i64)
    }

    pub fn boolean(&self, name: &str) -> Result<bool, CookError> {
        self.param(name).map(Value::is_truthy)
    }

    pub fn text(&self, name: &str) -> Result<String, CookError> {
        self.param(name).map(Value::to_string)
    }

    /// One value per element of `container`.
    ///
    /// Uniform parameters are repeated for every element.
    pub fn param_per_element(
        &self,
        name: &str,
        container: &Container,
    ) -> Result<Vec<Value>, CookError> {
        match self.params.get(name) {
            Some(ParamSlot::Value(value)) => Ok(vec![value.clone(); container.element_count()]),
            Some(ParamSlot::PerElement(program)) => program
                .evaluate_per_element(container)
                .map_err(|err| param_error(name, err.into())),
            None => Err(CookError::failed(format!("no parameter named {name}"))),
        }
    }
}

fn param_error(name: &str, source: ParamError) -> CookError {
    CookError::Param {
        name: name.to_owned(),
        source,
    }
}

/// Node logic.
pub trait Operator: Send + Sync + 'static {
    /// Name of the node type, for logs.
    fn type_name(&self) -> &str;

    fn inputs(&self) -> InputSpec {
        InputSpec::none()
    }

    fn params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Produce a new container. Failures are reported as values, never by
    /// panicking.
    fn cook(&self, ctx: CookContext) -> BoxFuture<'static, Result<Container, CookError>>;
}

/// A unit of optional node behaviour.
pub trait Capability: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Transform the container the operator produced.
    fn apply(&self, container: Container, ctx: &CookContext) -> Result<Container, CookError>;
}
