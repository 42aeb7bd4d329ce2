//! Parameters
//!
//! A parameter holds either a literal or an expression. Expressions are
//! parsed when set, resolved whenever the scene's structure changes, and
//! evaluated lazily when a cook or a caller asks for the value.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cook::{ParamSlot, ParamSpec};
use crate::error::{ParamError, ParseError, ResolveError};
use crate::expr::{self, Expression, Resolved};
use crate::graph::{GraphId, NodeId, ParamId};
use crate::value::{ParamKind, Value};

/// What a parameter was set to.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamInput {
    Literal(Value),
    Expression(String),
}

impl ParamInput {
    pub fn has_expression(&self) -> bool {
        matches!(self, ParamInput::Expression(_))
    }
}

/// Mutable part of a parameter.
#[derive(Debug)]
pub(crate) struct ParamState {
    pub(crate) input: ParamInput,
    /// Parsed form of an expression input.
    pub(crate) expression: Option<Result<Arc<Expression>, ParseError>>,
    /// Outcome of the last resolution, if the expression parsed.
    pub(crate) resolution: Option<Result<Vec<Resolved>, ResolveError>>,
    /// Graph entities wired as predecessors for the current resolution.
    pub(crate) sources: Vec<GraphId>,
    /// Last successfully computed uniform value.
    pub(crate) value: Value,
    /// Result of the last evaluation, valid while the entity is clean.
    pub(crate) cached: Option<ParamSlot>,
    pub(crate) error: Option<ParamError>,
}

#[derive(Debug)]
pub(crate) struct ParamCore {
    pub(crate) id: ParamId,
    pub(crate) node: NodeId,
    pub(crate) spec: ParamSpec,
    pub(crate) state: Mutex<ParamState>,
}

impl ParamCore {
    pub(crate) fn new(id: ParamId, node: NodeId, spec: ParamSpec) -> Self {
        let value = spec
            .kind
            .coerce(spec.default.clone())
            .unwrap_or_else(|_| spec.default.clone());
        Self {
            id,
            node,
            state: Mutex::new(ParamState {
                input: ParamInput::Literal(value.clone()),
                expression: None,
                resolution: None,
                sources: Vec::new(),
                value,
                cached: None,
                error: None,
            }),
            spec,
        }
    }

    pub(crate) fn kind(&self) -> ParamKind {
        self.spec.kind
    }

    pub(crate) fn name(&self) -> &str {
        &self.spec.name
    }

    /// Parse expression text the way this parameter's kind reads it.
    ///
    /// Text parameters are templates; everything else is a plain expression.
    pub(crate) fn parse(&self, text: &str) -> Result<Expression, ParseError> {
        match self.kind() {
            ParamKind::Text => expr::parse_template(text),
            _ => expr::parse(text),
        }
    }

    /// Replace the input with a literal. Returns `false` if nothing changed.
    pub(crate) fn set_literal(&self, value: Value) -> bool {
        let mut state = self.state.lock();
        if state.input == ParamInput::Literal(value.clone()) {
            return false;
        }
        state.input = ParamInput::Literal(value.clone());
        state.expression = None;
        state.resolution = None;
        state.value = value;
        state.cached = None;
        state.error = None;
        true
    }

    /// Replace the input with an expression. Returns `false` if nothing
    /// changed.
    pub(crate) fn set_expression(&self, text: &str) -> bool {
        let parsed = self.parse(text).map(Arc::new);
        let mut state = self.state.lock();
        if state.input == ParamInput::Expression(text.to_owned()) {
            return false;
        }
        state.input = ParamInput::Expression(text.to_owned());
        state.error = parsed.as_ref().err().cloned().map(ParamError::from);
        state.expression = Some(parsed);
        state.resolution = None;
        state.cached = None;
        true
    }

    /// The parsed expression, if the input is one and it parsed.
    pub(crate) fn expression(&self) -> Option<Arc<Expression>> {
        match &self.state.lock().expression {
            Some(Ok(expression)) => Some(Arc::clone(expression)),
            _ => None,
        }
    }

    pub(crate) fn has_expression(&self) -> bool {
        self.state.lock().input.has_expression()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphId;

    fn param(spec: ParamSpec) -> ParamCore {
        ParamCore::new(
            ParamId::new(GraphId::from_raw(1)),
            NodeId::new(GraphId::from_raw(0)),
            spec,
        )
    }

    #[test]
    fn defaults_are_coerced_to_the_kind() {
        let p = param(ParamSpec::new("n", ParamKind::Integer, 2.6));
        assert_eq!(p.state.lock().value, Value::Number(3.0));
    }

    #[test]
    fn text_params_parse_templates() {
        let p = param(ParamSpec::text("label", ""));
        assert!(p.set_expression("geo_`$F`"));
        assert!(p.expression().unwrap().uses_time());

        let n = param(ParamSpec::float("x", 0.0));
        n.set_expression("#ff0000");
        assert!(n.expression().is_none());
        assert!(matches!(n.state.lock().error, Some(ParamError::Parse(_))));
    }

    #[test]
    fn unchanged_inputs_report_no_change() {
        let p = param(ParamSpec::float("x", 0.0));
        assert!(p.set_literal(Value::Number(1.0)));
        assert!(!p.set_literal(Value::Number(1.0)));
        assert!(p.set_expression("$F"));
        assert!(!p.set_expression("$F"));
        assert!(p.has_expression());
    }
}
