//! Expression Evaluation
//!
//! Evaluation is synchronous. Everything asynchronous (cooking referenced
//! nodes, evaluating referenced parameters) happens beforehand, while the
//! [`Env`] is filled; the tree walk then only reads from it.

use std::sync::Arc;

use super::ast::{Attribute, BinaryOp, Expr, Expression, Function, NodeQuery, Segment, UnaryOp, Variable};
use crate::cook::Container;
use crate::error::EvalError;
use crate::value::Value;

/// Value bound to a reference slot.
#[derive(Debug, Clone)]
pub enum RefValue {
    /// Target of a `ch()` reference.
    Value(Value),
    /// Cooked output of a node reference.
    Container(Arc<Container>),
}

/// Everything an expression can read.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub frame: f64,
    pub seconds: f64,
    /// Indexed by reference slot.
    pub refs: Vec<RefValue>,
}

/// The element being evaluated in a per-element pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub index: usize,
    pub position: [f64; 3],
}

/// Evaluate an expression against a filled environment.
pub fn evaluate(
    expression: &Expression,
    env: &Env,
    element: Option<Element>,
) -> Result<Value, EvalError> {
    eval(&expression.root, env, element)
}

/// An expression bundled with the environment it was prepared against.
///
/// Cooks receive programs for per-element parameters so that operators can
/// evaluate them against their own elements without touching the scene.
#[derive(Debug, Clone)]
pub struct Program {
    expression: Arc<Expression>,
    env: Env,
}

impl Program {
    pub fn new(expression: Arc<Expression>, env: Env) -> Self {
        Self { expression, env }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Evaluate without an element. Fails on element attributes.
    pub fn evaluate(&self) -> Result<Value, EvalError> {
        evaluate(&self.expression, &self.env, None)
    }

    /// One value per element of `container`.
    ///
    /// Uniform expressions are evaluated once and fanned out.
    pub fn evaluate_per_element(&self, container: &Container) -> Result<Vec<Value>, EvalError> {
        let count = container.element_count();
        if !self.expression.is_per_element() {
            let value = self.evaluate()?;
            return Ok(vec![value; count]);
        }

        let positions = container.payload().positions();
        (0..count)
            .map(|index| {
                let element = Element {
                    index,
                    position: positions.get(index).copied().unwrap_or([0.0; 3]),
                };
                evaluate(&self.expression, &self.env, Some(element))
            })
            .collect()
    }
}

fn finite(n: f64) -> Result<Value, EvalError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(EvalError::NonFinite)
    }
}

fn eval(expr: &Expr, env: &Env, element: Option<Element>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(Variable::Frame) => Ok(Value::Number(env.frame)),
        Expr::Variable(Variable::Time) => Ok(Value::Number(env.seconds)),
        Expr::Attribute(attribute) => {
            let element = element.ok_or(EvalError::ElementContext)?;
            Ok(Value::Number(match attribute {
                Attribute::Index => element.index as f64,
                Attribute::Position(axis) => element.position[axis.index()],
            }))
        }
        Expr::ParamRef { slot, .. } => match env.refs.get(*slot) {
            Some(RefValue::Value(value)) => Ok(value.clone()),
            Some(RefValue::Container(_)) => Err(EvalError::TypeMismatch {
                expected: "parameter",
                found: "node",
            }),
            None => Err(EvalError::UnresolvedReference(*slot)),
        },
        Expr::NodeRef { slot, query, .. } => {
            let container = match env.refs.get(*slot) {
                Some(RefValue::Container(container)) => container,
                Some(RefValue::Value(_)) => {
                    return Err(EvalError::TypeMismatch {
                        expected: "node",
                        found: "parameter",
                    })
                }
                None => return Err(EvalError::UnresolvedReference(*slot)),
            };
            match query {
                NodeQuery::Count => Ok(Value::Number(container.element_count() as f64)),
                NodeQuery::Bounds(component) => container
                    .bounds()
                    .and_then(|bounds| bounds.component(component))
                    .map(Value::Number)
                    .ok_or(EvalError::EmptyBounds),
            }
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, env, element)?;
            match op {
                UnaryOp::Neg => finite(-value.as_number()?),
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
            }
        }
        Expr::Binary { op, lhs, rhs } => binary(*op, lhs, rhs, env, element),
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, env, element)?.as_number())
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &args)
        }
        Expr::Template(segments) => {
            let mut text = String::new();
            for segment in segments {
                match segment {
                    Segment::Text(literal) => text.push_str(literal),
                    Segment::Expr(expr) => text.push_str(&eval(expr, env, element)?.to_string()),
                }
            }
            Ok(Value::Text(text))
        }
    }
}

fn binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &Env,
    element: Option<Element>,
) -> Result<Value, EvalError> {
    let left = eval(lhs, env, element)?;

    // Logical operators short-circuit.
    match op {
        BinaryOp::And if !left.is_truthy() => return Ok(Value::Bool(false)),
        BinaryOp::Or if left.is_truthy() => return Ok(Value::Bool(true)),
        BinaryOp::And | BinaryOp::Or => {
            return Ok(Value::Bool(eval(rhs, env, element)?.is_truthy()))
        }
        _ => {}
    }

    let right = eval(rhs, env, element)?;

    match op {
        BinaryOp::Add if matches!(left, Value::Text(_)) || matches!(right, Value::Text(_)) => {
            Ok(Value::Text(format!("{left}{right}")))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = match (left.as_number(), right.as_number()) {
                (Ok(a), Ok(b)) => a == b,
                _ => left == right,
            };
            Ok(Value::Bool(equal == (op == BinaryOp::Eq)))
        }
        _ => {
            let a = left.as_number()?;
            let b = right.as_number()?;
            match op {
                BinaryOp::Add => finite(a + b),
                BinaryOp::Sub => finite(a - b),
                BinaryOp::Mul => finite(a * b),
                BinaryOp::Div if b == 0.0 => Err(EvalError::DivisionByZero),
                BinaryOp::Div => finite(a / b),
                BinaryOp::Mod if b == 0.0 => Err(EvalError::DivisionByZero),
                BinaryOp::Mod => finite(a % b),
                BinaryOp::Pow => finite(a.powf(b)),
                BinaryOp::Lt => Ok(Value::Bool(a < b)),
                BinaryOp::Le => Ok(Value::Bool(a <= b)),
                BinaryOp::Gt => Ok(Value::Bool(a > b)),
                BinaryOp::Ge => Ok(Value::Bool(a >= b)),
                BinaryOp::Eq => Ok(Value::Bool(a == b)),
                BinaryOp::Ne => Ok(Value::Bool(a != b)),
                BinaryOp::And => Ok(Value::Bool(a != 0.0 && b != 0.0)),
                BinaryOp::Or => Ok(Value::Bool(a != 0.0 || b != 0.0)),
            }
        }
    }
}

fn call(function: Function, args: &[f64]) -> Result<Value, EvalError> {
    let n = match (function, args) {
        (Function::Abs, [x]) => x.abs(),
        (Function::Sin, [x]) => x.sin(),
        (Function::Cos, [x]) => x.cos(),
        (Function::Tan, [x]) => x.tan(),
        (Function::Sqrt, [x]) => x.sqrt(),
        (Function::Floor, [x]) => x.floor(),
        (Function::Ceil, [x]) => x.ceil(),
        (Function::Round, [x]) => x.round(),
        (Function::Min, [first, rest @ ..]) => rest.iter().fold(*first, |acc, x| acc.min(*x)),
        (Function::Max, [first, rest @ ..]) => rest.iter().fold(*first, |acc, x| acc.max(*x)),
        (Function::Pow, [x, y]) => x.powf(*y),
        (Function::Clamp, [x, lo, hi]) => x.max(*lo).min(*hi),
        (Function::Fit, [x, old_min, old_max, new_min, new_max]) => {
            let range = old_max - old_min;
            if range == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let t = ((x - old_min) / range).clamp(0.0, 1.0);
            new_min + t * (new_max - new_min)
        }
        _ => {
            return Err(EvalError::TypeMismatch {
                expected: "argument list matching the function arity",
                found: "mismatched arguments",
            })
        }
    };
    finite(n)
}
