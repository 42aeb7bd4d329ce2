//! Parameter Values
//!
//! The small value universe shared by parameters and expressions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// A resolved parameter or expression value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
        }
    }

    /// Numeric view. Booleans count as 0 or 1; text never converts.
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) => Err(EvalError::TypeMismatch {
                expected: "number",
                found: self.type_name(),
            }),
        }
    }

    /// Truthiness: non-zero numbers and non-empty text are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Float,
    Integer,
    Boolean,
    Text,
}

impl ParamKind {
    /// Convert a value to this kind.
    ///
    /// Integers round to the nearest whole number. Numbers and booleans
    /// interconvert; text only converts to text.
    pub fn coerce(self, value: Value) -> Result<Value, EvalError> {
        match self {
            ParamKind::Float => value.as_number().map(Value::Number),
            ParamKind::Integer => value.as_number().map(|n| Value::Number(n.round())),
            ParamKind::Boolean => match value {
                Value::Text(_) => Err(EvalError::TypeMismatch {
                    expected: "boolean",
                    found: value.type_name(),
                }),
                other => Ok(Value::Bool(other.is_truthy())),
            },
            ParamKind::Text => Ok(Value::Text(value.to_string())),
        }
    }

    /// Interpret raw text as a literal of this kind, if it is one.
    ///
    /// Numeric kinds accept anything `f64` parses; booleans accept
    /// `true`/`false`/`1`/`0`; text is a literal unless it contains a
    /// backtick, which marks an embedded expression.
    pub fn parse_literal(self, raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        match self {
            ParamKind::Float | ParamKind::Integer => trimmed
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .and_then(|n| self.coerce(Value::Number(n)).ok()),
            ParamKind::Boolean => match trimmed {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            ParamKind::Text => (!raw.contains('`')).then(|| Value::Text(raw.to_owned())),
        }
    }
}
