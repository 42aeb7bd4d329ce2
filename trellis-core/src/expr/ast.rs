//! Expression Syntax Tree
//!
//! Defines the tagged tree the parser produces. References to other
//! parameters and nodes are first-class variants carrying a slot number; the
//! resolver fills slot `i` of an evaluation environment with the value the
//! `i`-th reference points at.

use crate::value::Value;

/// Scene-time variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    /// `$F`: current frame.
    Frame,
    /// `$T`: current time in seconds.
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Per-element attributes, only available when evaluating per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// `@ptnum`
    Index,
    /// `@P.x`, `@P.y`, `@P.z`
    Position(Axis),
}

/// How an expression designates a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTarget {
    /// Input slot of the owning node.
    Input(usize),
    /// Absolute or relative node path.
    Path(String),
}

/// What an expression reads from a referenced node's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeQuery {
    /// `count(ref)`
    Count,
    /// `bbox(ref, "min_x")` and friends.
    Bounds(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// Left and right binding power. Right-associative operators bind
    /// tighter on the left.
    pub(crate) fn binding_power(self) -> (u8, u8) {
        match self {
            BinaryOp::Or => (1, 2),
            BinaryOp::And => (3, 4),
            BinaryOp::Eq | BinaryOp::Ne => (5, 6),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => (7, 8),
            BinaryOp::Add | BinaryOp::Sub => (9, 10),
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => (11, 12),
            BinaryOp::Pow => (15, 14),
        }
    }
}

/// Binding power of prefix operators.
pub(crate) const PREFIX_BINDING_POWER: u8 = 13;

/// Built-in math functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sin,
    Cos,
    Tan,
    Sqrt,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Pow,
    Clamp,
    Fit,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "sqrt" => Function::Sqrt,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "round" => Function::Round,
            "min" => Function::Min,
            "max" => Function::Max,
            "pow" => Function::Pow,
            "clamp" => Function::Clamp,
            "fit" => Function::Fit,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Min | Function::Max => (2, usize::MAX),
            Function::Pow => (2, 2),
            Function::Clamp => (3, 3),
            Function::Fit => (5, 5),
            _ => (1, 1),
        }
    }
}

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(Variable),
    Attribute(Attribute),
    /// `ch("path")`
    ParamRef { slot: usize, path: String },
    /// `count(..)`, `bbox(..)`
    NodeRef {
        slot: usize,
        target: NodeTarget,
        query: NodeQuery,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    /// Text with embedded expressions, joined as text.
    Template(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expr(Expr),
}

/// A reference collected while parsing, indexed by slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Param(String),
    Node(NodeTarget),
}

/// A parsed expression together with what it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub(crate) source: String,
    pub(crate) root: Expr,
    pub(crate) references: Vec<Reference>,
    pub(crate) uses_time: bool,
    pub(crate) per_element: bool,
}

impl Expression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// References in slot order.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Whether `$F` or `$T` appears.
    pub fn uses_time(&self) -> bool {
        self.uses_time
    }

    /// Whether element attributes appear, so the value varies per element.
    pub fn is_per_element(&self) -> bool {
        self.per_element
    }
}
