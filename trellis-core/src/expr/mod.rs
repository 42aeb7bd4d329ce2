//! Parameter Expressions
//!
//! A parameter may hold a textual expression instead of a literal. This
//! module turns that text into something the engine can wire and evaluate:
//!
//! 1. [`parse`] / [`parse_template`] build a tagged tree ([`Expression`])
//!    and collect every reference to another parameter or node.
//! 2. [`resolve`] maps those references to scene entities through a
//!    [`SymbolTable`], rejecting self-references.
//! 3. The scene wires one graph edge per resolved reference, then fills an
//!    [`Env`] (cooking referenced nodes as needed) and calls [`evaluate`].
//!
//! # Syntax
//!
//! ```text
//! ch("../box1/size") * 2        parameter reference
//! count(0) + bbox("/geo", "size_y")   node references by input or path
//! $F / 24 + sin($T)             scene time
//! @P.y * 0.5 + @ptnum           per-element attributes
//! geo_`$F`                      template (text parameters)
//! ```

mod ast;
mod eval;
mod parser;
mod resolve;

pub use ast::{
    Attribute, Axis, BinaryOp, Expr, Expression, Function, NodeQuery, NodeTarget, Reference,
    Segment, UnaryOp, Variable,
};
pub use eval::{evaluate, Element, Env, Program, RefValue};
pub use parser::{parse, parse_template};
pub use resolve::{resolve, Resolved, SymbolTable};
