//! The page expression language.
//!
//! A small dynamic language used inside `${...}`, scriptlets and tag
//! attributes: literals, interpolated strings, lists and maps, property and
//! safe-navigation access, method calls with named arguments, and the usual
//! arithmetic, comparison and logical operators.

mod ast;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Call, Expr, Statement, TemplatePart, UnaryOp};
pub use parser::{parse_expression, parse_statements, parse_template, ExprError};
