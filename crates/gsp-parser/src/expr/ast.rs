//! Expression AST types.

use smol_str::SmolStr;

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Expr {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Decimal literal.
    Float(f64),
    /// String literal without interpolation.
    Str(SmolStr),
    /// Interpolated string (`"a ${b} c"`).
    Template(Vec<TemplatePart>),
    /// Variable reference.
    Ident(SmolStr),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `[key: value]`, `[:]`
    Map(Vec<(SmolStr, Expr)>),
    /// `target.name` or `target?.name`
    Property {
        /// The receiver.
        target: Box<Expr>,
        /// Property name.
        name: SmolStr,
        /// Whether this is a null-safe access.
        safe: bool,
    },
    /// `target[index]`
    Index {
        /// The receiver.
        target: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// `name(args)` or `target.name(args)`
    Call(Box<Call>),
    /// Prefix operator application.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// Infix operator application.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `value ?: fallback`
    Elvis {
        /// The preferred value.
        value: Box<Expr>,
        /// Used when `value` is falsy.
        fallback: Box<Expr>,
    },
    /// `test ? then : otherwise`
    Conditional {
        /// The condition.
        test: Box<Expr>,
        /// Value when the condition holds.
        then: Box<Expr>,
        /// Value otherwise.
        otherwise: Box<Expr>,
    },
}

/// A method or function call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Call {
    /// Receiver, absent for free function calls.
    pub target: Option<Expr>,
    /// Method or function name.
    pub name: SmolStr,
    /// Positional arguments.
    pub args: Vec<Expr>,
    /// Named arguments, in source order.
    pub named: Vec<(SmolStr, Expr)>,
    /// Whether the receiver is accessed with `?.`.
    pub safe: bool,
}

/// A segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TemplatePart {
    /// Literal text.
    Text(SmolStr),
    /// Interpolated expression.
    Expr(Expr),
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    /// Binding power, higher binds tighter.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::NotEq => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::In => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }

    /// Source form of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// A scriptlet or declaration statement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Statement {
    /// `name = value`
    Assign {
        /// Variable being assigned.
        name: SmolStr,
        /// Assigned value.
        value: Expr,
    },
    /// An expression evaluated for its side effects.
    Expr(Expr),
}
