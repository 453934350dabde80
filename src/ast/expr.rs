//! Expression AST nodes.

use crate::ast::stmt::FunctionDecl;
use crate::span::Span;

/// An expression in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Attach a source line, keeping the rest of the span.
    pub fn at(mut self, line: usize) -> Self {
        self.span.line = line;
        self
    }
}

/// All expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal: 42
    IntLiteral(i64),
    /// Float literal: 3.14
    FloatLiteral(f64),
    /// String literal: "hello"
    StringLiteral(String),
    /// Boolean literal: true, false
    BoolLiteral(bool),
    /// Null literal
    Null,

    /// Variable reference: foo
    Variable(String),

    /// Binary operation: a + b
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },

    /// Unary operation: -x, !x
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },

    /// Logical and: a && b
    LogicalAnd { left: Box<Expr>, right: Box<Expr> },

    /// Logical or: a || b
    LogicalOr { left: Box<Expr>, right: Box<Expr> },

    /// Ternary expression: cond ? then_expr : else_expr
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// Assignment expression: x = 5, a[i] = 5, p.x = 5
    Assign { target: Box<Expr>, value: Box<Expr> },

    /// Function call: foo(a, b)
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },

    /// Index access: arr[index]
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Field access: obj.field
    Member { object: Box<Expr>, name: String },

    /// Array literal: [1, 2, 3]
    Array(Vec<Expr>),

    /// Map literal: { "key": "value", ... }
    Hash(Vec<(Expr, Expr)>),

    /// Function literal: fn(x, y) { ... }, optionally named and async
    Function(Box<FunctionDecl>),

    /// Concurrent call: spawn f(a, b)
    Spawn(Box<Expr>),

    /// Await expression: await expr
    Await(Box<Expr>),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Subtract => write!(f, "-"),
            BinaryOp::Multiply => write!(f, "*"),
            BinaryOp::Divide => write!(f, "/"),
            BinaryOp::Modulo => write!(f, "%"),
            BinaryOp::Equal => write!(f, "=="),
            BinaryOp::NotEqual => write!(f, "!="),
            BinaryOp::Less => write!(f, "<"),
            BinaryOp::LessEqual => write!(f, "<="),
            BinaryOp::Greater => write!(f, ">"),
            BinaryOp::GreaterEqual => write!(f, ">="),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}
