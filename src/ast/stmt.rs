//! Statement AST nodes.

use crate::ast::expr::Expr;
use crate::ast::types::TypeAnnotation;
use crate::span::Span;

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Attach a source line, keeping the rest of the span.
    pub fn at(mut self, line: usize) -> Self {
        self.span.line = line;
        self
    }
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement: expr;
    Expression(Expr),

    /// Variable declaration: let x: Type = expr;
    Let {
        name: String,
        type_annotation: Option<TypeAnnotation>,
        initializer: Option<Expr>,
    },

    /// Constant declaration: const x: Type = expr;
    Const {
        name: String,
        type_annotation: Option<TypeAnnotation>,
        initializer: Expr,
    },

    /// Block: { statements }
    Block(Vec<Stmt>),

    /// If statement: if (cond) { ... } else { ... }
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// While loop: while (cond) { ... }
    While { condition: Expr, body: Box<Stmt> },

    /// Counted loop: for (init; cond; increment) { ... }
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
    },

    /// For-each loop: for (x in iter) { ... }
    ForIn {
        variable: String,
        iterable: Expr,
        body: Box<Stmt>,
    },

    /// break;
    Break,

    /// continue;
    Continue,

    /// Return statement: return expr;
    Return(Option<Expr>),

    /// Throw statement: throw expr;
    Throw(Expr),

    /// Try/Catch: try { ... } catch (e) { ... }
    Try {
        try_block: Box<Stmt>,
        catch_var: Option<String>,
        catch_block: Box<Stmt>,
    },

    /// Switch: switch (subject) { case v: ... default: ... }
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
    },

    /// Function declaration
    Function(FunctionDecl),

    /// Struct declaration: struct Point { x, y }
    Struct(StructDecl),

    /// Import declaration: import "path" as name;
    Import(ImportDecl),
}

/// One `case` arm of a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Function declaration or literal. Declarations always carry a name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub span: Span,
}

/// Function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    pub span: Span,
}

/// Struct declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<String>,
    pub span: Span,
}

/// Import declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub path: String,
    pub alias: String,
    pub span: Span,
}

/// A complete program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}
