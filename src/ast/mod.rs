//! Abstract Syntax Tree consumed by the bytecode compiler.
//!
//! The tree is produced by an external parser; `build` offers constructors
//! for assembling one by hand.

pub mod build;
pub mod expr;
pub mod stmt;
pub mod types;

pub use expr::{BinaryOp, Expr, ExprKind, UnaryOp};
pub use stmt::{
    FunctionDecl, ImportDecl, Parameter, Program, Stmt, StmtKind, StructDecl, SwitchCase,
};
pub use types::{TypeAnnotation, TypeKind};
