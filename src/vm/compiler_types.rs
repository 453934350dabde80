//! Best-effort static type checks.
//!
//! Only annotated bindings are checked, and only against what can be
//! inferred locally from the initializer. The VM keeps its own runtime
//! guards, so anything uncertain is `Any` and passes.

use std::fmt;

use crate::ast::{BinaryOp, Expr, ExprKind, TypeAnnotation, TypeKind, UnaryOp};
use crate::error::CompileError;

use super::compiler::{CompileResult, Compiler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticType {
    Int,
    Float,
    String,
    Bool,
    Null,
    Array,
    Map,
    Function,
    Any,
}

impl StaticType {
    pub fn from_annotation(annotation: &TypeAnnotation) -> Self {
        match &annotation.kind {
            TypeKind::Named(name) => match name.to_ascii_lowercase().as_str() {
                "int" | "integer" => StaticType::Int,
                "float" | "number" => StaticType::Float,
                "string" | "str" => StaticType::String,
                "bool" | "boolean" => StaticType::Bool,
                "null" | "void" => StaticType::Null,
                "array" => StaticType::Array,
                "map" | "hash" => StaticType::Map,
                "fn" | "function" => StaticType::Function,
                _ => StaticType::Any,
            },
            TypeKind::Array(_) => StaticType::Array,
            TypeKind::Hash { .. } => StaticType::Map,
            TypeKind::Function { .. } => StaticType::Function,
            TypeKind::Nullable(_) => StaticType::Any,
        }
    }

    /// Can a value of type `found` be stored where `self` is expected?
    pub fn accepts(self, found: StaticType) -> bool {
        self == StaticType::Any
            || found == StaticType::Any
            || self == found
            || (self == StaticType::Float && found == StaticType::Int)
    }

    fn is_numeric(self) -> bool {
        matches!(self, StaticType::Int | StaticType::Float)
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StaticType::Int => "int",
            StaticType::Float => "float",
            StaticType::String => "string",
            StaticType::Bool => "bool",
            StaticType::Null => "null",
            StaticType::Array => "array",
            StaticType::Map => "map",
            StaticType::Function => "function",
            StaticType::Any => "any",
        };
        write!(f, "{}", name)
    }
}

impl Compiler {
    /// Infer what `expr` evaluates to, as far as it is knowable here.
    pub(crate) fn infer_type(&self, expr: &Expr) -> StaticType {
        match &expr.kind {
            ExprKind::IntLiteral(_) => StaticType::Int,
            ExprKind::FloatLiteral(_) => StaticType::Float,
            ExprKind::StringLiteral(_) => StaticType::String,
            ExprKind::BoolLiteral(_) => StaticType::Bool,
            ExprKind::Null => StaticType::Null,
            ExprKind::Variable(name) => self
                .symbols
                .declared_type(name)
                .unwrap_or(StaticType::Any),
            ExprKind::Binary {
                left,
                operator,
                right,
            } => {
                if operator.is_comparison() {
                    return StaticType::Bool;
                }
                let (l, r) = (self.infer_type(left), self.infer_type(right));
                if *operator == BinaryOp::Add
                    && (l == StaticType::String || r == StaticType::String)
                {
                    StaticType::String
                } else if l.is_numeric() && r.is_numeric() {
                    if l == StaticType::Float || r == StaticType::Float {
                        StaticType::Float
                    } else {
                        StaticType::Int
                    }
                } else {
                    StaticType::Any
                }
            }
            ExprKind::Unary { operator, operand } => match operator {
                UnaryOp::Not => StaticType::Bool,
                UnaryOp::Negate => {
                    let t = self.infer_type(operand);
                    if t.is_numeric() {
                        t
                    } else {
                        StaticType::Any
                    }
                }
            },
            ExprKind::Conditional {
                then_branch,
                else_branch,
                ..
            } => {
                let (a, b) = (self.infer_type(then_branch), self.infer_type(else_branch));
                if a == b {
                    a
                } else {
                    StaticType::Any
                }
            }
            ExprKind::Array(_) => StaticType::Array,
            ExprKind::Hash(_) => StaticType::Map,
            ExprKind::Function(_) => StaticType::Function,
            _ => StaticType::Any,
        }
    }

    /// Reject `expr` if it cannot be a value of type `expected`.
    pub(crate) fn check_type(&self, expected: StaticType, expr: &Expr) -> CompileResult<()> {
        if !self.options.type_check {
            return Ok(());
        }
        let found = self.infer_type(expr);
        if expected.accepts(found) {
            Ok(())
        } else {
            Err(CompileError::mismatch(
                expected.to_string(),
                found.to_string(),
                expr.span,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn test_from_annotation() {
        assert_eq!(StaticType::from_annotation(&ty("Int")), StaticType::Int);
        assert_eq!(StaticType::from_annotation(&ty("string")), StaticType::String);
        assert_eq!(StaticType::from_annotation(&ty("Point")), StaticType::Any);
    }

    #[test]
    fn test_accepts() {
        assert!(StaticType::Float.accepts(StaticType::Int));
        assert!(!StaticType::Int.accepts(StaticType::Float));
        assert!(StaticType::Any.accepts(StaticType::String));
        assert!(StaticType::String.accepts(StaticType::Any));
        assert!(!StaticType::String.accepts(StaticType::Int));
    }

    #[test]
    fn test_infer_binary() {
        let compiler = Compiler::new();
        assert_eq!(compiler.infer_type(&add(int(1), float(1.5))), StaticType::Float);
        assert_eq!(compiler.infer_type(&add(string("a"), int(1))), StaticType::String);
        assert_eq!(compiler.infer_type(&sub(string("a"), int(1))), StaticType::Any);
        assert_eq!(compiler.infer_type(&less(int(1), int(2))), StaticType::Bool);
        assert_eq!(compiler.infer_type(&mul(int(2), int(3))), StaticType::Int);
    }
}
