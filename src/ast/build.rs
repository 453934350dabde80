//! Constructors for assembling syntax trees by hand.
//!
//! Every node gets a default span; use `Expr::at` / `Stmt::at` to attach a
//! line when positions matter.

use crate::span::Span;

use super::expr::{BinaryOp, Expr, ExprKind, UnaryOp};
use super::stmt::{
    FunctionDecl, ImportDecl, Parameter, Program, Stmt, StmtKind, StructDecl, SwitchCase,
};
use super::types::{TypeAnnotation, TypeKind};

fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, Span::default())
}

fn s(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::default())
}

pub fn program(statements: Vec<Stmt>) -> Program {
    Program::new(statements)
}

// --- Expressions ---

pub fn int(n: i64) -> Expr {
    e(ExprKind::IntLiteral(n))
}

pub fn float(n: f64) -> Expr {
    e(ExprKind::FloatLiteral(n))
}

pub fn string(text: &str) -> Expr {
    e(ExprKind::StringLiteral(text.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    e(ExprKind::BoolLiteral(b))
}

pub fn null() -> Expr {
    e(ExprKind::Null)
}

pub fn var(name: &str) -> Expr {
    e(ExprKind::Variable(name.to_string()))
}

pub fn binary(left: Expr, operator: BinaryOp, right: Expr) -> Expr {
    e(ExprKind::Binary {
        left: Box::new(left),
        operator,
        right: Box::new(right),
    })
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Add, right)
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Subtract, right)
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Multiply, right)
}

pub fn div(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Divide, right)
}

pub fn less(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Less, right)
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Equal, right)
}

pub fn neg(operand: Expr) -> Expr {
    e(ExprKind::Unary {
        operator: UnaryOp::Negate,
        operand: Box::new(operand),
    })
}

pub fn not(operand: Expr) -> Expr {
    e(ExprKind::Unary {
        operator: UnaryOp::Not,
        operand: Box::new(operand),
    })
}

pub fn and(left: Expr, right: Expr) -> Expr {
    e(ExprKind::LogicalAnd {
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn or(left: Expr, right: Expr) -> Expr {
    e(ExprKind::LogicalOr {
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn ternary(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    e(ExprKind::Conditional {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
    })
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    e(ExprKind::Assign {
        target: Box::new(target),
        value: Box::new(value),
    })
}

pub fn call(callee: Expr, arguments: Vec<Expr>) -> Expr {
    e(ExprKind::Call {
        callee: Box::new(callee),
        arguments,
    })
}

pub fn index(object: Expr, idx: Expr) -> Expr {
    e(ExprKind::Index {
        object: Box::new(object),
        index: Box::new(idx),
    })
}

pub fn member(object: Expr, name: &str) -> Expr {
    e(ExprKind::Member {
        object: Box::new(object),
        name: name.to_string(),
    })
}

pub fn array(elements: Vec<Expr>) -> Expr {
    e(ExprKind::Array(elements))
}

pub fn hash(pairs: Vec<(Expr, Expr)>) -> Expr {
    e(ExprKind::Hash(pairs))
}

pub fn spawn(call_expr: Expr) -> Expr {
    e(ExprKind::Spawn(Box::new(call_expr)))
}

pub fn await_(operand: Expr) -> Expr {
    e(ExprKind::Await(Box::new(operand)))
}

/// Anonymous function literal with untyped parameters.
pub fn func(params: &[&str], body: Vec<Stmt>) -> Expr {
    e(ExprKind::Function(Box::new(function_decl(None, params, body))))
}

/// Named function literal; the name is visible inside the body.
pub fn named_func(name: &str, params: &[&str], body: Vec<Stmt>) -> Expr {
    e(ExprKind::Function(Box::new(function_decl(
        Some(name),
        params,
        body,
    ))))
}

pub fn function_decl(name: Option<&str>, params: &[&str], body: Vec<Stmt>) -> FunctionDecl {
    FunctionDecl {
        name: name.map(str::to_string),
        params: params.iter().map(|p| param(p, None)).collect(),
        return_type: None,
        body,
        is_async: false,
        span: Span::default(),
    }
}

pub fn param(name: &str, type_annotation: Option<TypeAnnotation>) -> Parameter {
    Parameter {
        name: name.to_string(),
        type_annotation,
        span: Span::default(),
    }
}

/// Immediately invoked function: `fn() { body }()`.
pub fn iife(body: Vec<Stmt>) -> Expr {
    call(func(&[], body), vec![])
}

// --- Types ---

pub fn ty(name: &str) -> TypeAnnotation {
    TypeAnnotation::new(TypeKind::Named(name.to_string()), Span::default())
}

// --- Statements ---

pub fn expr_stmt(expr: Expr) -> Stmt {
    s(StmtKind::Expression(expr))
}

pub fn let_(name: &str, initializer: Expr) -> Stmt {
    s(StmtKind::Let {
        name: name.to_string(),
        type_annotation: None,
        initializer: Some(initializer),
    })
}

pub fn let_typed(name: &str, annotation: TypeAnnotation, initializer: Expr) -> Stmt {
    s(StmtKind::Let {
        name: name.to_string(),
        type_annotation: Some(annotation),
        initializer: Some(initializer),
    })
}

pub fn const_(name: &str, initializer: Expr) -> Stmt {
    s(StmtKind::Const {
        name: name.to_string(),
        type_annotation: None,
        initializer,
    })
}

pub fn block(statements: Vec<Stmt>) -> Stmt {
    s(StmtKind::Block(statements))
}

pub fn if_(condition: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
    s(StmtKind::If {
        condition,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    })
}

pub fn while_(condition: Expr, body: Stmt) -> Stmt {
    s(StmtKind::While {
        condition,
        body: Box::new(body),
    })
}

pub fn for_(
    initializer: Option<Stmt>,
    condition: Option<Expr>,
    increment: Option<Expr>,
    body: Stmt,
) -> Stmt {
    s(StmtKind::For {
        initializer: initializer.map(Box::new),
        condition,
        increment,
        body: Box::new(body),
    })
}

pub fn for_in(variable: &str, iterable: Expr, body: Stmt) -> Stmt {
    s(StmtKind::ForIn {
        variable: variable.to_string(),
        iterable,
        body: Box::new(body),
    })
}

pub fn break_() -> Stmt {
    s(StmtKind::Break)
}

pub fn continue_() -> Stmt {
    s(StmtKind::Continue)
}

pub fn ret(value: Expr) -> Stmt {
    s(StmtKind::Return(Some(value)))
}

pub fn throw(value: Expr) -> Stmt {
    s(StmtKind::Throw(value))
}

pub fn try_catch(try_block: Vec<Stmt>, catch_var: Option<&str>, catch_block: Vec<Stmt>) -> Stmt {
    s(StmtKind::Try {
        try_block: Box::new(block(try_block)),
        catch_var: catch_var.map(str::to_string),
        catch_block: Box::new(block(catch_block)),
    })
}

pub fn switch(subject: Expr, cases: Vec<(Expr, Vec<Stmt>)>, default: Option<Vec<Stmt>>) -> Stmt {
    s(StmtKind::Switch {
        subject,
        cases: cases
            .into_iter()
            .map(|(value, body)| SwitchCase {
                value,
                body,
                span: Span::default(),
            })
            .collect(),
        default,
    })
}

pub fn fn_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    s(StmtKind::Function(function_decl(Some(name), params, body)))
}

pub fn async_fn_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    let mut decl = function_decl(Some(name), params, body);
    decl.is_async = true;
    s(StmtKind::Function(decl))
}

pub fn struct_decl(name: &str, fields: &[&str]) -> Stmt {
    s(StmtKind::Struct(StructDecl {
        name: name.to_string(),
        fields: fields.iter().map(|f| f.to_string()).collect(),
        span: Span::default(),
    }))
}

pub fn import(path: &str, alias: &str) -> Stmt {
    s(StmtKind::Import(ImportDecl {
        path: path.to_string(),
        alias: alias.to_string(),
        span: Span::default(),
    }))
}
