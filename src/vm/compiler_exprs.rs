//! Expression compilation: AST expressions to bytecode.
//!
//! Every expression leaves exactly one value on the operand stack.

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::CompileError;
use crate::span::Span;

use super::chunk::Constant;
use super::compiler::{CompileResult, Compiler, MAX_ARGS};
use super::compiler_types::StaticType;
use super::opcode::OpCode;

impl Compiler {
    /// Compile an expression; the result is left on the stack.
    pub fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        let previous = self.set_span(expr.span);
        let result = self.compile_expr_kind(expr);
        self.restore_span(previous);
        result
    }

    fn compile_expr_kind(&mut self, expr: &Expr) -> CompileResult<()> {
        let span = self.current_span();
        match &expr.kind {
            ExprKind::IntLiteral(n) => self.emit_constant(Constant::Int(*n))?,
            ExprKind::FloatLiteral(n) => self.emit_constant(Constant::Float(*n))?,
            ExprKind::StringLiteral(s) => self.emit_constant(Constant::String(s.clone()))?,
            ExprKind::BoolLiteral(b) => {
                self.emit(if *b { OpCode::True } else { OpCode::False }, &[]);
            }
            ExprKind::Null => {
                self.emit(OpCode::Null, &[]);
            }
            ExprKind::Variable(name) => {
                let symbol = self.resolve(name, span)?;
                self.load_symbol(&symbol);
            }
            ExprKind::Binary {
                left,
                operator,
                right,
            } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binary_opcode(*operator), &[]);
            }
            ExprKind::Unary { operator, operand } => {
                self.compile_expr(operand)?;
                let op = match operator {
                    UnaryOp::Negate => OpCode::Negate,
                    UnaryOp::Not => OpCode::Not,
                };
                self.emit(op, &[]);
            }
            ExprKind::LogicalAnd { left, right } => {
                self.compile_short_circuit(left, right, OpCode::JumpIfFalseNoPop)?;
            }
            ExprKind::LogicalOr { left, right } => {
                self.compile_short_circuit(left, right, OpCode::JumpIfTrueNoPop)?;
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.compile_expr(then_branch)?;
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump)?;
                self.compile_expr(else_branch)?;
                self.patch_jump(end_jump)?;
            }
            ExprKind::Assign { target, value } => {
                self.compile_assign(target, value, span)?;
            }
            ExprKind::Call { callee, arguments } => {
                self.compile_call_operands(callee, arguments, span)?;
                self.emit(OpCode::Call, &[arguments.len()]);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(OpCode::Index, &[]);
            }
            ExprKind::Member { object, name } => {
                self.compile_expr(object)?;
                let field = self.string_constant(name)?;
                self.emit(OpCode::GetField, &[field]);
            }
            ExprKind::Array(elements) => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit_sized(OpCode::BuildArray, elements.len(), "array elements", span)?;
            }
            ExprKind::Hash(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit_sized(OpCode::BuildHash, pairs.len(), "map entries", span)?;
            }
            ExprKind::Function(decl) => self.compile_function(decl)?,
            ExprKind::Spawn(call) => match &call.kind {
                ExprKind::Call { callee, arguments } => {
                    self.compile_call_operands(callee, arguments, span)?;
                    self.emit(OpCode::Spawn, &[arguments.len()]);
                }
                _ => return Err(CompileError::InvalidSpawn(call.span)),
            },
            ExprKind::Await(operand) => {
                self.compile_expr(operand)?;
                self.emit(OpCode::Await, &[]);
            }
        }
        Ok(())
    }

    /// `a && b` / `a || b`: the left value stays as the result when the jump
    /// is taken, otherwise it is replaced by the right value.
    fn compile_short_circuit(&mut self, left: &Expr, right: &Expr, jump: OpCode) -> CompileResult<()> {
        self.compile_expr(left)?;
        let end_jump = self.emit_jump(jump);
        self.emit(OpCode::Pop, &[]);
        self.compile_expr(right)?;
        self.patch_jump(end_jump)
    }

    fn compile_call_operands(&mut self, callee: &Expr, arguments: &[Expr], span: Span) -> CompileResult<()> {
        if arguments.len() > MAX_ARGS {
            return Err(CompileError::limit("call arguments", MAX_ARGS, span));
        }
        self.compile_expr(callee)?;
        for argument in arguments {
            self.compile_expr(argument)?;
        }
        Ok(())
    }

    fn emit_sized(&mut self, op: OpCode, size: usize, what: &'static str, span: Span) -> CompileResult<()> {
        if size > u16::MAX as usize {
            return Err(CompileError::limit(what, u16::MAX as usize, span));
        }
        self.emit(op, &[size]);
        Ok(())
    }

    /// Assignment evaluates to the assigned value.
    fn compile_assign(&mut self, target: &Expr, value: &Expr, span: Span) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                let symbol = self.resolve(name, target.span)?;
                if symbol.declared != StaticType::Any {
                    self.check_type(symbol.declared, value)?;
                }
                self.compile_expr(value)?;
                self.emit(OpCode::Dup, &[]);
                self.store_symbol(&symbol, span)
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit(OpCode::SetIndex, &[]);
                Ok(())
            }
            ExprKind::Member { object, name } => {
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                let field = self.string_constant(name)?;
                self.emit(OpCode::SetField, &[field]);
                Ok(())
            }
            _ => Err(CompileError::InvalidAssignmentTarget(target.span)),
        }
    }
}

fn binary_opcode(operator: BinaryOp) -> OpCode {
    match operator {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Subtract,
        BinaryOp::Multiply => OpCode::Multiply,
        BinaryOp::Divide => OpCode::Divide,
        BinaryOp::Modulo => OpCode::Modulo,
        BinaryOp::Equal => OpCode::Equal,
        BinaryOp::NotEqual => OpCode::NotEqual,
        BinaryOp::Less => OpCode::Less,
        BinaryOp::LessEqual => OpCode::LessEqual,
        BinaryOp::Greater => OpCode::Greater,
        BinaryOp::GreaterEqual => OpCode::GreaterEqual,
    }
}
