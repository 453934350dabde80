//! Statement compilation: AST statements to bytecode.
//!
//! Every statement leaves the operand stack as it found it.

use crate::ast::{
    Expr, FunctionDecl, ImportDecl, Stmt, StmtKind, StructDecl, SwitchCase, TypeAnnotation,
};
use crate::error::CompileError;
use crate::span::Span;

use super::chunk::{ClassDef, Constant};
use super::compiler::{CompileResult, Compiler};
use super::compiler_types::StaticType;
use super::opcode::OpCode;
use super::symbol_table::Symbol;

impl Compiler {
    /// Compile a statement.
    pub fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let previous = self.set_span(stmt.span);
        let result = self.compile_stmt_kind(stmt);
        self.restore_span(previous);
        result
    }

    fn compile_stmt_kind(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, &[]);
            }
            StmtKind::Let {
                name,
                type_annotation,
                initializer,
            } => {
                self.compile_let(name, type_annotation.as_ref(), initializer.as_ref(), false)?;
            }
            StmtKind::Const {
                name,
                type_annotation,
                initializer,
            } => {
                self.compile_let(name, type_annotation.as_ref(), Some(initializer), true)?;
            }
            StmtKind::Block(stmts) => {
                self.enter_block();
                let result = self.compile_stmts(stmts);
                self.leave_block();
                result?;
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_if(condition, then_branch, else_branch.as_deref())?;
            }
            StmtKind::While { condition, body } => {
                self.compile_while(condition, body)?;
            }
            StmtKind::For {
                initializer,
                condition,
                increment,
                body,
            } => {
                self.enter_block();
                let result = self.compile_for(
                    initializer.as_deref(),
                    condition.as_ref(),
                    increment.as_ref(),
                    body,
                );
                self.leave_block();
                result?;
            }
            StmtKind::ForIn {
                variable,
                iterable,
                body,
            } => {
                self.enter_block();
                let result = self.compile_for_in(variable, iterable, body);
                self.leave_block();
                result?;
            }
            StmtKind::Break => self.compile_break(stmt.span)?,
            StmtKind::Continue => self.compile_continue(stmt.span)?,
            StmtKind::Return(value) => self.compile_return(value.as_ref(), stmt.span)?,
            StmtKind::Throw(value) => {
                self.compile_expr(value)?;
                self.emit(OpCode::Throw, &[]);
            }
            StmtKind::Try {
                try_block,
                catch_var,
                catch_block,
            } => {
                self.compile_try(try_block, catch_var.as_deref(), catch_block)?;
            }
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => {
                self.enter_block();
                let result = self.compile_switch(subject, cases, default.as_deref());
                self.leave_block();
                result?;
            }
            StmtKind::Function(decl) => self.compile_function_decl(decl)?,
            StmtKind::Struct(decl) => self.compile_struct(decl)?,
            StmtKind::Import(decl) => self.compile_import(decl)?,
        }
        Ok(())
    }

    fn compile_stmts(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Compile `stmt` in its own block scope.
    fn compile_scoped(&mut self, stmt: &Stmt) -> CompileResult<()> {
        self.enter_block();
        let result = self.compile_stmt(stmt);
        self.leave_block();
        result
    }

    fn compile_let(
        &mut self,
        name: &str,
        annotation: Option<&TypeAnnotation>,
        initializer: Option<&Expr>,
        is_const: bool,
    ) -> CompileResult<()> {
        let declared = annotation.map_or(StaticType::Any, StaticType::from_annotation);
        match initializer {
            Some(init) => {
                self.check_type(declared, init)?;
                self.compile_expr(init)?;
            }
            None => {
                self.emit(OpCode::Null, &[]);
            }
        }
        // Defined after the initializer so `let x = x` sees the outer `x`.
        let symbol = self.define(name, is_const, declared)?;
        self.init_symbol(&symbol);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> CompileResult<()> {
        self.compile_expr(condition)?;
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.compile_scoped(then_branch)?;

        match else_branch {
            Some(else_branch) => {
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump)?;
                self.compile_scoped(else_branch)?;
                self.patch_jump(end_jump)?;
            }
            None => self.patch_jump(else_jump)?,
        }
        Ok(())
    }

    fn compile_while(&mut self, condition: &Expr, body: &Stmt) -> CompileResult<()> {
        let loop_start = self.current_offset();
        self.compile_expr(condition)?;
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.begin_loop(Some(loop_start));
        self.compile_scoped(body)?;
        self.emit_jump_to(OpCode::Jump, loop_start)?;

        self.patch_jump(exit_jump)?;
        self.end_loop()
    }

    /// `for (init; cond; incr) body`. Continue jumps are patched to the
    /// increment, which is only known once the body is compiled.
    fn compile_for(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
    ) -> CompileResult<()> {
        if let Some(init) = initializer {
            self.compile_stmt(init)?;
        }

        let loop_start = self.current_offset();
        let exit_jump = match condition {
            Some(condition) => {
                self.compile_expr(condition)?;
                Some(self.emit_jump(OpCode::JumpIfFalse))
            }
            None => None,
        };

        self.begin_loop(None);
        self.compile_scoped(body)?;

        let increment_start = self.current_offset();
        self.set_continue_target(increment_start)?;
        if let Some(increment) = increment {
            self.compile_expr(increment)?;
            self.emit(OpCode::Pop, &[]);
        }
        self.emit_jump_to(OpCode::Jump, loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
        }
        self.end_loop()
    }

    /// `for x in iterable`: iterate over an array snapshot held in a hidden
    /// local, with a hidden index counter.
    fn compile_for_in(&mut self, variable: &str, iterable: &Expr, body: &Stmt) -> CompileResult<()> {
        self.compile_expr(iterable)?;
        self.emit(OpCode::IterPrepare, &[]);
        let items = self.define_hidden("iter")?;
        self.init_symbol(&items);

        self.emit_constant(Constant::Int(0))?;
        let counter = self.define_hidden("index")?;
        self.init_symbol(&counter);

        let loop_start = self.current_offset();
        self.load_symbol(&counter);
        self.load_symbol(&items);
        self.emit(OpCode::Length, &[]);
        self.emit(OpCode::Less, &[]);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.begin_loop(None);
        self.enter_block();
        let body_result = self.compile_for_in_body(&items, &counter, variable, body);
        self.leave_block();
        body_result?;

        let increment_start = self.current_offset();
        self.set_continue_target(increment_start)?;
        self.load_symbol(&counter);
        self.emit_constant(Constant::Int(1))?;
        self.emit(OpCode::Add, &[]);
        self.init_symbol(&counter);
        self.emit_jump_to(OpCode::Jump, loop_start)?;

        self.patch_jump(exit_jump)?;
        self.end_loop()
    }

    /// Bind the current element to the loop variable, then run the body.
    fn compile_for_in_body(
        &mut self,
        items: &Symbol,
        counter: &Symbol,
        variable: &str,
        body: &Stmt,
    ) -> CompileResult<()> {
        self.load_symbol(items);
        self.load_symbol(counter);
        self.emit(OpCode::Index, &[]);
        let element = self.define(variable, false, StaticType::Any)?;
        self.init_symbol(&element);
        self.compile_stmt(body)
    }

    /// Emit a `TryExit` for each try region opened since the innermost loop.
    fn exit_try_regions(&mut self) {
        let scope = self.scope();
        let open = match scope.loops.last() {
            Some(ctx) => scope.try_depth - ctx.try_depth,
            None => 0,
        };
        for _ in 0..open {
            self.emit(OpCode::TryExit, &[]);
        }
    }

    fn compile_break(&mut self, span: Span) -> CompileResult<()> {
        if self.scope().loops.is_empty() {
            return Err(CompileError::BreakOutsideLoop(span));
        }
        self.exit_try_regions();
        let jump = self.emit_jump(OpCode::Jump);
        if let Some(ctx) = self.scope().loops.last_mut() {
            ctx.break_jumps.push(jump);
        }
        Ok(())
    }

    fn compile_continue(&mut self, span: Span) -> CompileResult<()> {
        let target = match self.scope().loops.last() {
            Some(ctx) => ctx.continue_target,
            None => return Err(CompileError::ContinueOutsideLoop(span)),
        };
        self.exit_try_regions();
        match target {
            Some(target) => self.emit_jump_to(OpCode::Jump, target)?,
            None => {
                let jump = self.emit_jump(OpCode::Jump);
                if let Some(ctx) = self.scope().loops.last_mut() {
                    ctx.continue_jumps.push(jump);
                }
            }
        }
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> CompileResult<()> {
        let expected = self.scope().return_type;
        match value {
            Some(value) => {
                if let Some(expected) = expected {
                    self.check_type(expected, value)?;
                }
                self.compile_expr(value)?;
            }
            None => {
                if let Some(expected) = expected {
                    if self.options.type_check && !expected.accepts(StaticType::Null) {
                        return Err(CompileError::mismatch(expected.to_string(), "null", span));
                    }
                }
                self.emit(OpCode::Null, &[]);
            }
        }
        self.emit(OpCode::Return, &[]);
        Ok(())
    }

    /// try-enter → A → try-exit → jump over → catch: bind → B → end.
    fn compile_try(
        &mut self,
        try_block: &Stmt,
        catch_var: Option<&str>,
        catch_block: &Stmt,
    ) -> CompileResult<()> {
        let try_enter = self.emit_jump(OpCode::TryEnter);
        self.scope().try_depth += 1;
        let body = self.compile_scoped(try_block);
        self.scope().try_depth -= 1;
        body?;
        self.emit(OpCode::TryExit, &[]);
        let end_jump = self.emit_jump(OpCode::Jump);

        // The handler lands here with the thrown value on the stack.
        self.patch_jump(try_enter)?;
        self.enter_block();
        let handler = self.compile_catch(catch_var, catch_block);
        self.leave_block();
        handler?;

        self.patch_jump(end_jump)
    }

    fn compile_catch(&mut self, catch_var: Option<&str>, catch_block: &Stmt) -> CompileResult<()> {
        match catch_var {
            Some(name) => {
                let symbol = self.define(name, false, StaticType::Any)?;
                self.init_symbol(&symbol);
            }
            None => {
                self.emit(OpCode::Pop, &[]);
            }
        }
        self.compile_stmt(catch_block)
    }

    fn compile_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&[Stmt]>,
    ) -> CompileResult<()> {
        self.compile_expr(subject)?;
        let held = self.define_hidden("switch")?;
        self.init_symbol(&held);

        let mut end_jumps = Vec::with_capacity(cases.len());
        for case in cases {
            let previous = self.set_span(case.span);
            self.load_symbol(&held);
            self.compile_expr(&case.value)?;
            self.emit(OpCode::Equal, &[]);
            let next_case = self.emit_jump(OpCode::JumpIfFalse);

            self.enter_block();
            let body = self.compile_stmts(&case.body);
            self.leave_block();
            body?;
            end_jumps.push(self.emit_jump(OpCode::Jump));
            self.patch_jump(next_case)?;
            self.restore_span(previous);
        }

        if let Some(default) = default {
            self.enter_block();
            let body = self.compile_stmts(default);
            self.leave_block();
            body?;
        }

        for jump in end_jumps {
            self.patch_jump(jump)?;
        }
        Ok(())
    }

    /// `fn name(...) { ... }`: the name is bound in the enclosing scope
    /// before the body compiles.
    fn compile_function_decl(&mut self, decl: &FunctionDecl) -> CompileResult<()> {
        let name = decl
            .name
            .as_deref()
            .ok_or(CompileError::MissingFunctionName(decl.span))?;
        let symbol = self.define(name, false, StaticType::Function)?;
        self.compile_function(decl)?;
        self.init_symbol(&symbol);
        Ok(())
    }

    fn compile_struct(&mut self, decl: &StructDecl) -> CompileResult<()> {
        self.emit_constant(Constant::Class(ClassDef {
            name: decl.name.clone(),
            fields: decl.fields.clone(),
        }))?;
        let symbol = self.define(&decl.name, true, StaticType::Any)?;
        self.init_symbol(&symbol);
        Ok(())
    }

    fn compile_import(&mut self, decl: &ImportDecl) -> CompileResult<()> {
        let path = self.string_constant(&decl.path)?;
        self.emit(OpCode::Import, &[path]);
        let symbol = self.define(&decl.alias, true, StaticType::Map)?;
        self.init_symbol(&symbol);
        Ok(())
    }
}
