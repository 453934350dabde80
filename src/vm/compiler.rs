//! AST-to-bytecode compiler.
//!
//! Single-pass compilation: walks the AST once, emitting byte-encoded
//! instructions. Names are resolved at compile time through the symbol table
//! into global slots, local slots, captured (free) values or builtins.

use std::sync::Arc;

use crate::ast::{FunctionDecl, Program, Stmt, StmtKind};
use crate::config::CompilerOptions;
use crate::error::CompileError;
use crate::span::Span;

use super::builtins::BUILTINS;
use super::chunk::{CompiledFunction, CompiledUnit, Constant, Instructions, SourceMap};
use super::compiler_types::StaticType;
use super::opcode::OpCode;
use super::symbol_table::{Symbol, SymbolScope, SymbolTable};

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Placeholder operand for jumps that get patched later.
const PENDING_TARGET: usize = 0xFFFF;

const MAX_CONSTANTS: usize = u16::MAX as usize;
const MAX_GLOBALS: usize = u16::MAX as usize;
const MAX_LOCALS: usize = u8::MAX as usize + 1;
const MAX_FREE: usize = u8::MAX as usize;
pub(crate) const MAX_ARGS: usize = u8::MAX as usize;

/// Break/continue bookkeeping for one enclosing loop.
#[derive(Debug, Default)]
pub struct LoopContext {
    pub break_jumps: Vec<usize>,
    /// Known when the loop condition sits before the body (`while`).
    pub continue_target: Option<usize>,
    /// Continue jumps waiting for the increment's offset (`for`, `for in`).
    pub continue_jumps: Vec<usize>,
    /// Try regions open when the loop started.
    pub try_depth: usize,
}

/// Per-function emission state.
#[derive(Debug, Default)]
pub struct CompilationScope {
    pub instructions: Instructions,
    pub source_map: SourceMap,
    pub loops: Vec<LoopContext>,
    /// Currently open try regions in this function.
    pub try_depth: usize,
    pub return_type: Option<StaticType>,
}

/// The compiler: transforms AST into bytecode.
pub struct Compiler {
    pub(crate) constants: Vec<Constant>,
    pub(crate) symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
    pub(crate) options: CompilerOptions,
    current_span: Span,
    /// Counter for compiler-generated local names.
    hidden: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_options(CompilerOptions::default())
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        let mut symbols = SymbolTable::new();
        for (index, (name, _)) in BUILTINS.iter().enumerate() {
            symbols.define_builtin(index, name);
        }
        Self {
            constants: Vec::new(),
            symbols,
            scopes: vec![CompilationScope::default()],
            options,
            current_span: Span::default(),
            hidden: 0,
        }
    }

    /// Compile a full program.
    pub fn compile(mut self, program: &Program) -> CompileResult<CompiledUnit> {
        self.compile_body(&program.statements)?;
        let num_globals = self.symbols.num_definitions();
        if num_globals > MAX_GLOBALS {
            return Err(CompileError::limit("globals", MAX_GLOBALS, self.current_span));
        }
        let scope = self.scopes.pop().unwrap_or_default();
        Ok(CompiledUnit {
            instructions: scope.instructions,
            constants: self.constants,
            source_map: scope.source_map,
            num_globals,
        })
    }

    /// Compile a function or program body. A trailing expression statement
    /// becomes the return value; otherwise the body returns null.
    pub(crate) fn compile_body(&mut self, body: &[Stmt]) -> CompileResult<()> {
        if let Some((last, init)) = body.split_last() {
            for stmt in init {
                self.compile_stmt(stmt)?;
            }
            if let StmtKind::Expression(expr) = &last.kind {
                let previous = self.set_span(last.span);
                self.compile_expr(expr)?;
                self.emit(OpCode::Return, &[]);
                self.current_span = previous;
                return Ok(());
            }
            self.compile_stmt(last)?;
        }
        self.emit(OpCode::Null, &[]);
        self.emit(OpCode::Return, &[]);
        Ok(())
    }

    // --- Emission helpers ---

    pub(crate) fn scope(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Make `span` the position recorded for following instructions.
    /// Returns the previous one for restoring.
    pub(crate) fn set_span(&mut self, span: Span) -> Span {
        let previous = self.current_span;
        if !span.is_unknown() {
            self.current_span = span;
        }
        previous
    }

    pub(crate) fn restore_span(&mut self, previous: Span) {
        self.current_span = previous;
    }

    pub(crate) fn current_span(&self) -> Span {
        self.current_span
    }

    pub(crate) fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let span = self.current_span;
        let scope = self.scope();
        let offset = scope.instructions.emit(op, operands);
        scope.source_map.record(offset, span);
        offset
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.scopes
            .last()
            .map_or(0, |scope| scope.instructions.len())
    }

    /// Emit a jump whose target is filled in by `patch_jump`.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op, &[PENDING_TARGET])
    }

    /// Emit a jump to an already known offset.
    pub(crate) fn emit_jump_to(&mut self, op: OpCode, target: usize) -> CompileResult<()> {
        self.check_target(target)?;
        self.emit(op, &[target]);
        Ok(())
    }

    /// Point the jump at `offset` to the current end of code.
    pub(crate) fn patch_jump(&mut self, offset: usize) -> CompileResult<()> {
        let target = self.current_offset();
        self.patch_jump_to(offset, target)
    }

    pub(crate) fn patch_jump_to(&mut self, offset: usize, target: usize) -> CompileResult<()> {
        self.check_target(target)?;
        self.scope().instructions.patch_jump(offset, target);
        Ok(())
    }

    fn check_target(&self, target: usize) -> CompileResult<()> {
        if target >= PENDING_TARGET {
            return Err(CompileError::limit(
                "instructions in one function",
                PENDING_TARGET,
                self.current_span,
            ));
        }
        Ok(())
    }

    pub(crate) fn add_constant(&mut self, constant: Constant) -> CompileResult<usize> {
        // Reuse identical scalar constants
        if matches!(constant, Constant::Int(_) | Constant::String(_)) {
            if let Some(idx) = self.constants.iter().position(|c| *c == constant) {
                return Ok(idx);
            }
        }
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::limit("constants", MAX_CONSTANTS, self.current_span));
        }
        self.constants.push(constant);
        Ok(self.constants.len() - 1)
    }

    pub(crate) fn emit_constant(&mut self, constant: Constant) -> CompileResult<()> {
        let idx = self.add_constant(constant)?;
        self.emit(OpCode::Constant, &[idx]);
        Ok(())
    }

    pub(crate) fn string_constant(&mut self, text: &str) -> CompileResult<usize> {
        self.add_constant(Constant::String(text.to_string()))
    }

    // --- Scope management ---

    pub(crate) fn enter_block(&mut self) {
        let outer = std::mem::take(&mut self.symbols);
        self.symbols = SymbolTable::new_block(outer);
    }

    pub(crate) fn leave_block(&mut self) {
        let block = std::mem::take(&mut self.symbols);
        if let Some(outer) = block.into_outer() {
            self.symbols = outer;
        }
    }

    fn enter_function(&mut self) {
        let outer = std::mem::take(&mut self.symbols);
        self.symbols = SymbolTable::new_function(outer);
        self.scopes.push(CompilationScope::default());
    }

    /// Leave a function body, returning its emission state, slot count and
    /// the enclosing-scope symbols it captured.
    fn leave_function(&mut self) -> (CompilationScope, usize, Vec<Symbol>) {
        let scope = self.scopes.pop().unwrap_or_default();
        let mut table = std::mem::take(&mut self.symbols);
        let num_locals = table.num_definitions();
        let free = std::mem::take(&mut table.free_symbols);
        if let Some(outer) = table.into_outer() {
            self.symbols = outer;
        }
        (scope, num_locals, free)
    }

    /// Declare a compiler-generated local (`@iter0`, `@switch1`, ...).
    pub(crate) fn define_hidden(&mut self, prefix: &str) -> CompileResult<Symbol> {
        let name = format!("@{}{}", prefix, self.hidden);
        self.hidden += 1;
        self.define(&name, false, StaticType::Any)
    }

    pub(crate) fn define(
        &mut self,
        name: &str,
        is_const: bool,
        declared: StaticType,
    ) -> CompileResult<Symbol> {
        let symbol = self.symbols.define(name, is_const, declared);
        match symbol.scope {
            SymbolScope::Local if symbol.index >= MAX_LOCALS => Err(CompileError::limit(
                "local variables",
                MAX_LOCALS,
                self.current_span,
            )),
            SymbolScope::Global if symbol.index >= MAX_GLOBALS => {
                Err(CompileError::limit("globals", MAX_GLOBALS, self.current_span))
            }
            _ => Ok(symbol),
        }
    }

    pub(crate) fn resolve(&mut self, name: &str, span: Span) -> CompileResult<Symbol> {
        let symbol = self
            .symbols
            .resolve(name)
            .ok_or_else(|| CompileError::UndefinedVariable(name.to_string(), span))?;
        if symbol.scope == SymbolScope::Free && symbol.index >= MAX_FREE {
            return Err(CompileError::limit("captured variables", MAX_FREE, span));
        }
        Ok(symbol)
    }

    /// Push the value of `symbol`.
    pub(crate) fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(OpCode::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(OpCode::GetFree, &[symbol.index]),
            SymbolScope::Builtin => self.emit(OpCode::GetBuiltin, &[symbol.index]),
            SymbolScope::Function => self.emit(OpCode::CurrentClosure, &[]),
        };
    }

    /// Pop the top of stack into `symbol`.
    pub(crate) fn store_symbol(&mut self, symbol: &Symbol, span: Span) -> CompileResult<()> {
        match symbol.scope {
            SymbolScope::Global if !symbol.is_const => {
                self.emit(OpCode::SetGlobal, &[symbol.index]);
            }
            SymbolScope::Local if !symbol.is_const => {
                self.emit(OpCode::SetLocal, &[symbol.index]);
            }
            SymbolScope::Free => {
                return Err(CompileError::AssignToCaptured(symbol.name.clone(), span));
            }
            _ => return Err(CompileError::AssignToConst(symbol.name.clone(), span)),
        }
        Ok(())
    }

    /// Initialize a freshly defined binding. Unlike `store_symbol` this is
    /// allowed for constants.
    pub(crate) fn init_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::SetGlobal, &[symbol.index]),
            _ => self.emit(OpCode::SetLocal, &[symbol.index]),
        };
    }

    // --- Loop context ---

    pub(crate) fn begin_loop(&mut self, continue_target: Option<usize>) {
        let scope = self.scope();
        let try_depth = scope.try_depth;
        scope.loops.push(LoopContext {
            continue_target,
            try_depth,
            ..LoopContext::default()
        });
    }

    /// Patch pending continue jumps to `continue_target`.
    pub(crate) fn set_continue_target(&mut self, continue_target: usize) -> CompileResult<()> {
        let pending = match self.scope().loops.last_mut() {
            Some(ctx) => {
                ctx.continue_target = Some(continue_target);
                std::mem::take(&mut ctx.continue_jumps)
            }
            None => Vec::new(),
        };
        for jump in pending {
            self.patch_jump_to(jump, continue_target)?;
        }
        Ok(())
    }

    /// Close the innermost loop; breaks land at the current offset.
    pub(crate) fn end_loop(&mut self) -> CompileResult<()> {
        if let Some(ctx) = self.scope().loops.pop() {
            for jump in ctx.break_jumps {
                self.patch_jump(jump)?;
            }
        }
        Ok(())
    }

    // --- Function compilation ---

    /// Compile a function body and emit the closure-make sequence in the
    /// enclosing code: one load per captured value, then `Closure`.
    pub(crate) fn compile_function(&mut self, decl: &FunctionDecl) -> CompileResult<()> {
        if decl.params.len() > MAX_ARGS {
            return Err(CompileError::limit("parameters", MAX_ARGS, decl.span));
        }
        let name = decl
            .name
            .clone()
            .unwrap_or_else(|| "<anonymous>".to_string());

        self.enter_function();
        if let Some(own_name) = &decl.name {
            self.symbols.define_function_name(own_name);
        }
        for param in &decl.params {
            let declared = param
                .type_annotation
                .as_ref()
                .map_or(StaticType::Any, StaticType::from_annotation);
            let previous = self.set_span(param.span);
            let defined = self.define(&param.name, false, declared);
            self.restore_span(previous);
            defined?;
        }
        self.scope().return_type = decl.return_type.as_ref().map(StaticType::from_annotation);

        let body = self.compile_body(&decl.body);
        let (scope, num_locals, free) = self.leave_function();
        body?;

        if free.len() > MAX_FREE {
            return Err(CompileError::limit("captured variables", MAX_FREE, decl.span));
        }
        for symbol in &free {
            self.load_symbol(symbol);
        }

        tracing::debug!(
            function = %name,
            num_locals,
            captured = free.len(),
            bytes = scope.instructions.len(),
            "compiled function"
        );

        let function = CompiledFunction {
            name,
            instructions: scope.instructions,
            num_locals,
            num_params: decl.params.len(),
            is_async: decl.is_async,
            source_map: scope.source_map,
        };
        let idx = self.add_constant(Constant::Function(Arc::new(function)))?;
        self.emit(OpCode::Closure, &[idx, free.len()]);
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile `program` with default options.
pub fn compile(program: &Program) -> CompileResult<CompiledUnit> {
    Compiler::new().compile(program)
}
