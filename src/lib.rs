//! Brook: a small dynamically-typed scripting language with optional type
//! annotations.
//!
//! This is the library root. Programs arrive as syntax trees (see [`ast`]),
//! are compiled to a [`vm::CompiledUnit`] and executed on the stack VM.
//! Compiled units can be written to disk or appended to the `brook` binary
//! to produce a self-contained executable.

#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::too_many_arguments)]

pub mod ast;
pub mod config;
pub mod error;
pub mod span;
pub mod vm;

use std::path::Path;
use std::sync::Arc;

use ast::Program;
use config::{CompilerOptions, VmConfig};
use error::{BrookError, CompileError};
use vm::{CompiledUnit, Compiler, ModuleLoader, Value, Vm};

/// Compile a program with the default options (type checking on).
pub fn compile(program: &Program) -> Result<CompiledUnit, CompileError> {
    Compiler::new().compile(program)
}

/// Compile a program with explicit compiler switches.
pub fn compile_with_options(
    program: &Program,
    options: CompilerOptions,
) -> Result<CompiledUnit, CompileError> {
    Compiler::with_options(options).compile(program)
}

/// Compile and run a program. Limits come from the environment.
pub fn run(program: &Program) -> Result<Value, BrookError> {
    let unit = compile(program)?;
    run_unit(&unit, VmConfig::from_env())
}

/// Run an already compiled unit.
pub fn run_unit(unit: &CompiledUnit, config: VmConfig) -> Result<Value, BrookError> {
    let mut vm = Vm::new(unit, config);
    Ok(vm.run()?)
}

/// Run a compiled unit with a module loader for `import`.
pub fn run_unit_with_loader(
    unit: &CompiledUnit,
    config: VmConfig,
    loader: Arc<dyn ModuleLoader>,
) -> Result<Value, BrookError> {
    let mut vm = Vm::new(unit, config).with_loader(loader);
    Ok(vm.run()?)
}

/// Load a serialized unit from disk and run it.
pub fn run_file(path: &Path, config: VmConfig) -> Result<Value, BrookError> {
    let bytes = std::fs::read(path)?;
    let unit = vm::serializer::deserialize(&bytes)?;
    run_unit(&unit, config)
}

/// Human-readable listing of a compiled unit.
pub fn disassemble(unit: &CompiledUnit) -> String {
    vm::disassemble(unit)
}
