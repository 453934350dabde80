//! Bytecode toolchain for Brook: compiles the AST to byte-encoded
//! instructions and executes them on a stack-based VM.

pub mod builtins;
pub mod chunk;
pub mod compiler;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod compiler_types;
pub mod disassembler;
pub mod loader;
pub mod opcode;
pub mod scheduler;
pub mod serializer;
pub mod symbol_table;
pub mod tasks;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;
pub mod vm_calls;
pub mod vm_exceptions;
pub mod vm_ops;

#[cfg(test)]
mod tests;

pub use chunk::{CompiledFunction, CompiledUnit, Constant, Instructions, SourceMap};
pub use compiler::Compiler;
pub use disassembler::disassemble;
pub use loader::{ModuleLoader, StaticLoader};
pub use opcode::OpCode;
pub use value::Value;
pub use vm::Vm;
