//! Compiled code containers: instruction streams, the constants pool,
//! function prototypes and the offset → source position map.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::span::Span;

use super::opcode::{self, OpCode};

/// A flat, byte-encoded instruction stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions(pub Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Append an encoded instruction and return its offset.
    pub fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let offset = self.0.len();
        self.0.extend_from_slice(&opcode::make(op, operands));
        offset
    }

    /// Opcode at `offset`, if it decodes.
    pub fn op_at(&self, offset: usize) -> Option<OpCode> {
        self.0.get(offset).copied().and_then(OpCode::from_u8)
    }

    /// Overwrite the first (u16) operand of the jump instruction at `offset`.
    ///
    /// Panics if `offset` does not hold a jump; the compiler only patches
    /// offsets it emitted itself.
    pub fn patch_jump(&mut self, offset: usize, target: usize) {
        let op = self.op_at(offset);
        assert!(
            op.map_or(false, OpCode::is_jump),
            "Tried to patch non-jump instruction at offset {}",
            offset
        );
        let bytes = (target as u16).to_be_bytes();
        self.0[offset + 1] = bytes[0];
        self.0[offset + 2] = bytes[1];
    }
}

/// Offset → source position table, sorted by offset.
///
/// An entry covers every instruction from its offset up to the next entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    entries: Vec<(u32, Span)>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that instructions from `offset` on come from `span`.
    pub fn record(&mut self, offset: usize, span: Span) {
        if span.is_unknown() {
            return;
        }
        match self.entries.last_mut() {
            Some((_, last)) if *last == span => {}
            Some((last_offset, last)) if *last_offset as usize == offset => *last = span,
            _ => self.entries.push((offset as u32, span)),
        }
    }

    /// Position of the instruction at `offset`, or an unknown span.
    pub fn lookup(&self, offset: usize) -> Span {
        let idx = self
            .entries
            .partition_point(|(start, _)| *start as usize <= offset);
        if idx == 0 {
            Span::default()
        } else {
            self.entries[idx - 1].1
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A struct declaration: its name and ordered field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub fields: Vec<String>,
}

/// One compiled function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunction {
    /// Function name (`<anonymous>` for unnamed literals).
    pub name: String,
    pub instructions: Instructions,
    /// Local slots including parameters.
    pub num_locals: usize,
    pub num_params: usize,
    /// Calls return a promise and run on the cooperative scheduler.
    pub is_async: bool,
    pub source_map: SourceMap,
}

/// A constant value stored in the constants pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    String(String),
    /// A compiled function prototype.
    Function(Arc<CompiledFunction>),
    Class(ClassDef),
}

impl Constant {
    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::Int(_) => "int",
            Constant::Float(_) => "float",
            Constant::String(_) => "string",
            Constant::Function(_) => "function",
            Constant::Class(_) => "class",
        }
    }
}

/// A whole compiled program: top-level code plus the shared constants pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub instructions: Instructions,
    pub constants: Vec<Constant>,
    pub source_map: SourceMap,
    /// Size of the globals array the VM must allocate.
    pub num_globals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_patch_jump() {
        let mut ins = Instructions::new();
        ins.emit(OpCode::True, &[]);
        let jump = ins.emit(OpCode::JumpIfFalse, &[9999]);
        ins.emit(OpCode::Null, &[]);
        ins.patch_jump(jump, ins.len());
        assert_eq!(ins.as_bytes()[2..4], [0, 5]);
    }

    #[test]
    #[should_panic]
    fn test_patch_non_jump_panics() {
        let mut ins = Instructions::new();
        let at = ins.emit(OpCode::Constant, &[0]);
        ins.patch_jump(at, 10);
    }

    #[test]
    fn test_source_map_lookup() {
        let mut map = SourceMap::new();
        map.record(0, Span::line(1));
        map.record(3, Span::line(1));
        map.record(5, Span::line(4));
        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup(0).line, 1);
        assert_eq!(map.lookup(4).line, 1);
        assert_eq!(map.lookup(5).line, 4);
        assert_eq!(map.lookup(100).line, 4);
        assert!(SourceMap::new().lookup(3).is_unknown());
    }
}
