//! Instruction set for the Brook VM.
//!
//! Every instruction is one opcode byte followed by zero or more fixed-width
//! big-endian operands. The widths depend only on the opcode.

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ============ Constants & Stack ============
    /// Push a constant: CONSTANT <index:u16>
    Constant = 0,
    /// Push null
    Null,
    /// Push true
    True,
    /// Push false
    False,
    /// Pop the top value
    Pop,
    /// Duplicate the top value
    Dup,

    // ============ Arithmetic & Logic ============
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Not,

    // ============ Comparison ============
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // ============ Control Flow ============
    /// Unconditional jump: JUMP <target:u16>
    Jump,
    /// Pop and jump if falsy: JUMP_IF_FALSE <target:u16>
    JumpIfFalse,
    /// Jump if falsy, keep the value (for &&): JUMP_IF_FALSE_NO_POP <target:u16>
    JumpIfFalseNoPop,
    /// Jump if truthy, keep the value (for ||): JUMP_IF_TRUE_NO_POP <target:u16>
    JumpIfTrueNoPop,

    // ============ Variables ============
    /// GET_GLOBAL <slot:u16>
    GetGlobal,
    /// Pop into a global: SET_GLOBAL <slot:u16>
    SetGlobal,
    /// GET_LOCAL <slot:u8>
    GetLocal,
    /// Pop into a local: SET_LOCAL <slot:u8>
    SetLocal,
    /// Push a captured value of the running closure: GET_FREE <index:u8>
    GetFree,
    /// GET_BUILTIN <index:u8>
    GetBuiltin,
    /// Push the running closure (self-reference for recursion)
    CurrentClosure,

    // ============ Collections & Fields ============
    /// BUILD_ARRAY <count:u16>
    BuildArray,
    /// BUILD_HASH <pair_count:u16>
    BuildHash,
    /// obj[index]
    Index,
    /// obj[index] = value, leaves value
    SetIndex,
    /// GET_FIELD <name:u16>
    GetField,
    /// SET_FIELD <name:u16>, leaves value
    SetField,

    // ============ Functions ============
    /// CALL <arg_count:u8>
    Call,
    /// Return the top of stack to the caller
    Return,
    /// CLOSURE <function:u16> <free_count:u8>
    Closure,

    // ============ Exceptions ============
    /// Push a handler: TRY_ENTER <catch_target:u16>
    TryEnter,
    /// Pop the innermost handler
    TryExit,
    /// Throw the top of stack
    Throw,

    // ============ Concurrency ============
    /// Run a call on a new task, push its result channel: SPAWN <arg_count:u8>
    Spawn,
    /// Wait for a channel or promise
    Await,

    // ============ Modules ============
    /// Load a module's exports as a map: IMPORT <path:u16>
    Import,

    // ============ Iteration ============
    /// Turn an iterable into an array snapshot (map → keys, string → chars)
    IterPrepare,
    /// Replace an array with its length
    Length,
}

/// Every opcode, indexed by its byte value.
const OPCODES: [OpCode; 47] = [
    OpCode::Constant,
    OpCode::Null,
    OpCode::True,
    OpCode::False,
    OpCode::Pop,
    OpCode::Dup,
    OpCode::Add,
    OpCode::Subtract,
    OpCode::Multiply,
    OpCode::Divide,
    OpCode::Modulo,
    OpCode::Negate,
    OpCode::Not,
    OpCode::Equal,
    OpCode::NotEqual,
    OpCode::Less,
    OpCode::LessEqual,
    OpCode::Greater,
    OpCode::GreaterEqual,
    OpCode::Jump,
    OpCode::JumpIfFalse,
    OpCode::JumpIfFalseNoPop,
    OpCode::JumpIfTrueNoPop,
    OpCode::GetGlobal,
    OpCode::SetGlobal,
    OpCode::GetLocal,
    OpCode::SetLocal,
    OpCode::GetFree,
    OpCode::GetBuiltin,
    OpCode::CurrentClosure,
    OpCode::BuildArray,
    OpCode::BuildHash,
    OpCode::Index,
    OpCode::SetIndex,
    OpCode::GetField,
    OpCode::SetField,
    OpCode::Call,
    OpCode::Return,
    OpCode::Closure,
    OpCode::TryEnter,
    OpCode::TryExit,
    OpCode::Throw,
    OpCode::Spawn,
    OpCode::Await,
    OpCode::Import,
    OpCode::IterPrepare,
    OpCode::Length,
];

impl OpCode {
    /// Operand widths in bytes, in encoding order.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            OpCode::Constant
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::JumpIfFalseNoPop
            | OpCode::JumpIfTrueNoPop
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::BuildArray
            | OpCode::BuildHash
            | OpCode::GetField
            | OpCode::SetField
            | OpCode::TryEnter
            | OpCode::Import => &[2],

            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetFree
            | OpCode::GetBuiltin
            | OpCode::Call
            | OpCode::Spawn => &[1],

            OpCode::Closure => &[2, 1],

            _ => &[],
        }
    }

    /// Total encoded size including the opcode byte.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        OPCODES.get(byte as usize).copied()
    }

    /// Mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::Null => "NULL",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Modulo => "MODULO",
            OpCode::Negate => "NEGATE",
            OpCode::Not => "NOT",
            OpCode::Equal => "EQUAL",
            OpCode::NotEqual => "NOT_EQUAL",
            OpCode::Less => "LESS",
            OpCode::LessEqual => "LESS_EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::GreaterEqual => "GREATER_EQUAL",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::JumpIfFalseNoPop => "JUMP_FALSE_NP",
            OpCode::JumpIfTrueNoPop => "JUMP_TRUE_NP",
            OpCode::GetGlobal => "GET_GLOBAL",
            OpCode::SetGlobal => "SET_GLOBAL",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::GetFree => "GET_FREE",
            OpCode::GetBuiltin => "GET_BUILTIN",
            OpCode::CurrentClosure => "CURRENT_CLOSURE",
            OpCode::BuildArray => "BUILD_ARRAY",
            OpCode::BuildHash => "BUILD_HASH",
            OpCode::Index => "INDEX",
            OpCode::SetIndex => "SET_INDEX",
            OpCode::GetField => "GET_FIELD",
            OpCode::SetField => "SET_FIELD",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::Closure => "CLOSURE",
            OpCode::TryEnter => "TRY_ENTER",
            OpCode::TryExit => "TRY_EXIT",
            OpCode::Throw => "THROW",
            OpCode::Spawn => "SPAWN",
            OpCode::Await => "AWAIT",
            OpCode::Import => "IMPORT",
            OpCode::IterPrepare => "ITER_PREPARE",
            OpCode::Length => "LENGTH",
        }
    }

    /// Whether the first operand is an absolute jump target.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::JumpIfFalse
                | OpCode::JumpIfFalseNoPop
                | OpCode::JumpIfTrueNoPop
                | OpCode::TryEnter
        )
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

/// Encode one instruction. Operands wider than their slot are truncated,
/// so callers check limits first.
pub fn make(op: OpCode, operands: &[usize]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(op.width());
    bytes.push(op as u8);
    for (operand, width) in operands.iter().zip(op.operand_widths()) {
        match width {
            2 => bytes.extend_from_slice(&(*operand as u16).to_be_bytes()),
            _ => bytes.push(*operand as u8),
        }
    }
    bytes
}

/// Decode the operands of `op` from `bytes` (which start right after the
/// opcode byte). Returns the operands and the number of bytes consumed.
pub fn read_operands(op: OpCode, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut operands = Vec::with_capacity(op.operand_widths().len());
    let mut offset = 0;
    for width in op.operand_widths() {
        match width {
            2 => operands.push(read_u16(bytes, offset) as usize),
            _ => operands.push(bytes[offset] as usize),
        }
        offset += width;
    }
    (operands, offset)
}

/// Read a big-endian u16 at `offset`.
#[inline]
pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for i in 0..=OpCode::Length as u8 {
            let op = OpCode::from_u8(i).expect("valid opcode");
            assert_eq!(i, op as u8);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(OpCode::from_u8(OpCode::Length as u8 + 1).is_none());
        assert!(OpCode::from_u8(255).is_none());
    }

    #[test]
    fn test_make_is_big_endian() {
        assert_eq!(make(OpCode::Constant, &[65534]), vec![0, 0xFF, 0xFE]);
        assert_eq!(make(OpCode::GetLocal, &[255]), vec![OpCode::GetLocal as u8, 255]);
        assert_eq!(
            make(OpCode::Closure, &[65535, 3]),
            vec![OpCode::Closure as u8, 0xFF, 0xFF, 3]
        );
        assert_eq!(make(OpCode::Add, &[]), vec![OpCode::Add as u8]);
    }

    #[test]
    fn test_read_operands() {
        let bytes = make(OpCode::Closure, &[258, 7]);
        let (operands, read) = read_operands(OpCode::Closure, &bytes[1..]);
        assert_eq!(operands, vec![258, 7]);
        assert_eq!(read, 3);
        assert_eq!(OpCode::Closure.width(), 4);
    }
}
