//! Bytecode disassembler for debug output.

use super::chunk::{CompiledUnit, Constant, Instructions, SourceMap};
use super::opcode::{read_operands, OpCode};

/// Disassemble a compiled unit, then every function in its constants pool.
pub fn disassemble(unit: &CompiledUnit) -> String {
    let mut out = format!(
        "== <main> (globals={}, constants={}) ==\n",
        unit.num_globals,
        unit.constants.len()
    );
    disassemble_instructions(&unit.instructions, &unit.source_map, &unit.constants, &mut out);

    for constant in &unit.constants {
        if let Constant::Function(function) = constant {
            out.push_str(&format!(
                "\n== {} (params={}, locals={}{}) ==\n",
                function.name,
                function.num_params,
                function.num_locals,
                if function.is_async { ", async" } else { "" }
            ));
            disassemble_instructions(
                &function.instructions,
                &function.source_map,
                &unit.constants,
                &mut out,
            );
        }
    }
    out
}

/// One line per instruction: offset, source line, mnemonic, operands.
pub fn disassemble_instructions(
    instructions: &Instructions,
    source_map: &SourceMap,
    constants: &[Constant],
    out: &mut String,
) {
    let bytes = instructions.as_bytes();
    let mut offset = 0;
    let mut last_line = None;
    while offset < bytes.len() {
        let line = source_map.lookup(offset).line;
        let line_str = if last_line == Some(line) {
            "   |".to_string()
        } else {
            format!("{:4}", line)
        };
        last_line = Some(line);
        out.push_str(&format!("{:04} {} ", offset, line_str));

        let op = match OpCode::from_u8(bytes[offset]) {
            Some(op) => op,
            None => {
                out.push_str(&format!("<bad opcode {}>\n", bytes[offset]));
                offset += 1;
                continue;
            }
        };
        if offset + op.width() > bytes.len() {
            out.push_str(&format!("{} <truncated>\n", op.name()));
            break;
        }
        let (operands, read) = read_operands(op, &bytes[offset + 1..]);
        out.push_str(&format_instruction(op, &operands, constants));
        out.push('\n');
        offset += 1 + read;
    }
}

fn format_instruction(op: OpCode, operands: &[usize], constants: &[Constant]) -> String {
    match (op, operands) {
        (OpCode::Constant, [idx]) => format!(
            "{:<16} {:>5} ({})",
            op.name(),
            idx,
            format_constant(constants.get(*idx))
        ),
        (OpCode::GetField | OpCode::SetField | OpCode::Import, [idx]) => format!(
            "{:<16} {:>5} ({})",
            op.name(),
            idx,
            format_constant(constants.get(*idx))
        ),
        (OpCode::Closure, [idx, free]) => format!(
            "{:<16} {:>5} ({}) free={}",
            op.name(),
            idx,
            format_constant(constants.get(*idx)),
            free
        ),
        (_, [operand]) if op.is_jump() => format!("{:<16} -> {:04}", op.name(), operand),
        (_, [operand]) => format!("{:<16} {:>5}", op.name(), operand),
        _ => op.name().to_string(),
    }
}

fn format_constant(val: Option<&Constant>) -> String {
    match val {
        Some(Constant::Int(n)) => format!("{}", n),
        Some(Constant::Float(n)) => format!("{:?}", n),
        Some(Constant::String(s)) => format!("{:?}", s),
        Some(Constant::Function(f)) => format!("<fn {}>", f.name),
        Some(Constant::Class(class)) => format!("<struct {}>", class.name),
        None => "???".to_string(),
    }
}
