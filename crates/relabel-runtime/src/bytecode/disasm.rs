//! Code object disassembler
//!
//! Human-readable listing used by `relabel disasm`, debug logs and test
//! failures.

use super::{BinaryOperator, CodeObject, Comparison, Opcode, INSTRUCTION_WIDTH, OPERAND_BITS};
use std::fmt;

/// Disassemble a code object
///
/// # Format
/// ```text
/// === Constants ===
/// 0: None
/// 1: "A"
///
/// === Names ===
/// 0: print
///
/// === Instructions ===
///    1  0000  LOAD_GLOBAL         0 (print)
///       0002  LOAD_CONST          1 ("A")
///       0008  JUMP_FORWARD        9 (-> 0028)
/// ```
///
/// `EXTENDED_ARG` slots are listed as they are; the instruction after them
/// shows the folded argument.
pub fn disassemble(code: &CodeObject) -> String {
    listing(code).to_string()
}

/// The same listing, formatted only when displayed
pub fn listing(code: &CodeObject) -> impl fmt::Display + '_ {
    Listing(code)
}

struct Listing<'a>(&'a CodeObject);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;

        if !code.constants.is_empty() {
            writeln!(f, "=== Constants ===")?;
            for (idx, constant) in code.constants.iter().enumerate() {
                writeln!(f, "{}: {}", idx, constant)?;
            }
            writeln!(f)?;
        }

        if !code.names.is_empty() {
            writeln!(f, "=== Names ===")?;
            for (idx, name) in code.names.iter().enumerate() {
                writeln!(f, "{}: {}", idx, name)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "=== Instructions ===")?;
        let mut extended: u32 = 0;
        let mut last_line = None;
        for (index, slot) in code.instructions.chunks(INSTRUCTION_WIDTH).enumerate() {
            let offset = index * INSTRUCTION_WIDTH;
            let line = code.line_for_offset(offset);
            if line != last_line {
                match line {
                    Some(line) => write!(f, "{:>4}  ", line)?,
                    None => write!(f, "      ")?,
                }
                last_line = line;
            } else {
                write!(f, "      ")?;
            }

            let [byte, low] = match *slot {
                [byte, low] => [byte, low],
                _ => {
                    writeln!(f, "{:04}  <truncated instruction>", offset)?;
                    break;
                }
            };
            let arg = (extended << OPERAND_BITS) | u32::from(low);

            let opcode = match Opcode::try_from(byte) {
                Ok(op) => op,
                Err(_) => {
                    writeln!(f, "{:04}  <invalid opcode: {:#04x}>", offset, byte)?;
                    extended = 0;
                    continue;
                }
            };

            write!(f, "{:04}  {:<18}", offset, opcode.mnemonic())?;
            match opcode {
                Opcode::ExtendedArg => {
                    writeln!(f, "{:>3}", low)?;
                    extended = arg;
                    continue;
                }
                Opcode::Nop | Opcode::PopTop | Opcode::ReturnValue => writeln!(f)?,
                _ => writeln!(f, "{:>3}{}", arg, annotation(code, opcode, offset, arg))?,
            }
            extended = 0;
        }
        Ok(())
    }
}

/// Parenthesized meaning of an argument, or nothing
fn annotation(code: &CodeObject, opcode: Opcode, offset: usize, arg: u32) -> String {
    let index = arg as usize;
    match opcode {
        Opcode::LoadConst | Opcode::ReturnConst => code
            .constants
            .get(index)
            .map(|constant| format!(" ({})", constant))
            .unwrap_or_else(|| " (<bad constant>)".to_string()),
        Opcode::LoadFast | Opcode::StoreFast => code
            .varnames
            .get(index)
            .map(|name| format!(" ({})", name))
            .unwrap_or_default(),
        op if op.uses_name() => code
            .names
            .get(index)
            .map(|name| format!(" ({})", name))
            .unwrap_or_else(|| " (<bad name>)".to_string()),
        op if op.is_jump() => {
            let next = offset + INSTRUCTION_WIDTH;
            let span = index * INSTRUCTION_WIDTH;
            let target = if op == Opcode::JumpBackward {
                next.checked_sub(span)
            } else {
                Some(next + span)
            };
            match target {
                Some(target) => format!(" (-> {:04})", target),
                None => " (-> <before start>)".to_string(),
            }
        }
        Opcode::BinaryOp => BinaryOperator::try_from(arg)
            .map(|op| format!(" ({})", op.symbol()))
            .unwrap_or_default(),
        Opcode::CompareOp => Comparison::try_from(arg)
            .map(|cmp| format!(" ({})", cmp.symbol()))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeBuilder;

    #[test]
    fn test_listing_matches_disassemble() {
        let mut b = CodeBuilder::new("f");
        b.print_const("A");
        let code = b.finish().unwrap();
        assert_eq!(format!("{}", listing(&code)), disassemble(&code));
    }

    #[test]
    fn test_disassemble_empty() {
        let output = disassemble(&CodeObject::new("empty"));
        assert!(output.contains("=== Instructions ==="));
        assert!(!output.contains("=== Constants ==="));
    }

    #[test]
    fn test_disassemble_names_and_constants() {
        let mut b = CodeBuilder::new("f");
        b.print_const("hi");
        let output = disassemble(&b.finish().unwrap());
        assert!(output.contains("=== Constants ==="));
        assert!(output.contains("\"hi\""));
        assert!(output.contains("LOAD_GLOBAL"));
        assert!(output.contains("(print)"));
        assert!(output.contains("RETURN_CONST"));
    }

    #[test]
    fn test_disassemble_jump_target() {
        let mut code = CodeObject::new("j");
        code.instructions = vec![
            Opcode::JumpForward as u8,
            1,
            Opcode::Nop as u8,
            0,
            Opcode::JumpBackward as u8,
            3,
        ];
        let output = disassemble(&code);
        assert!(output.contains("0000  JUMP_FORWARD        1 (-> 0004)"), "{}", output);
        assert!(output.contains("0004  JUMP_BACKWARD       3 (-> 0000)"), "{}", output);
    }

    #[test]
    fn test_disassemble_folds_extended_arg() {
        let mut code = CodeObject::new("wide");
        code.instructions = vec![
            Opcode::ExtendedArg as u8,
            1,
            Opcode::JumpForward as u8,
            2,
        ];
        let output = disassemble(&code);
        assert!(output.contains("EXTENDED_ARG"));
        // 0x0102 = 258 instructions past 0004
        assert!(output.contains("258 (-> 0520)"), "{}", output);
    }

    #[test]
    fn test_disassemble_invalid_opcode() {
        let mut code = CodeObject::new("bad");
        code.instructions = vec![0xEE, 0];
        assert!(disassemble(&code).contains("<invalid opcode: 0xee>"));
    }
}
