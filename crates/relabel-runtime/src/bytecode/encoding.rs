//! Opcode lookup table for the goto pipeline
//!
//! The trace decoder, marker scanner, eraser and relocation patcher only
//! ever see raw opcode bytes through an [`OpcodeTable`]. Swapping the table
//! retargets the whole pipeline to another fixed-width encoding.

use super::{Opcode, INSTRUCTION_WIDTH};

pub use relabel_config::settings::MAX_EXTENSION_STAGES;

/// Bits contributed by each operand byte
pub const OPERAND_BITS: u32 = 8;

/// Raw opcode bytes the pipeline depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeTable {
    /// Bytes per instruction (opcode + operand)
    pub width: usize,
    pub nop: u8,
    pub extended_arg: u8,
    pub jump_forward: u8,
    pub jump_backward: u8,
    pub load_global: u8,
    pub load_attr: u8,
    pub load_name: u8,
    pub pop_top: u8,
}

impl OpcodeTable {
    /// Table for the wordcode instruction set in [`Opcode`]
    pub const fn wordcode() -> Self {
        Self {
            width: INSTRUCTION_WIDTH,
            nop: Opcode::Nop as u8,
            extended_arg: Opcode::ExtendedArg as u8,
            jump_forward: Opcode::JumpForward as u8,
            jump_backward: Opcode::JumpBackward as u8,
            load_global: Opcode::LoadGlobal as u8,
            load_attr: Opcode::LoadAttr as u8,
            load_name: Opcode::LoadName as u8,
            pop_top: Opcode::PopTop as u8,
        }
    }

    /// Whether `opcode` carries a label symbol after a marker load
    pub fn is_symbol_load(&self, opcode: u8) -> bool {
        opcode == self.load_attr || opcode == self.load_name
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::wordcode()
    }
}
