//! Relabel Runtime - goto/label patching for wordcode functions
//!
//! This library provides:
//! - The wordcode container, builder and disassembler
//! - The goto patch pipeline (scan, erase, relocate, rebuild)
//! - A small VM for running patched functions

/// Relabel runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bytecode;
pub mod goto;
pub mod value;
pub mod vm;

// Re-export commonly used types
pub use bytecode::{CodeBuilder, CodeObject, Constant, Opcode, OpcodeTable};
pub use goto::{patch, GotoPatcher, PatchError, PatchOptions, PatchResult, PatchStats};
pub use value::{RuntimeError, Value};
pub use vm::VM;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
