//! Stream rebuilder: a copy of the code object around a new instruction stream

use super::{PatchError, PatchResult};
use crate::bytecode::CodeObject;

impl CodeObject {
    /// Same function with `instructions` replaced
    ///
    /// Every other field (constants, names, line and exception tables,
    /// flags) is carried over untouched. Offsets in those tables stay valid
    /// only because the stream keeps its length, so a length change is
    /// rejected.
    pub fn with_instructions(&self, instructions: Vec<u8>) -> PatchResult<CodeObject> {
        if instructions.len() != self.instructions.len() {
            return Err(PatchError::LengthMismatch {
                expected: self.instructions.len(),
                actual: instructions.len(),
            });
        }
        Ok(CodeObject {
            instructions,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Constant, LineEntry};
    use pretty_assertions::assert_eq;

    fn sample() -> CodeObject {
        let mut code = CodeObject::new("f");
        code.instructions = vec![0x01, 0, 0x61, 0];
        code.constants = vec![Constant::Int(7)];
        code.line_table = vec![LineEntry { offset: 0, line: 3 }];
        code.flags = 0x43;
        code
    }

    #[test]
    fn test_keeps_metadata() {
        let code = sample();
        let rebuilt = code.with_instructions(vec![0x00, 0, 0x61, 0]).unwrap();
        assert_eq!(rebuilt.instructions, vec![0x00, 0, 0x61, 0]);
        assert_eq!(
            CodeObject {
                instructions: code.instructions.clone(),
                ..rebuilt
            },
            code
        );
    }

    #[test]
    fn test_rejects_length_change() {
        let err = sample().with_instructions(vec![0x61, 0]).unwrap_err();
        assert_eq!(
            err,
            PatchError::LengthMismatch {
                expected: 4,
                actual: 2
            }
        );
    }
}
