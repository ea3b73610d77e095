//! Wordcode instruction set
//!
//! Every instruction is two bytes: opcode, then a one-byte argument.
//! Wider arguments are built from `ExtendedArg` prefixes.

/// Wordcode opcode
///
/// Explicit byte values keep serialized code objects stable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Special (0x00) =====
    /// Do nothing. Erased marker slots are `Nop 0`.
    Nop = 0x00,

    // ===== Constants (0x01-0x0F) =====
    /// Push constant [const index]
    LoadConst = 0x01,

    // ===== Variables (0x10-0x1F) =====
    /// Push local [local index]
    LoadFast = 0x10,
    /// Pop into local [local index]
    StoreFast = 0x11,
    /// Push global or builtin [name index]
    LoadGlobal = 0x12,
    /// Pop into global [name index]
    StoreGlobal = 0x13,
    /// Push local-or-global by name [name index]
    LoadName = 0x14,
    /// Replace TOS with TOS.attr [name index]
    LoadAttr = 0x15,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Pop b, pop a, push a <op> b [BinaryOperator]
    BinaryOp = 0x20,

    // ===== Comparison (0x30-0x3F) =====
    /// Pop b, pop a, push a <cmp> b [Comparison]
    CompareOp = 0x30,

    // ===== Control flow (0x50-0x5F) =====
    /// Jump forward [instruction count from next]
    JumpForward = 0x50,
    /// Jump backward [instruction count from next]
    JumpBackward = 0x51,
    /// Pop condition, jump forward if false
    PopJumpIfFalse = 0x52,
    /// Pop condition, jump forward if true
    PopJumpIfTrue = 0x53,

    // ===== Functions (0x60-0x6F) =====
    /// Call callable under n arguments [arg count]
    Call = 0x60,
    /// Return TOS
    ReturnValue = 0x61,
    /// Return constant [const index]
    ReturnConst = 0x62,

    // ===== Stack manipulation (0x80-0x8F) =====
    /// Pop and discard top of stack
    PopTop = 0x80,

    // ===== Prefix (0xF0) =====
    /// Supply 8 high-order bits to the next instruction's argument
    ExtendedArg = 0xF0,
}

impl Opcode {
    /// Upper-case mnemonic used by the disassembler
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadFast => "LOAD_FAST",
            Opcode::StoreFast => "STORE_FAST",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::LoadName => "LOAD_NAME",
            Opcode::LoadAttr => "LOAD_ATTR",
            Opcode::BinaryOp => "BINARY_OP",
            Opcode::CompareOp => "COMPARE_OP",
            Opcode::JumpForward => "JUMP_FORWARD",
            Opcode::JumpBackward => "JUMP_BACKWARD",
            Opcode::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Opcode::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Opcode::Call => "CALL",
            Opcode::ReturnValue => "RETURN_VALUE",
            Opcode::ReturnConst => "RETURN_CONST",
            Opcode::PopTop => "POP_TOP",
            Opcode::ExtendedArg => "EXTENDED_ARG",
        }
    }

    /// Whether the argument indexes the names table
    pub fn uses_name(self) -> bool {
        matches!(
            self,
            Opcode::LoadGlobal | Opcode::StoreGlobal | Opcode::LoadName | Opcode::LoadAttr
        )
    }

    /// Whether the argument is a relative jump distance
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::JumpForward
                | Opcode::JumpBackward
                | Opcode::PopJumpIfFalse
                | Opcode::PopJumpIfTrue
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(Opcode::Nop),
            0x01 => Ok(Opcode::LoadConst),
            0x10 => Ok(Opcode::LoadFast),
            0x11 => Ok(Opcode::StoreFast),
            0x12 => Ok(Opcode::LoadGlobal),
            0x13 => Ok(Opcode::StoreGlobal),
            0x14 => Ok(Opcode::LoadName),
            0x15 => Ok(Opcode::LoadAttr),
            0x20 => Ok(Opcode::BinaryOp),
            0x30 => Ok(Opcode::CompareOp),
            0x50 => Ok(Opcode::JumpForward),
            0x51 => Ok(Opcode::JumpBackward),
            0x52 => Ok(Opcode::PopJumpIfFalse),
            0x53 => Ok(Opcode::PopJumpIfTrue),
            0x60 => Ok(Opcode::Call),
            0x61 => Ok(Opcode::ReturnValue),
            0x62 => Ok(Opcode::ReturnConst),
            0x80 => Ok(Opcode::PopTop),
            0xF0 => Ok(Opcode::ExtendedArg),
            _ => Err(()),
        }
    }
}

/// `BinaryOp` argument
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add = 0,
    Sub = 1,
    Mul = 2,
    FloorDiv = 3,
    Mod = 4,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::FloorDiv => "//",
            BinaryOperator::Mod => "%",
        }
    }
}

impl TryFrom<u32> for BinaryOperator {
    type Error = ();

    fn try_from(arg: u32) -> Result<Self, Self::Error> {
        match arg {
            0 => Ok(BinaryOperator::Add),
            1 => Ok(BinaryOperator::Sub),
            2 => Ok(BinaryOperator::Mul),
            3 => Ok(BinaryOperator::FloorDiv),
            4 => Ok(BinaryOperator::Mod),
            _ => Err(()),
        }
    }
}

/// `CompareOp` argument
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less = 0,
    LessEqual = 1,
    Equal = 2,
    NotEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
        }
    }
}

impl TryFrom<u32> for Comparison {
    type Error = ();

    fn try_from(arg: u32) -> Result<Self, Self::Error> {
        match arg {
            0 => Ok(Comparison::Less),
            1 => Ok(Comparison::LessEqual),
            2 => Ok(Comparison::Equal),
            3 => Ok(Comparison::NotEqual),
            4 => Ok(Comparison::Greater),
            5 => Ok(Comparison::GreaterEqual),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 19] = [
        Opcode::Nop,
        Opcode::LoadConst,
        Opcode::LoadFast,
        Opcode::StoreFast,
        Opcode::LoadGlobal,
        Opcode::StoreGlobal,
        Opcode::LoadName,
        Opcode::LoadAttr,
        Opcode::BinaryOp,
        Opcode::CompareOp,
        Opcode::JumpForward,
        Opcode::JumpBackward,
        Opcode::PopJumpIfFalse,
        Opcode::PopJumpIfTrue,
        Opcode::Call,
        Opcode::ReturnValue,
        Opcode::ReturnConst,
        Opcode::PopTop,
        Opcode::ExtendedArg,
    ];

    #[test]
    fn test_every_opcode_decodes_to_itself() {
        for op in ALL {
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }
    }

    #[test]
    fn test_unknown_byte_rejected() {
        assert!(Opcode::try_from(0xEE).is_err());
    }

    #[test]
    fn test_nop_is_zero() {
        assert_eq!(Opcode::Nop as u8, 0);
    }

    #[test]
    fn test_name_and_jump_classes_disjoint() {
        for op in ALL {
            assert!(!(op.uses_name() && op.is_jump()), "{:?}", op);
        }
    }
}
