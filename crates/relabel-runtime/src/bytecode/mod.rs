//! Wordcode container
//!
//! A [`CodeObject`] is the callable representation of one compiled
//! function: the instruction stream plus the metadata the VM needs to run
//! it. Instructions are encoded as fixed-width pairs:
//! - Opcode (1 byte)
//! - Argument (1 byte, widened by `ExtendedArg` prefixes)

mod builder;
mod disasm;
mod encoding;
mod opcode;

pub use builder::{BuildError, CodeBuilder, Label};
pub use disasm::{disassemble, listing};
pub use encoding::{OpcodeTable, MAX_EXTENSION_STAGES, OPERAND_BITS};
pub use opcode::{BinaryOperator, Comparison, Opcode};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per instruction
pub const INSTRUCTION_WIDTH: usize = 2;

/// Constant pool entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => write!(f, "None"),
            Constant::Bool(true) => write!(f, "True"),
            Constant::Bool(false) => write!(f, "False"),
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Constant::Bool(value)
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Int(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::Str(value.to_string())
    }
}

/// Line table entry: instructions from `offset` onward belong to `line`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub offset: usize,
    pub line: u32,
}

/// Exception table entry: `[start, end)` is handled at `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    pub depth: u32,
}

/// Compiled function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    pub qualname: String,
    pub filename: String,
    pub first_line: u32,
    pub arg_count: u32,
    pub posonly_arg_count: u32,
    pub kwonly_arg_count: u32,
    /// Number of local slots (arguments first)
    pub local_count: u32,
    pub stack_size: u32,
    pub flags: u32,
    /// Raw instruction bytes
    pub instructions: Vec<u8>,
    /// Constant pool (LoadConst / ReturnConst index into this)
    pub constants: Vec<Constant>,
    /// Name table (global, attribute and name loads index into this)
    pub names: Vec<String>,
    /// Local variable names
    pub varnames: Vec<String>,
    #[serde(default)]
    pub freevars: Vec<String>,
    #[serde(default)]
    pub cellvars: Vec<String>,
    #[serde(default)]
    pub line_table: Vec<LineEntry>,
    #[serde(default)]
    pub exception_table: Vec<ExceptionEntry>,
}

impl CodeObject {
    /// Create an empty code object
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            qualname: name.clone(),
            name,
            filename: "<relabel>".to_string(),
            first_line: 1,
            arg_count: 0,
            posonly_arg_count: 0,
            kwonly_arg_count: 0,
            local_count: 0,
            stack_size: 0,
            flags: 0,
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            line_table: Vec::new(),
            exception_table: Vec::new(),
        }
    }

    /// Number of instruction slots in the stream
    pub fn instruction_count(&self) -> usize {
        self.instructions.len() / INSTRUCTION_WIDTH
    }

    /// Source line for an instruction offset, if the line table covers it
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        self.line_table
            .iter()
            .take_while(|entry| entry.offset <= offset)
            .last()
            .map(|entry| entry.line)
    }

    /// Serialize to JSON (the on-disk format)
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
