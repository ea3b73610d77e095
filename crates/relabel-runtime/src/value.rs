//! Runtime values and errors

use crate::bytecode::Constant;
use crate::goto::MarkerKind;
use std::fmt;
use thiserror::Error;

/// Functions the VM provides as globals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Writes its arguments, space separated, plus a newline
    Print,
    /// Converts one argument to its display string
    Str,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Str => "str",
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "print" => Some(Builtin::Print),
            "str" => Some(Builtin::Str),
            _ => None,
        }
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Builtin(Builtin),
    /// Sentinel bound to a marker name; accessing any attribute on it fails
    Marker(MarkerKind),
}

impl Value {
    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Builtin(_) => "builtin_function",
            Value::Marker(_) => "marker",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Builtin(_) | Value::Marker(_) => true,
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Marker(kind) => write!(f, "<{} marker>", kind),
        }
    }
}

/// Errors raised while executing a code object
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("name '{name}' is not defined")]
    UndefinedName { name: String, offset: usize },

    #[error("local variable '{name}' referenced before assignment")]
    UnboundLocal { name: String, offset: usize },

    #[error("{kind} index {index} out of range at offset {offset}")]
    BadIndex {
        kind: &'static str,
        index: usize,
        offset: usize,
    },

    #[error("type error: {msg}")]
    TypeError { msg: String, offset: usize },

    #[error("integer division or modulo by zero")]
    DivideByZero { offset: usize },

    #[error("integer overflow at offset {offset}")]
    Overflow { offset: usize },

    /// An unpatched marker statement ran
    #[error("{marker} marker `{label}` executed at offset {offset}; the function was not goto-patched")]
    MarkerEvaluated {
        marker: MarkerKind,
        label: String,
        offset: usize,
    },

    #[error("step limit of {limit} instructions exceeded")]
    StepLimitExceeded { limit: u64 },

    #[error("jump at offset {offset} leaves the instruction stream")]
    JumpOutOfBounds { offset: usize },

    #[error("{function}() takes {expected} arguments but {actual} were given")]
    WrongArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },
}
