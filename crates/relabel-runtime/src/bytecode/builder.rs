//! Code builder
//!
//! Emits wordcode the way a compiler front end would: interned constants
//! and names, automatic `ExtendedArg` prefixes for wide arguments, and
//! symbolic labels for structured control flow. It also emits the two
//! marker statements (`GOTO.name` / `LABEL.name`) as the plain
//! load/attribute/pop sequence the goto pass later rewrites.

use super::{
    BinaryOperator, CodeObject, Comparison, Constant, LineEntry, Opcode, INSTRUCTION_WIDTH,
};
use crate::goto::MarkerNames;
use thiserror::Error;

/// Builder errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("label {0} was never placed")]
    UnplacedLabel(usize),

    #[error("label {0} placed twice")]
    LabelPlacedTwice(usize),

    #[error("{opcode:?} at offset {at} cannot reach offset {target}")]
    WrongDirection {
        opcode: Opcode,
        at: usize,
        target: usize,
    },

    #[error("jump at offset {at} spans {distance} instructions (single-slot limit is 255)")]
    JumpTooFar { at: usize, distance: usize },
}

/// Symbolic jump target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    at: usize,
    opcode: Opcode,
    label: Label,
}

/// Incremental [`CodeObject`] builder
pub struct CodeBuilder {
    code: CodeObject,
    markers: MarkerNames,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    current_line: Option<u32>,
}

impl CodeBuilder {
    /// Create a builder for a function called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            code: CodeObject::new(name),
            markers: MarkerNames::default(),
            labels: Vec::new(),
            fixups: Vec::new(),
            current_line: None,
        }
    }

    /// Use non-default marker globals
    pub fn with_markers(mut self, markers: MarkerNames) -> Self {
        self.markers = markers;
        self
    }

    /// Current byte offset (where the next instruction lands)
    pub fn offset(&self) -> usize {
        self.code.instructions.len()
    }

    /// Declare a positional argument. Must precede any other local.
    pub fn arg(&mut self, name: &str) -> u32 {
        let index = self.local(name);
        self.code.arg_count = self.code.arg_count.max(index + 1);
        index
    }

    /// Intern a local variable name
    pub fn local(&mut self, name: &str) -> u32 {
        intern(&mut self.code.varnames, name)
    }

    /// Intern a name-table entry
    pub fn name(&mut self, name: &str) -> u32 {
        intern(&mut self.code.names, name)
    }

    /// Intern a constant
    pub fn constant(&mut self, value: impl Into<Constant>) -> u32 {
        let value = value.into();
        match self.code.constants.iter().position(|c| *c == value) {
            Some(index) => index as u32,
            None => {
                self.code.constants.push(value);
                (self.code.constants.len() - 1) as u32
            }
        }
    }

    /// Start attributing instructions to a source line
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        if self.current_line != Some(line) {
            self.code.line_table.push(LineEntry {
                offset: self.offset(),
                line,
            });
            self.current_line = Some(line);
        }
        self
    }

    /// Emit one instruction, prefixed by as many `ExtendedArg`s as `arg` needs
    pub fn emit(&mut self, opcode: Opcode, arg: u32) -> &mut Self {
        let stages: u32 = match arg {
            0..=0xFF => 0,
            0x100..=0xFFFF => 1,
            0x1_0000..=0xFF_FFFF => 2,
            _ => 3,
        };
        for stage in (1..=stages).rev() {
            self.push(Opcode::ExtendedArg, (arg >> (8 * stage)) as u8);
        }
        self.push(opcode, arg as u8);
        self
    }

    fn push(&mut self, opcode: Opcode, arg: u8) {
        self.code.instructions.push(opcode as u8);
        self.code.instructions.push(arg);
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(Opcode::Nop, 0);
        self
    }

    pub fn load_const(&mut self, value: impl Into<Constant>) -> &mut Self {
        let index = self.constant(value);
        self.emit(Opcode::LoadConst, index)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit(Opcode::LoadFast, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit(Opcode::StoreFast, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::LoadGlobal, index)
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::StoreGlobal, index)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::LoadAttr, index)
    }

    pub fn binary(&mut self, op: BinaryOperator) -> &mut Self {
        self.push(Opcode::BinaryOp, op as u8);
        self
    }

    pub fn compare(&mut self, cmp: Comparison) -> &mut Self {
        self.push(Opcode::CompareOp, cmp as u8);
        self
    }

    pub fn call(&mut self, arg_count: u8) -> &mut Self {
        self.push(Opcode::Call, arg_count);
        self
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.push(Opcode::PopTop, 0);
        self
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.push(Opcode::ReturnValue, 0);
        self
    }

    pub fn return_const(&mut self, value: impl Into<Constant>) -> &mut Self {
        let index = self.constant(value);
        self.emit(Opcode::ReturnConst, index)
    }

    /// `print(<constant>)` as an expression statement
    pub fn print_const(&mut self, value: impl Into<Constant>) -> &mut Self {
        self.load_global("print").load_const(value).call(1).pop_top()
    }

    /// `print(<local>)` as an expression statement
    pub fn print_local(&mut self, name: &str) -> &mut Self {
        self.load_global("print").load_fast(name).call(1).pop_top()
    }

    /// `local = local <op> constant`
    pub fn update_local(
        &mut self,
        name: &str,
        op: BinaryOperator,
        value: impl Into<Constant>,
    ) -> &mut Self {
        self.load_fast(name).load_const(value).binary(op).store_fast(name)
    }

    /// `GOTO.<label>` expression statement
    pub fn goto_marker(&mut self, label: &str) -> &mut Self {
        let marker = self.markers.jump.clone();
        self.marker_statement(&marker, label)
    }

    /// `LABEL.<label>` expression statement
    pub fn label_marker(&mut self, label: &str) -> &mut Self {
        let marker = self.markers.label.clone();
        self.marker_statement(&marker, label)
    }

    fn marker_statement(&mut self, marker: &str, label: &str) -> &mut Self {
        self.load_global(marker).load_attr(label).pop_top()
    }

    /// Allocate an unplaced label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset
    pub fn place(&mut self, label: Label) -> Result<&mut Self, BuildError> {
        let offset = self.offset();
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            return Err(BuildError::LabelPlacedTwice(label.0));
        }
        *slot = Some(offset);
        Ok(self)
    }

    pub fn jump_forward(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::JumpForward, label)
    }

    pub fn jump_backward(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::JumpBackward, label)
    }

    pub fn pop_jump_if_false(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::PopJumpIfFalse, label)
    }

    pub fn pop_jump_if_true(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::PopJumpIfTrue, label)
    }

    fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.fixups.push(Fixup {
            at: self.offset(),
            opcode,
            label,
        });
        self.push(opcode, 0);
        self
    }

    /// Resolve labels and produce the code object
    ///
    /// A function that does not end in a return gets an implicit
    /// `return None`, so a label placed last still has an instruction.
    pub fn finish(mut self) -> Result<CodeObject, BuildError> {
        let ends_in_return = self
            .code
            .instructions
            .chunks_exact(INSTRUCTION_WIDTH)
            .last()
            .map(|slot| {
                slot[0] == Opcode::ReturnValue as u8 || slot[0] == Opcode::ReturnConst as u8
            })
            .unwrap_or(false);
        if !ends_in_return || self.labels.iter().any(|l| *l == Some(self.offset())) {
            self.return_const(Constant::None);
        }

        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0]
                .ok_or(BuildError::UnplacedLabel(fixup.label.0))?;
            let next = fixup.at + INSTRUCTION_WIDTH;
            let backward = fixup.opcode == Opcode::JumpBackward;
            if backward != (target < next) && target != next {
                return Err(BuildError::WrongDirection {
                    opcode: fixup.opcode,
                    at: fixup.at,
                    target,
                });
            }
            let distance = target.abs_diff(next) / INSTRUCTION_WIDTH;
            if distance > u8::MAX as usize {
                return Err(BuildError::JumpTooFar {
                    at: fixup.at,
                    distance,
                });
            }
            self.code.instructions[fixup.at + 1] = distance as u8;
        }

        self.code.local_count = self.code.varnames.len() as u32;
        self.code.stack_size = estimate_stack_size(&self.code);
        Ok(self.code)
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|n| n == name) {
        Some(index) => index as u32,
        None => {
            table.push(name.to_string());
            (table.len() - 1) as u32
        }
    }
}

/// Straight-line upper bound on stack depth, ignoring control flow
fn estimate_stack_size(code: &CodeObject) -> u32 {
    let mut depth: i64 = 0;
    let mut max: i64 = 0;
    for slot in code.instructions.chunks_exact(INSTRUCTION_WIDTH) {
        let effect = match Opcode::try_from(slot[0]) {
            Ok(Opcode::LoadConst | Opcode::LoadFast | Opcode::LoadGlobal | Opcode::LoadName) => 1,
            Ok(
                Opcode::StoreFast
                | Opcode::StoreGlobal
                | Opcode::BinaryOp
                | Opcode::CompareOp
                | Opcode::PopJumpIfFalse
                | Opcode::PopJumpIfTrue
                | Opcode::PopTop
                | Opcode::ReturnValue,
            ) => -1,
            Ok(Opcode::Call) => -i64::from(slot[1]),
            _ => 0,
        };
        depth = (depth + effect).max(0);
        max = max.max(depth);
    }
    max as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ops(code: &CodeObject) -> Vec<(Opcode, u8)> {
        code.instructions
            .chunks_exact(INSTRUCTION_WIDTH)
            .map(|slot| (Opcode::try_from(slot[0]).unwrap(), slot[1]))
            .collect()
    }

    #[test]
    fn test_implicit_return_appended() {
        let mut b = CodeBuilder::new("f");
        b.print_const("A");
        let code = b.finish().unwrap();
        assert_eq!(
            ops(&code),
            vec![
                (Opcode::LoadGlobal, 0),
                (Opcode::LoadConst, 0),
                (Opcode::Call, 1),
                (Opcode::PopTop, 0),
                (Opcode::ReturnConst, 1),
            ]
        );
        assert_eq!(code.names, vec!["print".to_string()]);
        assert_eq!(code.constants, vec![Constant::from("A"), Constant::None]);
    }

    #[test]
    fn test_wide_argument_gets_prefixes() {
        let mut b = CodeBuilder::new("f");
        b.emit(Opcode::LoadConst, 0x01_02_03);
        b.return_value();
        let code = b.finish().unwrap();
        assert_eq!(
            ops(&code)[..3],
            [
                (Opcode::ExtendedArg, 0x01),
                (Opcode::ExtendedArg, 0x02),
                (Opcode::LoadConst, 0x03),
            ]
        );
    }

    #[test]
    fn test_marker_statements() {
        let mut b = CodeBuilder::new("f");
        b.goto_marker("end");
        b.label_marker("end");
        let code = b.finish().unwrap();
        assert_eq!(code.names, vec!["GOTO", "end", "LABEL"]);
        assert_eq!(
            ops(&code)[..6],
            [
                (Opcode::LoadGlobal, 0),
                (Opcode::LoadAttr, 1),
                (Opcode::PopTop, 0),
                (Opcode::LoadGlobal, 2),
                (Opcode::LoadAttr, 1),
                (Opcode::PopTop, 0),
            ]
        );
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let mut b = CodeBuilder::new("f");
        let top = b.new_label();
        let out = b.new_label();
        b.place(top).unwrap();
        b.load_const(true);
        b.pop_jump_if_false(out);
        b.jump_backward(top);
        b.place(out).unwrap();
        let code = b.finish().unwrap();

        // pop_jump at 2, next 4, out at 6 -> 1; jump_backward at 4, next 6, top at 0 -> 3
        assert_eq!(ops(&code)[1], (Opcode::PopJumpIfFalse, 1));
        assert_eq!(ops(&code)[2], (Opcode::JumpBackward, 3));
    }

    #[test]
    fn test_unplaced_label() {
        let mut b = CodeBuilder::new("f");
        let l = b.new_label();
        b.jump_forward(l);
        assert_eq!(b.finish().unwrap_err(), BuildError::UnplacedLabel(0));
    }

    #[test]
    fn test_jump_too_far() {
        let mut b = CodeBuilder::new("f");
        let l = b.new_label();
        b.jump_forward(l);
        for _ in 0..300 {
            b.nop();
        }
        b.place(l).unwrap();
        assert!(matches!(
            b.finish(),
            Err(BuildError::JumpTooFar { at: 0, distance: 300 })
        ));
    }

    #[test]
    fn test_line_table() {
        let mut b = CodeBuilder::new("f");
        b.set_line(3);
        b.nop();
        b.set_line(3);
        b.nop();
        b.set_line(4);
        b.nop();
        let code = b.finish().unwrap();
        assert_eq!(
            code.line_table,
            vec![
                LineEntry { offset: 0, line: 3 },
                LineEntry { offset: 4, line: 4 },
            ]
        );
    }

    #[test]
    fn test_locals_counted() {
        let mut b = CodeBuilder::new("f");
        b.arg("n");
        b.store_fast("k");
        let code = b.finish().unwrap();
        assert_eq!(code.arg_count, 1);
        assert_eq!(code.local_count, 2);
    }
}
