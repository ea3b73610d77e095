//! Stack-based virtual machine
//!
//! Executes one [`CodeObject`] with a value stack and a flat local slot
//! array. Enough of the instruction set to run goto-patched functions:
//! - Integer arithmetic and comparisons
//! - Globals resolve to builtins (`print`, `str`) and the marker sentinels
//! - Relative jumps with `ExtendedArg`-widened operands
//!
//! Every run has an instruction budget, so a jump cycle that never exits
//! ends with [`RuntimeError::StepLimitExceeded`] instead of hanging.

use crate::bytecode::{BinaryOperator, CodeObject, Comparison, Opcode, INSTRUCTION_WIDTH, OPERAND_BITS};
use crate::goto::MarkerNames;
use crate::value::{Builtin, RuntimeError, Value};
use relabel_config::settings::DEFAULT_MAX_STEPS;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Virtual machine state
pub struct VM<'a> {
    code: &'a CodeObject,
    /// Value stack
    stack: Vec<Value>,
    /// Local slots, `None` until first store
    locals: Vec<Option<Value>>,
    /// Globals set by the host or by `STORE_GLOBAL`
    globals: HashMap<String, Value>,
    markers: MarkerNames,
    /// Everything `print` wrote
    output: String,
    max_steps: u64,
    steps: u64,
}

impl<'a> VM<'a> {
    pub fn new(code: &'a CodeObject) -> Self {
        Self {
            code,
            stack: Vec::with_capacity(code.stack_size as usize),
            locals: Vec::new(),
            globals: HashMap::new(),
            markers: MarkerNames::default(),
            output: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
            steps: 0,
        }
    }

    /// Instruction budget for each run
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Marker globals to recognize
    pub fn with_markers(mut self, markers: MarkerNames) -> Self {
        self.markers = markers;
        self
    }

    /// Bind a global variable
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Current value of a global, if bound
    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Text written by `print` so far
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Instructions executed by the last run
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call the code object with positional `args`
    pub fn run(&mut self, args: &[Value]) -> Result<Value, RuntimeError> {
        let expected = self.code.arg_count as usize;
        if args.len() != expected {
            return Err(RuntimeError::WrongArgumentCount {
                function: self.code.name.clone(),
                expected,
                actual: args.len(),
            });
        }

        let slots = (self.code.local_count as usize)
            .max(self.code.varnames.len())
            .max(expected);
        self.locals = vec![None; slots];
        for (slot, arg) in self.locals.iter_mut().zip(args) {
            *slot = Some(arg.clone());
        }
        self.stack.clear();
        self.steps = 0;

        self.execute()
    }

    fn execute(&mut self) -> Result<Value, RuntimeError> {
        let code: &'a CodeObject = self.code;
        let instructions = &code.instructions;
        let mut ip = 0;
        let mut extended: u32 = 0;

        while ip + INSTRUCTION_WIDTH <= instructions.len() {
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(RuntimeError::StepLimitExceeded {
                    limit: self.max_steps,
                });
            }

            let offset = ip;
            let byte = instructions[ip];
            let arg = (extended << OPERAND_BITS) | u32::from(instructions[ip + 1]);
            extended = 0;
            ip += INSTRUCTION_WIDTH;

            let opcode = Opcode::try_from(byte)
                .map_err(|_| RuntimeError::UnknownOpcode { opcode: byte, offset })?;
            let index = arg as usize;

            match opcode {
                Opcode::Nop => {}
                Opcode::ExtendedArg => extended = arg,

                Opcode::LoadConst => {
                    let value = self.constant(index, offset)?;
                    self.stack.push(value);
                }
                Opcode::LoadFast => {
                    let value = match self.locals.get(index) {
                        Some(Some(value)) => value.clone(),
                        Some(None) => {
                            return Err(RuntimeError::UnboundLocal {
                                name: self.varname(index),
                                offset,
                            })
                        }
                        None => return Err(bad_index("local", index, offset)),
                    };
                    self.stack.push(value);
                }
                Opcode::StoreFast => {
                    let value = self.pop(offset)?;
                    let slot = self
                        .locals
                        .get_mut(index)
                        .ok_or_else(|| bad_index("local", index, offset))?;
                    *slot = Some(value);
                }
                Opcode::LoadGlobal => {
                    let name = self.name(index, offset)?;
                    let value = self.lookup_global(name, offset)?;
                    self.stack.push(value);
                }
                Opcode::LoadName => {
                    let name = self.name(index, offset)?;
                    let local = self
                        .code
                        .varnames
                        .iter()
                        .position(|var| var == name)
                        .and_then(|slot| self.locals.get(slot).cloned().flatten());
                    let value = match local {
                        Some(value) => value,
                        None => self.lookup_global(name, offset)?,
                    };
                    self.stack.push(value);
                }
                Opcode::StoreGlobal => {
                    let name = self.name(index, offset)?.to_string();
                    let value = self.pop(offset)?;
                    self.globals.insert(name, value);
                }
                Opcode::LoadAttr => {
                    let attribute = self.name(index, offset)?.to_string();
                    let owner = self.pop(offset)?;
                    return Err(match owner {
                        Value::Marker(marker) => RuntimeError::MarkerEvaluated {
                            marker,
                            label: attribute,
                            offset,
                        },
                        other => RuntimeError::TypeError {
                            msg: format!(
                                "'{}' object has no attribute '{}'",
                                other.type_name(),
                                attribute
                            ),
                            offset,
                        },
                    });
                }

                Opcode::BinaryOp => {
                    let op = BinaryOperator::try_from(arg).map_err(|_| RuntimeError::TypeError {
                        msg: format!("unknown binary operator {}", arg),
                        offset,
                    })?;
                    let right = self.pop(offset)?;
                    let left = self.pop(offset)?;
                    let value = binary(op, left, right, offset)?;
                    self.stack.push(value);
                }
                Opcode::CompareOp => {
                    let cmp = Comparison::try_from(arg).map_err(|_| RuntimeError::TypeError {
                        msg: format!("unknown comparison {}", arg),
                        offset,
                    })?;
                    let right = self.pop(offset)?;
                    let left = self.pop(offset)?;
                    let value = compare(cmp, &left, &right, offset)?;
                    self.stack.push(Value::Bool(value));
                }

                Opcode::JumpForward => ip = self.jump_target(ip, index, true, offset)?,
                Opcode::JumpBackward => ip = self.jump_target(ip, index, false, offset)?,
                Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                    let condition = self.pop(offset)?.is_truthy();
                    if condition == (opcode == Opcode::PopJumpIfTrue) {
                        ip = self.jump_target(ip, index, true, offset)?;
                    }
                }

                Opcode::Call => {
                    if self.stack.len() < index + 1 {
                        return Err(RuntimeError::StackUnderflow { offset });
                    }
                    let args = self.stack.split_off(self.stack.len() - index);
                    let callee = self.pop(offset)?;
                    let value = self.call(callee, args, offset)?;
                    self.stack.push(value);
                }

                Opcode::ReturnValue => return self.pop(offset),
                Opcode::ReturnConst => return self.constant(index, offset),
                Opcode::PopTop => {
                    self.pop(offset)?;
                }
            }
        }

        // Falling off the end returns None
        Ok(Value::None)
    }

    fn pop(&mut self, offset: usize) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { offset })
    }

    fn constant(&self, index: usize, offset: usize) -> Result<Value, RuntimeError> {
        self.code
            .constants
            .get(index)
            .map(Value::from)
            .ok_or_else(|| bad_index("constant", index, offset))
    }

    fn name(&self, index: usize, offset: usize) -> Result<&'a str, RuntimeError> {
        let code: &'a CodeObject = self.code;
        code.names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| bad_index("name", index, offset))
    }

    fn varname(&self, index: usize) -> String {
        self.code
            .varnames
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("<local {}>", index))
    }

    /// Host globals first, then marker sentinels, then builtins
    fn lookup_global(&self, name: &str, offset: usize) -> Result<Value, RuntimeError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(kind) = self.markers.kind_of(name) {
            return Ok(Value::Marker(kind));
        }
        Builtin::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| RuntimeError::UndefinedName {
                name: name.to_string(),
                offset,
            })
    }

    /// Absolute target of a relative jump; `next` is the slot after the jump
    fn jump_target(
        &self,
        next: usize,
        distance: usize,
        forward: bool,
        offset: usize,
    ) -> Result<usize, RuntimeError> {
        let span = distance * INSTRUCTION_WIDTH;
        let target = if forward {
            next.checked_add(span)
        } else {
            next.checked_sub(span)
        };
        target
            .filter(|&target| target <= self.code.instructions.len())
            .ok_or(RuntimeError::JumpOutOfBounds { offset })
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, offset: usize) -> Result<Value, RuntimeError> {
        match callee {
            Value::Builtin(Builtin::Print) => {
                let line = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output.push_str(&line);
                self.output.push('\n');
                Ok(Value::None)
            }
            Value::Builtin(Builtin::Str) => match args.as_slice() {
                [value] => Ok(Value::Str(value.to_string())),
                _ => Err(RuntimeError::WrongArgumentCount {
                    function: "str".to_string(),
                    expected: 1,
                    actual: args.len(),
                }),
            },
            other => Err(RuntimeError::TypeError {
                msg: format!("'{}' object is not callable", other.type_name()),
                offset,
            }),
        }
    }
}

fn bad_index(kind: &'static str, index: usize, offset: usize) -> RuntimeError {
    RuntimeError::BadIndex {
        kind,
        index,
        offset,
    }
}

fn binary(op: BinaryOperator, left: Value, right: Value, offset: usize) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Sub => a.checked_sub(b),
                BinaryOperator::Mul => a.checked_mul(b),
                BinaryOperator::FloorDiv | BinaryOperator::Mod if b == 0 => {
                    return Err(RuntimeError::DivideByZero { offset })
                }
                BinaryOperator::FloorDiv => floor_div(a, b),
                BinaryOperator::Mod => floor_mod(a, b),
            };
            result
                .map(Value::Int)
                .ok_or(RuntimeError::Overflow { offset })
        }
        (Value::Str(a), Value::Str(b)) if op == BinaryOperator::Add => Ok(Value::Str(a + &b)),
        (left, right) => Err(RuntimeError::TypeError {
            msg: format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
            offset,
        }),
    }
}

/// Division rounding toward negative infinity
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

/// Remainder with the sign of the divisor
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let rem = a.checked_rem(b)?;
    if rem != 0 && (rem < 0) != (b < 0) {
        Some(rem + b)
    } else {
        Some(rem)
    }
}

fn compare(cmp: Comparison, left: &Value, right: &Value, offset: usize) -> Result<bool, RuntimeError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match (cmp, ordering) {
        (Comparison::Equal, None) => Ok(left == right),
        (Comparison::NotEqual, None) => Ok(left != right),
        (_, None) => Err(RuntimeError::TypeError {
            msg: format!(
                "'{}' not supported between '{}' and '{}'",
                cmp.symbol(),
                left.type_name(),
                right.type_name()
            ),
            offset,
        }),
        (Comparison::Less, Some(ord)) => Ok(ord == Ordering::Less),
        (Comparison::LessEqual, Some(ord)) => Ok(ord != Ordering::Greater),
        (Comparison::Equal, Some(ord)) => Ok(ord == Ordering::Equal),
        (Comparison::NotEqual, Some(ord)) => Ok(ord != Ordering::Equal),
        (Comparison::Greater, Some(ord)) => Ok(ord == Ordering::Greater),
        (Comparison::GreaterEqual, Some(ord)) => Ok(ord != Ordering::Less),
    }
}
