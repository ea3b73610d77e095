//! Relocation patcher
//!
//! Turns each [`JumpPair`] into a real jump: direction, operand, and the
//! `ExtendedArg` chain in front of it when the operand is wider than a byte.
//! Jumps are relative to the instruction after the jump, in whole
//! instructions.

use super::table::JumpPair;
use super::{PatchError, PatchResult};
use crate::bytecode::{OpcodeTable, MAX_EXTENSION_STAGES, OPERAND_BITS};
use serde::Serialize;
use tracing::debug;

/// Prefixes needed for `value` to fit in `8 + 8k` bits
pub fn extension_stages(value: u64) -> u8 {
    let bits = u64::BITS - value.leading_zeros();
    if bits <= OPERAND_BITS {
        0
    } else {
        ((bits - 1) / OPERAND_BITS) as u8
    }
}

/// Prefix count for a jump spanning `distance` instructions
///
/// The prefixes sit between origin and target, so they are jumped over too.
/// Counting them can push the distance across a byte boundary; one
/// recount settles it, since a single added stage cannot need another.
pub fn required_stages(distance: u64) -> u8 {
    let first = extension_stages(distance);
    extension_stages(distance + u64::from(first))
}

fn fits(operand: u64, stages: u8) -> bool {
    operand
        .checked_shr(OPERAND_BITS * (u32::from(stages) + 1))
        .map_or(true, |rest| rest == 0)
}

/// A fully planned jump, ready to be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JumpEncoding {
    pub label: String,
    pub origin: usize,
    pub target: usize,
    /// Jump opcode byte (forward or backward)
    pub opcode: u8,
    /// Operand in instructions, relative to the slot after the jump
    pub operand: u32,
    /// Number of `ExtendedArg` prefixes
    pub stages: u8,
}

impl JumpEncoding {
    /// Slots occupied: prefixes plus the jump
    pub fn slots(&self) -> usize {
        usize::from(self.stages) + 1
    }

    /// Offset the jump instruction itself lands at
    pub fn jump_offset(&self, width: usize) -> usize {
        self.origin + usize::from(self.stages) * width
    }

    /// `[ext, byte]*, [jump, low]`, most significant byte first
    pub fn to_bytes(&self, table: &OpcodeTable) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.slots() * table.width);
        for stage in (1..=u32::from(self.stages)).rev() {
            let mut slot = vec![0; table.width];
            slot[0] = table.extended_arg;
            slot[1] = (self.operand >> (OPERAND_BITS * stage)) as u8;
            bytes.extend_from_slice(&slot);
        }
        let mut slot = vec![0; table.width];
        slot[0] = self.opcode;
        slot[1] = self.operand as u8;
        bytes.extend_from_slice(&slot);
        bytes
    }
}

/// Plans and writes jumps for a jump table
pub struct RelocationPatcher<'a> {
    table: &'a OpcodeTable,
    max_stages: u8,
}

impl<'a> RelocationPatcher<'a> {
    /// `max_stages` is clamped to the encoding limit of 3
    pub fn new(table: &'a OpcodeTable, max_stages: u8) -> Self {
        Self {
            table,
            max_stages: max_stages.min(MAX_EXTENSION_STAGES),
        }
    }

    /// Work out the encoding of one jump without touching any stream
    pub fn plan(&self, pair: &JumpPair) -> PatchResult<JumpEncoding> {
        let width = self.table.width;
        if pair.room == 0 || pair.origin % width != 0 || pair.target % width != 0 {
            return Err(PatchError::MalformedMarker {
                offset: pair.origin,
                reason: format!(
                    "jump to `{}` has no aligned slot to be written into",
                    pair.label
                ),
            });
        }

        let backward = pair.is_backward();
        if !backward && pair.target < pair.origin + pair.room * width {
            return Err(PatchError::MalformedMarker {
                offset: pair.origin,
                reason: format!(
                    "target of `{}` ({}) lies inside the jump's own slots",
                    pair.label, pair.target
                ),
            });
        }

        let distance = (pair.origin.abs_diff(pair.target) / width) as u64;
        let operand_for = |stages: u8| {
            if backward {
                distance + u64::from(stages) + 1
            } else {
                distance - u64::from(stages) - 1
            }
        };

        let upper = required_stages(distance);
        let stages = if backward {
            // Backward jumps also count the jump slot itself
            if fits(operand_for(upper), upper) {
                upper
            } else {
                upper + 1
            }
        } else {
            // Forward prefixes shrink the operand, so fewer may do
            (0..upper)
                .find(|&stages| {
                    u64::from(stages) < distance && fits(operand_for(stages), stages)
                })
                .unwrap_or(upper)
        };

        let available = self
            .max_stages
            .min(u8::try_from(pair.room - 1).unwrap_or(u8::MAX));
        if stages > available {
            return Err(PatchError::DistanceOverflow {
                label: pair.label.clone(),
                distance: distance as usize,
                stages_needed: stages,
                stages_available: available,
            });
        }

        let operand = operand_for(stages);
        Ok(JumpEncoding {
            label: pair.label.clone(),
            origin: pair.origin,
            target: pair.target,
            opcode: if backward {
                self.table.jump_backward
            } else {
                self.table.jump_forward
            },
            operand: operand as u32,
            stages,
        })
    }

    /// Plan every pair, then write them all
    ///
    /// Nothing is written unless every jump can be encoded.
    pub fn patch(&self, stream: &mut [u8], pairs: &[JumpPair]) -> PatchResult<Vec<JumpEncoding>> {
        let plans = pairs
            .iter()
            .map(|pair| self.plan(pair))
            .collect::<PatchResult<Vec<_>>>()?;

        let width = self.table.width;
        if let Some(plan) = plans
            .iter()
            .find(|plan| plan.origin + plan.slots() * width > stream.len())
        {
            return Err(PatchError::InvalidStream(format!(
                "jump to `{}` at offset {} runs past the end of the stream",
                plan.label, plan.origin
            )));
        }

        for plan in &plans {
            let bytes = plan.to_bytes(self.table);
            stream[plan.origin..plan.origin + bytes.len()].copy_from_slice(&bytes);
            debug!(
                label = %plan.label,
                origin = plan.origin,
                target = plan.target,
                operand = plan.operand,
                stages = plan.stages,
                "jump written"
            );
        }
        Ok(plans)
    }
}
