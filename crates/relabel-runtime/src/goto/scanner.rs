//! Marker scanner
//!
//! One left-to-right pass over an [`InstructionTrace`] that recognizes the
//! marker grammar
//!
//! ```text
//! LOAD_GLOBAL <jump|label marker>
//! LOAD_ATTR   <label name>        (or LOAD_NAME)
//! POP_TOP
//! ```
//!
//! and records where jumps start, where they land, and which slots become
//! no-ops. The stream itself is not touched.

use super::table::{EraseRange, EraseTable, JumpTable, MarkerKind, MarkerNames};
use super::trace::{InstrKind, InstructionTrace, TraceEntry};
use super::{PatchError, PatchResult};
use crate::bytecode::OpcodeTable;
use tracing::debug;

/// Scanner state
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Normal,
    /// Saw the jump marker load; `origin` is where the jump will be written
    AwaitingJumpLabel { origin: usize, label: Option<String> },
    /// Saw the label marker load at `start`
    AwaitingTargetLabel { start: usize, label: Option<String> },
}

/// Builds jump and erase tables from a trace
pub struct MarkerScanner<'a> {
    names: &'a MarkerNames,
    table: &'a OpcodeTable,
}

impl<'a> MarkerScanner<'a> {
    pub fn new(names: &'a MarkerNames, table: &'a OpcodeTable) -> Self {
        Self { names, table }
    }

    /// Scan the whole trace
    ///
    /// Succeeds only if every label has a target and at least one jump.
    pub fn scan(&self, trace: &InstructionTrace) -> PatchResult<(JumpTable, EraseTable)> {
        let mut jumps = JumpTable::new();
        let mut erase = EraseTable::new();
        let mut state = ScanState::Normal;

        for entry in trace {
            state = self.step(state, entry, &mut jumps, &mut erase)?;
        }

        match state {
            ScanState::Normal => {}
            ScanState::AwaitingJumpLabel { origin: at, .. }
            | ScanState::AwaitingTargetLabel { start: at, .. } => {
                return Err(PatchError::MalformedMarker {
                    offset: at,
                    reason: "instruction stream ends inside a marker statement".to_string(),
                });
            }
        }

        jumps.check_complete()?;
        Ok((jumps, erase))
    }

    fn step(
        &self,
        state: ScanState,
        entry: &TraceEntry,
        jumps: &mut JumpTable,
        erase: &mut EraseTable,
    ) -> PatchResult<ScanState> {
        match state {
            ScanState::Normal => Ok(self.enter(entry)),

            ScanState::AwaitingJumpLabel { origin, label: None } => {
                let label = self.expect_symbol(entry, MarkerKind::Jump)?;
                Ok(ScanState::AwaitingJumpLabel {
                    origin,
                    label: Some(label),
                })
            }
            ScanState::AwaitingJumpLabel {
                origin,
                label: Some(label),
            } => {
                let end = self.expect_pop(entry, &label)?;
                let room = (end - origin) / self.table.width;
                debug!(label = %label, origin, room, "jump marker");
                jumps.record_jump(&label, origin, room);
                erase.push(EraseRange {
                    kind: MarkerKind::Jump,
                    label,
                    begin: origin + self.table.width,
                    end,
                });
                Ok(ScanState::Normal)
            }

            ScanState::AwaitingTargetLabel { start, label: None } => {
                let label = self.expect_symbol(entry, MarkerKind::Label)?;
                Ok(ScanState::AwaitingTargetLabel {
                    start,
                    label: Some(label),
                })
            }
            ScanState::AwaitingTargetLabel {
                start,
                label: Some(label),
            } => {
                let end = self.expect_pop(entry, &label)?;
                debug!(label = %label, start, target = end, "label marker");
                jumps.record_target(&label, start, end)?;
                erase.push(EraseRange {
                    kind: MarkerKind::Label,
                    label,
                    begin: start,
                    end,
                });
                Ok(ScanState::Normal)
            }
        }
    }

    /// Transition out of `Normal` on a marker load
    fn enter(&self, entry: &TraceEntry) -> ScanState {
        if entry.kind != InstrKind::LoadGlobal {
            return ScanState::Normal;
        }
        match entry.symbol.as_deref().and_then(|s| self.names.kind_of(s)) {
            Some(MarkerKind::Jump) => ScanState::AwaitingJumpLabel {
                origin: entry.start,
                label: None,
            },
            Some(MarkerKind::Label) => ScanState::AwaitingTargetLabel {
                start: entry.start,
                label: None,
            },
            None => ScanState::Normal,
        }
    }

    fn expect_symbol(&self, entry: &TraceEntry, kind: MarkerKind) -> PatchResult<String> {
        match (&entry.kind, &entry.symbol) {
            (InstrKind::SymbolLoad, Some(symbol)) => Ok(symbol.clone()),
            _ => Err(PatchError::MalformedMarker {
                offset: entry.start,
                reason: format!(
                    "expected the label name after the {} marker, found opcode {:#04x}",
                    kind, entry.opcode
                ),
            }),
        }
    }

    /// Returns the offset just past the closing pop
    fn expect_pop(&self, entry: &TraceEntry, label: &str) -> PatchResult<usize> {
        if entry.kind == InstrKind::PopTop && entry.start == entry.offset {
            Ok(entry.offset + self.table.width)
        } else {
            Err(PatchError::MalformedMarker {
                offset: entry.start,
                reason: format!(
                    "marker statement for `{}` is not closed by a pop (found opcode {:#04x})",
                    label, entry.opcode
                ),
            })
        }
    }
}
