//! Goto patching
//!
//! Rewrites a compiled function so that marker statements
//!
//! ```text
//! GOTO.name     # jump marker
//! LABEL.name    # label marker
//! ```
//!
//! become real jumps. The pipeline runs in fixed order:
//!
//! 1. decode the stream into an [`InstructionTrace`]
//! 2. [`MarkerScanner`] builds the jump and erase tables
//! 3. [`erase_markers`] turns marker slots into no-ops
//! 4. [`RelocationPatcher`] writes each jump at its origin
//! 5. the result is re-decoded and checked
//! 6. [`CodeObject::with_instructions`] wraps the new stream
//!
//! The stream never changes length, so line and exception tables keep
//! their offsets. The input code object is never modified.

mod eraser;
mod error;
mod rebuild;
mod relocate;
mod scanner;
mod table;
mod trace;

pub use eraser::erase_markers;
pub use error::{PatchError, PatchResult};
pub use relocate::{extension_stages, required_stages, JumpEncoding, RelocationPatcher};
pub use scanner::MarkerScanner;
pub use table::{
    EraseRange, EraseTable, JumpPair, JumpSite, JumpTable, LabelSites, MarkerKind, MarkerNames,
};
pub use trace::{InstrKind, InstructionTrace, TraceEntry};

use crate::bytecode::{listing, CodeObject, OpcodeTable, MAX_EXTENSION_STAGES};
use relabel_config::Settings;
use serde::Serialize;
use tracing::{debug, info, warn};

/// How a [`GotoPatcher`] recognizes and encodes things
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    pub markers: MarkerNames,
    pub table: OpcodeTable,
    /// Upper bound on `ExtendedArg` prefixes per jump (at most 3)
    pub max_extension_stages: u8,
    /// Re-decode and check the patched stream before returning it
    pub verify: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            markers: MarkerNames::default(),
            table: OpcodeTable::wordcode(),
            max_extension_stages: MAX_EXTENSION_STAGES,
            verify: true,
        }
    }
}

impl PatchOptions {
    /// Options from a loaded configuration, with the wordcode table
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            markers: MarkerNames::new(settings.jump_marker(), settings.label_marker()),
            table: OpcodeTable::wordcode(),
            max_extension_stages: settings.max_extension_stages(),
            verify: settings.verify(),
        }
    }

    pub fn with_table(mut self, table: OpcodeTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_markers(mut self, markers: MarkerNames) -> Self {
        self.markers = markers;
        self
    }
}

/// Counts from one patch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchStats {
    /// Distinct labels resolved
    pub labels: usize,
    /// Jumps written (one per jump marker)
    pub jumps_patched: usize,
    /// `ExtendedArg` prefixes written in front of jumps
    pub extension_prefixes: usize,
    /// Marker statements erased, jump and label alike
    pub markers_erased: usize,
    /// Bytes overwritten with no-ops
    pub bytes_erased: usize,
    /// Length of the stream, unchanged by patching
    pub stream_len: usize,
}

impl PatchStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Nothing was patched
    pub fn is_noop(&self) -> bool {
        self.jumps_patched == 0 && self.markers_erased == 0
    }
}

/// Applies goto patching to code objects
#[derive(Debug, Clone, Default)]
pub struct GotoPatcher {
    options: PatchOptions,
}

impl GotoPatcher {
    pub fn new(options: PatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PatchOptions {
        &self.options
    }

    /// Jump and erase tables for `code`, without patching
    pub fn scan(&self, code: &CodeObject) -> PatchResult<(JumpTable, EraseTable)> {
        let trace = InstructionTrace::decode(code, &self.options.table)?;
        MarkerScanner::new(&self.options.markers, &self.options.table).scan(&trace)
    }

    /// Encodings the patch would write, without patching
    pub fn plan(&self, code: &CodeObject) -> PatchResult<Vec<JumpEncoding>> {
        let (jumps, _) = self.scan(code)?;
        let relocator = self.relocator();
        jumps
            .pairs()?
            .iter()
            .map(|pair| relocator.plan(pair))
            .collect()
    }

    /// Patched copy of `code`
    pub fn patch(&self, code: &CodeObject) -> PatchResult<CodeObject> {
        self.patch_with_stats(code).map(|(patched, _)| patched)
    }

    /// Patched copy of `code`, plus what was done to it
    pub fn patch_with_stats(&self, code: &CodeObject) -> PatchResult<(CodeObject, PatchStats)> {
        let table = &self.options.table;
        let (jumps, erase) = self.scan(code)?;
        let mut stats = PatchStats {
            stream_len: code.instructions.len(),
            ..PatchStats::new()
        };
        if jumps.is_empty() {
            debug!(function = %code.qualname, "no markers");
            return Ok((code.clone(), stats));
        }

        let pairs = jumps.pairs()?;
        let mut stream = code.instructions.clone();
        stats.bytes_erased = erase_markers(&mut stream, &erase, table)?;
        let plans = self.relocator().patch(&mut stream, &pairs)?;

        if self.options.verify {
            self.verify(&stream, &code.names, &plans)?;
        }

        stats.labels = jumps.len();
        stats.jumps_patched = plans.len();
        stats.extension_prefixes = plans.iter().map(|plan| usize::from(plan.stages)).sum();
        stats.markers_erased = erase.len();

        let patched = code.with_instructions(stream)?;
        info!(
            function = %code.qualname,
            labels = stats.labels,
            jumps = stats.jumps_patched,
            prefixes = stats.extension_prefixes,
            bytes_erased = stats.bytes_erased,
            "goto patch applied"
        );
        debug!(function = %code.qualname, "patched listing:\n{}", listing(&patched));
        Ok((patched, stats))
    }

    fn relocator(&self) -> RelocationPatcher<'_> {
        RelocationPatcher::new(&self.options.table, self.options.max_extension_stages)
    }

    /// The patched stream decodes, has no markers left, and every jump
    /// lands where it was planned to
    fn verify(&self, stream: &[u8], names: &[String], plans: &[JumpEncoding]) -> PatchResult<()> {
        let table = &self.options.table;
        let failed = |message: String| {
            warn!(%message, "patched stream rejected");
            PatchError::VerificationFailed(message)
        };

        let trace = InstructionTrace::decode_stream(stream, names, table)
            .map_err(|err| failed(format!("patched stream does not decode: {}", err)))?;
        let (leftover, _) = MarkerScanner::new(&self.options.markers, table)
            .scan(&trace)
            .map_err(|err| failed(format!("patched stream rescan: {}", err)))?;
        if let Some(label) = leftover.labels().next() {
            return Err(failed(format!("marker for `{}` survived patching", label)));
        }

        for plan in plans {
            let entry = trace
                .entry_starting_at(plan.origin)
                .filter(|entry| entry.opcode == plan.opcode && entry.arg == plan.operand)
                .ok_or_else(|| {
                    failed(format!(
                        "no jump for `{}` decodes at offset {}",
                        plan.label, plan.origin
                    ))
                })?;

            let next = entry.offset + table.width;
            let span = entry.arg as usize * table.width;
            let landing = if entry.opcode == table.jump_backward {
                next.checked_sub(span)
            } else {
                Some(next + span)
            };
            match landing {
                Some(at) if at != plan.target => {
                    return Err(failed(format!(
                        "jump for `{}` lands at {}, planned for {}",
                        plan.label, at, plan.target
                    )))
                }
                Some(at) if trace.entry_starting_at(at).is_none() => {
                    return Err(failed(format!(
                        "jump for `{}` lands at {}, which does not start an instruction",
                        plan.label, at
                    )))
                }
                Some(_) => {}
                None => {
                    return Err(failed(format!(
                        "jump for `{}` lands before the start of the stream",
                        plan.label
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Patch `code` with default options
pub fn patch(code: &CodeObject) -> PatchResult<CodeObject> {
    GotoPatcher::default().patch(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CodeBuilder, Opcode};
    use pretty_assertions::assert_eq;
    use relabel_config::{MarkersConfig, PatchConfig};

    fn forward_skip() -> CodeObject {
        let mut b = CodeBuilder::new("f");
        b.print_const("A");
        b.goto_marker("L");
        b.print_const("B");
        b.label_marker("L");
        b.print_const("C");
        b.finish().unwrap()
    }

    #[test]
    fn test_forward_skip_stream() {
        let code = forward_skip();
        let (patched, stats) = GotoPatcher::default().patch_with_stats(&code).unwrap();

        // GOTO origin at 8 becomes a jump over B and the erased label
        assert_eq!(&patched.instructions[8..10], &[Opcode::JumpForward as u8, 9]);
        assert!(patched.instructions[10..14]
            .chunks(2)
            .all(|slot| slot == [Opcode::Nop as u8, 0]));
        assert!(patched.instructions[22..28]
            .chunks(2)
            .all(|slot| slot == [Opcode::Nop as u8, 0]));
        assert_eq!(patched.instructions.len(), code.instructions.len());
        assert_eq!(
            stats,
            PatchStats {
                labels: 1,
                jumps_patched: 1,
                extension_prefixes: 0,
                markers_erased: 2,
                bytes_erased: 10,
                stream_len: code.instructions.len(),
            }
        );
    }

    #[test]
    fn test_no_markers_is_identity() {
        let mut b = CodeBuilder::new("plain");
        b.print_const("x");
        let code = b.finish().unwrap();
        let (patched, stats) = GotoPatcher::default().patch_with_stats(&code).unwrap();
        assert_eq!(patched, code);
        assert!(stats.is_noop());
    }

    #[test]
    fn test_original_untouched_on_failure() {
        let mut b = CodeBuilder::new("f");
        b.goto_marker("nowhere");
        let code = b.finish().unwrap();
        let before = code.clone();
        let err = patch(&code).unwrap_err();
        assert!(matches!(
            err,
            PatchError::UnresolvedLabel {
                missing: MarkerKind::Label,
                ..
            }
        ));
        assert_eq!(code, before);
    }

    #[test]
    fn test_verify_rejects_jump_past_end() {
        let (lg, la, pop) = (
            Opcode::LoadGlobal as u8,
            Opcode::LoadAttr as u8,
            Opcode::PopTop as u8,
        );
        let mut code = CodeObject::new("f");
        code.names = vec!["GOTO".into(), "L".into(), "LABEL".into()];
        // Label marker is the last statement; nothing follows it
        code.instructions = vec![lg, 0, la, 1, pop, 0, lg, 2, la, 1, pop, 0];

        let err = patch(&code).unwrap_err();
        assert!(matches!(err, PatchError::VerificationFailed(ref msg) if msg.contains("lands at 12")));

        let unchecked = GotoPatcher::new(PatchOptions {
            verify: false,
            ..PatchOptions::default()
        });
        assert!(unchecked.patch(&code).is_ok());
    }

    #[test]
    fn test_plan_matches_patch() {
        let code = forward_skip();
        let patcher = GotoPatcher::default();
        let plans = patcher.plan(&code).unwrap();
        assert_eq!(plans.len(), 1);
        let patched = patcher.patch(&code).unwrap();
        let bytes = plans[0].to_bytes(&patcher.options().table);
        assert_eq!(&patched.instructions[8..8 + bytes.len()], bytes.as_slice());
    }

    #[test]
    fn test_options_from_settings() {
        let settings = Settings {
            markers: Some(MarkersConfig {
                jump: Some("JUMP".into()),
                label: Some("HERE".into()),
            }),
            patch: Some(PatchConfig {
                max_extension_stages: Some(1),
                verify: Some(false),
            }),
            vm: None,
        };
        let options = PatchOptions::from_settings(&settings);
        assert_eq!(options.markers, MarkerNames::new("JUMP", "HERE"));
        assert_eq!(options.max_extension_stages, 1);
        assert!(!options.verify);
    }

    #[test]
    fn test_default_stage_limit_matches_settings() {
        assert_eq!(
            PatchOptions::default().max_extension_stages,
            Settings::default().max_extension_stages()
        );
        assert_eq!(MAX_EXTENSION_STAGES, relabel_config::settings::MAX_EXTENSION_STAGES);
    }
}
