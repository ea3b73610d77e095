//! Goto patch errors

use super::MarkerKind;
use thiserror::Error;

/// Reasons a function cannot be goto-patched
///
/// Every variant is fatal to the patch attempt. The original code object is
/// never modified, so callers keep a valid function on failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A jump has no label, or a label has no jump
    #[error("missing {missing} marker for `{label}`: {}", unresolved_hint(.missing))]
    UnresolvedLabel { label: String, missing: MarkerKind },

    /// Instructions around a marker don't follow load/attribute/pop
    #[error("malformed marker at offset {offset}: {reason}")]
    MalformedMarker { offset: usize, reason: String },

    /// The same label name appears in two label markers
    #[error("label `{label}` defined twice (offsets {first} and {second})")]
    DuplicateLabel {
        label: String,
        first: usize,
        second: usize,
    },

    /// The jump needs more extension prefixes than allowed or than fit
    #[error(
        "jump to `{label}` spans {distance} instructions and needs {stages_needed} \
         extension prefixes, but at most {stages_available} can be used"
    )]
    DistanceOverflow {
        label: String,
        distance: usize,
        stages_needed: u8,
        stages_available: u8,
    },

    /// An erase range is empty, misaligned or outside the stream
    #[error("cannot erase [{begin}, {end}): range is not a run of whole instructions")]
    InvalidEraseRange { begin: usize, end: usize },

    /// The instruction stream itself cannot be decoded
    #[error("invalid instruction stream: {0}")]
    InvalidStream(String),

    /// A rebuilt stream differs in length from the original
    #[error("patched stream is {actual} bytes, original was {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Post-patch verification found a problem
    #[error("verification failed: {0}")]
    VerificationFailed(String),
}

fn unresolved_hint(missing: &MarkerKind) -> &'static str {
    match missing {
        MarkerKind::Jump => "label is never jumped to",
        MarkerKind::Label => "jump target was never defined or was eliminated as unreachable",
    }
}

/// Result type for goto patching
pub type PatchResult<T> = Result<T, PatchError>;
