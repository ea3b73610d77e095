//! Eraser: overwrite marker instructions with no-ops in place

use super::table::EraseTable;
use super::{PatchError, PatchResult};
use crate::bytecode::OpcodeTable;
use tracing::debug;

/// Fill every range of `erase` with `nop 0` slots
///
/// All ranges are validated before the first byte is written, so a bad
/// table leaves `stream` untouched.
pub fn erase_markers(stream: &mut [u8], erase: &EraseTable, table: &OpcodeTable) -> PatchResult<usize> {
    for range in erase {
        let aligned = range.begin % table.width == 0 && range.end % table.width == 0;
        if range.begin >= range.end || !aligned || range.end > stream.len() {
            return Err(PatchError::InvalidEraseRange {
                begin: range.begin,
                end: range.end,
            });
        }
    }

    let mut erased = 0;
    for range in erase {
        for slot in stream[range.begin..range.end].chunks_exact_mut(table.width) {
            slot[0] = table.nop;
            slot[1..].fill(0);
        }
        debug!(label = %range.label, kind = %range.kind, begin = range.begin, end = range.end, "erased");
        erased += range.len();
    }
    Ok(erased)
}
