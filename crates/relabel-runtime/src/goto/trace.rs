//! Instruction trace
//!
//! Decoded, offset-indexed view of an instruction stream. `ExtendedArg`
//! prefixes are folded into the instruction they extend, so every entry is
//! one logical instruction; `start` still remembers where its prefixes
//! began.

use super::{PatchError, PatchResult};
use crate::bytecode::{CodeObject, OpcodeTable, MAX_EXTENSION_STAGES};
use serde::Serialize;

/// Instruction category, as far as the marker grammar cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstrKind {
    /// Global load; may name a marker
    LoadGlobal,
    /// Attribute or name load; carries a label symbol after a marker
    SymbolLoad,
    /// Closes an expression statement
    PopTop,
    Nop,
    Other,
}

/// One logical instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    /// Offset of the first `ExtendedArg` prefix, or `offset` if none
    pub start: usize,
    /// Offset of the instruction itself
    pub offset: usize,
    pub opcode: u8,
    /// Argument with all prefixes folded in
    pub arg: u32,
    pub kind: InstrKind,
    /// Name-table entry for global, attribute and name loads
    pub symbol: Option<String>,
}

/// Decoded instruction stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionTrace {
    entries: Vec<TraceEntry>,
    stream_len: usize,
}

impl InstructionTrace {
    /// Decode a code object's stream
    pub fn decode(code: &CodeObject, table: &OpcodeTable) -> PatchResult<Self> {
        Self::decode_stream(&code.instructions, &code.names, table)
    }

    /// Decode a raw stream against a name table
    pub fn decode_stream(stream: &[u8], names: &[String], table: &OpcodeTable) -> PatchResult<Self> {
        if stream.len() % table.width != 0 {
            return Err(PatchError::InvalidStream(format!(
                "length {} is not a multiple of the instruction width {}",
                stream.len(),
                table.width
            )));
        }

        let mut entries = Vec::with_capacity(stream.len() / table.width);
        let mut prefix_start: Option<usize> = None;
        let mut extended: u32 = 0;
        let mut stages: u8 = 0;

        for (index, slot) in stream.chunks_exact(table.width).enumerate() {
            let offset = index * table.width;
            let (opcode, low) = (slot[0], slot[1]);

            if opcode == table.extended_arg {
                if stages == MAX_EXTENSION_STAGES {
                    return Err(PatchError::InvalidStream(format!(
                        "more than {} chained extension prefixes at offset {}",
                        MAX_EXTENSION_STAGES,
                        prefix_start.unwrap_or(offset)
                    )));
                }
                prefix_start.get_or_insert(offset);
                extended = (extended << 8) | u32::from(low);
                stages += 1;
                continue;
            }

            let arg = (extended << 8) | u32::from(low);
            let kind = classify(opcode, table);
            let symbol = match kind {
                InstrKind::LoadGlobal | InstrKind::SymbolLoad => {
                    let name = names.get(arg as usize).ok_or_else(|| {
                        PatchError::InvalidStream(format!(
                            "name index {} out of range at offset {} ({} names)",
                            arg,
                            offset,
                            names.len()
                        ))
                    })?;
                    Some(name.clone())
                }
                _ => None,
            };

            entries.push(TraceEntry {
                start: prefix_start.take().unwrap_or(offset),
                offset,
                opcode,
                arg,
                kind,
                symbol,
            });
            extended = 0;
            stages = 0;
        }

        if let Some(start) = prefix_start {
            return Err(PatchError::InvalidStream(format!(
                "extension prefix at offset {} has no instruction to extend",
                start
            )));
        }

        Ok(Self {
            entries,
            stream_len: stream.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Number of logical instructions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte length of the decoded stream
    pub fn stream_len(&self) -> usize {
        self.stream_len
    }

    /// Entry whose instruction (or prefix chain) begins at `offset`
    pub fn entry_starting_at(&self, offset: usize) -> Option<&TraceEntry> {
        self.entries
            .binary_search_by_key(&offset, |entry| entry.start)
            .ok()
            .map(|index| &self.entries[index])
    }
}

impl<'a> IntoIterator for &'a InstructionTrace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn classify(opcode: u8, table: &OpcodeTable) -> InstrKind {
    if opcode == table.load_global {
        InstrKind::LoadGlobal
    } else if table.is_symbol_load(opcode) {
        InstrKind::SymbolLoad
    } else if opcode == table.pop_top {
        InstrKind::PopTop
    } else if opcode == table.nop {
        InstrKind::Nop
    } else {
        InstrKind::Other
    }
}
