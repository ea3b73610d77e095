//! Jump and erase tables produced by the marker scanner

use super::{PatchError, PatchResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Which of the two marker statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    /// `GOTO.name`
    Jump,
    /// `LABEL.name`
    Label,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerKind::Jump => write!(f, "jump"),
            MarkerKind::Label => write!(f, "label"),
        }
    }
}

/// Global names the marker statements load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerNames {
    pub jump: String,
    pub label: String,
}

impl MarkerNames {
    pub fn new(jump: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            jump: jump.into(),
            label: label.into(),
        }
    }

    /// Which marker a global name refers to, if any
    pub fn kind_of(&self, global: &str) -> Option<MarkerKind> {
        if global == self.jump {
            Some(MarkerKind::Jump)
        } else if global == self.label {
            Some(MarkerKind::Label)
        } else {
            None
        }
    }
}

impl Default for MarkerNames {
    fn default() -> Self {
        Self::new("GOTO", "LABEL")
    }
}

/// One relocation: write a jump at `origin` that lands on `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JumpPair {
    pub label: String,
    /// Byte offset the jump (and any prefixes) is written at
    pub origin: usize,
    /// Byte offset of the first instruction after the label marker
    pub target: usize,
    /// Instruction slots available at `origin` for prefixes plus the jump
    pub room: usize,
}

impl JumpPair {
    /// Lands at or before its own origin
    pub fn is_backward(&self) -> bool {
        self.origin >= self.target
    }
}

/// A jump marker occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JumpSite {
    pub origin: usize,
    pub room: usize,
}

/// Everything known about one label name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelSites {
    /// Where execution resumes, once the label marker is seen
    pub target: Option<usize>,
    /// Offset of the label marker itself
    pub defined_at: Option<usize>,
    /// Every jump marker naming this label, in stream order
    pub jumps: Vec<JumpSite>,
}

/// Per-label jump origins and targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JumpTable {
    labels: BTreeMap<String, LabelSites>,
}

impl JumpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a jump marker naming `label`
    pub fn record_jump(&mut self, label: &str, origin: usize, room: usize) {
        self.labels
            .entry(label.to_string())
            .or_default()
            .jumps
            .push(JumpSite { origin, room });
    }

    /// Record the label marker for `label`
    pub fn record_target(&mut self, label: &str, defined_at: usize, target: usize) -> PatchResult<()> {
        let sites = self.labels.entry(label.to_string()).or_default();
        if let Some(first) = sites.defined_at {
            return Err(PatchError::DuplicateLabel {
                label: label.to_string(),
                first,
                second: defined_at,
            });
        }
        sites.defined_at = Some(defined_at);
        sites.target = Some(target);
        Ok(())
    }

    /// Sites recorded for `label`
    pub fn get(&self, label: &str) -> Option<&LabelSites> {
        self.labels.get(label)
    }

    /// Label names, sorted
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Number of distinct labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Fail on the first label that lacks a jump or a target
    pub fn check_complete(&self) -> PatchResult<()> {
        for (label, sites) in &self.labels {
            if sites.target.is_none() {
                return Err(PatchError::UnresolvedLabel {
                    label: label.clone(),
                    missing: MarkerKind::Label,
                });
            }
            if sites.jumps.is_empty() {
                return Err(PatchError::UnresolvedLabel {
                    label: label.clone(),
                    missing: MarkerKind::Jump,
                });
            }
        }
        Ok(())
    }

    /// One [`JumpPair`] per jump site, ordered by origin
    pub fn pairs(&self) -> PatchResult<Vec<JumpPair>> {
        self.check_complete()?;
        let mut pairs: Vec<JumpPair> = self
            .labels
            .iter()
            .flat_map(|(label, sites)| {
                let target = sites.target.unwrap_or_default();
                sites.jumps.iter().map(move |site| JumpPair {
                    label: label.clone(),
                    origin: site.origin,
                    target,
                    room: site.room,
                })
            })
            .collect();
        pairs.sort_by_key(|pair| pair.origin);
        Ok(pairs)
    }
}

/// `[begin, end)` run of marker instructions to overwrite with no-ops
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EraseRange {
    pub kind: MarkerKind,
    pub label: String,
    pub begin: usize,
    pub end: usize,
}

impl EraseRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every range to erase, in stream order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EraseTable {
    ranges: Vec<EraseRange>,
}

impl EraseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, range: EraseRange) {
        self.ranges.push(range);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EraseRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total bytes covered
    pub fn byte_count(&self) -> usize {
        self.ranges.iter().map(EraseRange::len).sum()
    }
}

impl<'a> IntoIterator for &'a EraseTable {
    type Item = &'a EraseRange;
    type IntoIter = std::slice::Iter<'a, EraseRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl FromIterator<EraseRange> for EraseTable {
    fn from_iter<I: IntoIterator<Item = EraseRange>>(iter: I) -> Self {
        Self {
            ranges: iter.into_iter().collect(),
        }
    }
}
