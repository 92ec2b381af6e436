// ============================================================
// Layer 3 — Labelled Sequence Domain Type
// ============================================================
// A single raw DNA read together with its taxonomy label, as
// handed over by whatever dataset provider sits upstream.
// Plain data: tokenisation and label encoding happen later in
// the data layer.

use serde::{Deserialize, Serialize};

/// A nucleotide sequence and the `;`-separated taxonomy label of
/// the organism it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledSequence {
    /// Raw bases, e.g. "ACGTTGCA..."
    pub sequence: String,

    /// Full taxonomy label, e.g. "k__Bacteria; p__Firmicutes; ..."
    pub label: String,
}

impl LabelledSequence {
    pub fn new(sequence: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            label: label.into(),
        }
    }
}

/// A sample: a bag of reads drawn from one community or one taxon.
/// Member order carries no meaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceSet {
    pub members: Vec<LabelledSequence>,

    /// Label of the whole set, when the set is classified as a unit
    pub label: Option<String>,
}

impl SequenceSet {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
