// ============================================================
// Layer 4 — Sequence and Set Datasets
// ============================================================
// Tokenised samples behind Burn's Dataset trait.
//
//   LabelledSequence ── KmerTokenizer ──▶ SequenceSample
//   SequenceSet      ── KmerTokenizer ──▶ SetSample
//
// Every read is cut to exactly `sequence_length` bases before
// tokenising, so every sample has token_length = L - k + 1 raw
// k-mer ids. Reads shorter than that are rejected.
//
// Taxon ids are only filled in when a hierarchy is supplied;
// pretraining datasets leave them empty.

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::domain::kmer::KmerTokenizer;
use crate::domain::sequence::{LabelledSequence, SequenceSet};
use crate::domain::taxonomy::TaxonomyHierarchy;
use crate::error::{DeepDnaError, Result};

/// One tokenised read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSample {
    /// Raw k-mer ids, token_length long
    pub tokens: Vec<u32>,
    /// One taxon id per rank, empty when unlabelled
    pub taxon_ids: Vec<usize>,
}

/// One tokenised set of reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSample {
    pub members: Vec<Vec<u32>>,
    pub taxon_ids: Vec<usize>,
}

/// Turns reads into fixed-length samples.
#[derive(Debug, Clone)]
pub struct SampleEncoder<'a> {
    tokenizer: &'a KmerTokenizer,
    sequence_length: usize,
    hierarchy: Option<&'a TaxonomyHierarchy>,
}

impl<'a> SampleEncoder<'a> {
    pub fn new(tokenizer: &'a KmerTokenizer, sequence_length: usize) -> Self {
        Self { tokenizer, sequence_length, hierarchy: None }
    }

    /// Also resolve labels into taxon ids.
    pub fn with_hierarchy(mut self, hierarchy: &'a TaxonomyHierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    fn tokens(&self, sequence: &str) -> Result<Vec<u32>> {
        let bases = sequence.chars().count();
        if bases < self.sequence_length {
            return Err(DeepDnaError::dimension_mismatch("read length", self.sequence_length, bases));
        }
        let mut tokens = self.tokenizer.encode(sequence)?;
        tokens.truncate(self.tokenizer.token_length(self.sequence_length));
        Ok(tokens)
    }

    fn taxon_ids(&self, label: Option<&str>) -> Result<Vec<usize>> {
        match (self.hierarchy, label) {
            (Some(hierarchy), Some(label)) => hierarchy.encode(label),
            (Some(_), None) => Err(DeepDnaError::UnknownLabel { rank: 0, label: String::new() }),
            (None, _) => Ok(Vec::new()),
        }
    }

    pub fn sequence(&self, read: &LabelledSequence) -> Result<SequenceSample> {
        Ok(SequenceSample {
            tokens: self.tokens(&read.sequence)?,
            taxon_ids: self.taxon_ids(Some(&read.label))?,
        })
    }

    pub fn set(&self, set: &SequenceSet) -> Result<SetSample> {
        if set.is_empty() {
            return Err(DeepDnaError::EmptyBatch("set has no members".into()));
        }
        let members = set
            .members
            .iter()
            .map(|read| self.tokens(&read.sequence))
            .collect::<Result<Vec<_>>>()?;
        Ok(SetSample { members, taxon_ids: self.taxon_ids(set.label.as_deref())? })
    }
}

pub struct SequenceDataset {
    samples: Vec<SequenceSample>,
}

impl SequenceDataset {
    pub fn new(samples: Vec<SequenceSample>) -> Self {
        Self { samples }
    }

    pub fn from_reads(reads: &[LabelledSequence], encoder: &SampleEncoder) -> Result<Self> {
        let samples = reads.iter().map(|r| encoder.sequence(r)).collect::<Result<Vec<_>>>()?;
        tracing::debug!("Tokenised {} reads", samples.len());
        Ok(Self::new(samples))
    }
}

impl Dataset<SequenceSample> for SequenceDataset {
    fn get(&self, index: usize) -> Option<SequenceSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

pub struct SetDataset {
    samples: Vec<SetSample>,
}

impl SetDataset {
    pub fn new(samples: Vec<SetSample>) -> Self {
        Self { samples }
    }

    pub fn from_sets(sets: &[SequenceSet], encoder: &SampleEncoder) -> Result<Self> {
        let samples = sets.iter().map(|s| encoder.set(s)).collect::<Result<Vec<_>>>()?;
        tracing::debug!("Tokenised {} sets", samples.len());
        Ok(Self::new(samples))
    }
}

impl Dataset<SetSample> for SetDataset {
    fn get(&self, index: usize) -> Option<SetSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn reads() -> Vec<LabelledSequence> {
        vec![
            LabelledSequence::new("ACGTACGTAA", "k__A; g__1"),
            LabelledSequence::new("TTTTGGGGCC", "k__A; g__2"),
        ]
    }

    #[test]
    fn test_reads_are_cut_and_tokenised() {
        let tokenizer = KmerTokenizer::new(3).unwrap();
        let encoder = SampleEncoder::new(&tokenizer, 8);
        let dataset = SequenceDataset::from_reads(&reads(), &encoder).unwrap();
        assert_eq!(dataset.len(), 2);
        let sample = dataset.get(0).unwrap();
        assert_eq!(sample.tokens.len(), 6);
        assert!(sample.taxon_ids.is_empty());
    }

    #[test]
    fn test_hierarchy_fills_taxon_ids() {
        let tokenizer = KmerTokenizer::new(3).unwrap();
        let hierarchy = TaxonomyHierarchy::build(["k__A; g__1", "k__A; g__2"], 2).unwrap();
        let encoder = SampleEncoder::new(&tokenizer, 10).with_hierarchy(&hierarchy);
        let dataset = SequenceDataset::from_reads(&reads(), &encoder).unwrap();
        assert_eq!(dataset.get(1).unwrap().taxon_ids, vec![0, 1]);
    }

    #[test]
    fn test_short_reads_are_rejected() {
        let tokenizer = KmerTokenizer::new(3).unwrap();
        let encoder = SampleEncoder::new(&tokenizer, 12);
        assert!(SequenceDataset::from_reads(&reads(), &encoder).is_err());
    }

    #[test]
    fn test_sets_keep_members_and_label() {
        let tokenizer = KmerTokenizer::new(3).unwrap();
        let hierarchy = TaxonomyHierarchy::build(["k__A; g__1"], 2).unwrap();
        let set = SequenceSet {
            members: vec![reads().remove(0), reads().remove(0)],
            label: Some("k__A; g__1".into()),
        };
        let encoder = SampleEncoder::new(&tokenizer, 10).with_hierarchy(&hierarchy);
        let dataset = SetDataset::from_sets(&[set], &encoder).unwrap();
        let sample = dataset.get(0).unwrap();
        assert_eq!(sample.members.len(), 2);
        assert_eq!(sample.taxon_ids, vec![0, 0]);
    }
}
