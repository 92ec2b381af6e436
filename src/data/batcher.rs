// ============================================================
// Layer 4 — Sequence and Set Batchers
// ============================================================
// Implements Burn's Batcher trait to stack samples into tensors.
//
//   Vec<SequenceSample> (N × L ids)          → SequenceBatch [N, L]
//   Vec<SetSample>      (b sets, ≤ S reads)  → SetBatch [b, S_max, L]
//
// Sets in one batch may hold different numbers of reads. They are
// padded up to the largest set in the batch with all-zero reads,
// and `lengths` records how many slots of each set are real so
// the model can mask the rest out.
//
// Reads are already cut to the same length in the dataset, so the
// read axis never needs padding here.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::{SequenceSample, SetSample};

/// Stack taxon ids into [batch, depth], or None when any sample is
/// unlabelled.
fn stack_targets<B: Backend>(ids: &[&[usize]], device: &B::Device) -> Option<Tensor<B, 2, Int>> {
    let depth = ids.first().map_or(0, |t| t.len());
    if depth == 0 || ids.iter().any(|t| t.len() != depth) {
        return None;
    }
    let flat: Vec<i32> = ids.iter().flat_map(|t| t.iter().map(|&id| id as i32)).collect();
    Some(Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([ids.len(), depth]))
}

// ─── SequenceBatch ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    /// Raw k-mer ids: [batch, L]
    pub tokens: Tensor<B, 2, Int>,
    /// Taxon ids per rank: [batch, depth]
    pub targets: Option<Tensor<B, 2, Int>>,
}

#[derive(Clone, Debug)]
pub struct SequenceBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> SequenceBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SequenceSample, SequenceBatch<B>> for SequenceBatcher<B> {
    fn batch(&self, items: Vec<SequenceSample>) -> SequenceBatch<B> {
        let batch_size = items.len();
        let seq_len = items.first().map_or(0, |s| s.tokens.len());

        let flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.tokens.iter().map(|&t| t as i32))
            .collect();
        let tokens = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape([batch_size, seq_len]);

        let ids: Vec<&[usize]> = items.iter().map(|s| s.taxon_ids.as_slice()).collect();
        SequenceBatch { tokens, targets: stack_targets(&ids, &self.device) }
    }
}

// ─── SetBatch ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SetBatch<B: Backend> {
    /// Raw k-mer ids: [batch, S_max, L]
    pub tokens: Tensor<B, 3, Int>,
    /// Real reads per set
    pub lengths: Vec<usize>,
    pub targets: Option<Tensor<B, 2, Int>>,
}

#[derive(Clone, Debug)]
pub struct SetBatcher<B: Backend> {
    pub device: B::Device,
    /// Sets larger than this are truncated
    pub max_set_len: usize,
}

impl<B: Backend> SetBatcher<B> {
    pub fn new(device: B::Device, max_set_len: usize) -> Self {
        Self { device, max_set_len }
    }
}

impl<B: Backend> Batcher<SetSample, SetBatch<B>> for SetBatcher<B> {
    fn batch(&self, items: Vec<SetSample>) -> SetBatch<B> {
        let batch_size = items.len();
        let lengths: Vec<usize> = items.iter().map(|s| s.members.len().min(self.max_set_len)).collect();
        let slots = lengths.iter().copied().max().unwrap_or(0);
        let seq_len = items
            .iter()
            .flat_map(|s| s.members.first())
            .map(Vec::len)
            .next()
            .unwrap_or(0);

        let mut flat: Vec<i32> = Vec::with_capacity(batch_size * slots * seq_len);
        for (sample, &len) in items.iter().zip(&lengths) {
            for read in &sample.members[..len] {
                flat.extend(read.iter().map(|&t| t as i32));
            }
            flat.resize(flat.len() + (slots - len) * seq_len, 0);
        }
        let tokens = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape([batch_size, slots, seq_len]);

        let ids: Vec<&[usize]> = items.iter().map(|s| s.taxon_ids.as_slice()).collect();
        SetBatch { tokens, lengths, targets: stack_targets(&ids, &self.device) }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_sequence_batch_shapes() {
        let batcher = SequenceBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![
            SequenceSample { tokens: vec![1, 2, 3], taxon_ids: vec![0, 1] },
            SequenceSample { tokens: vec![4, 5, 6], taxon_ids: vec![1, 2] },
        ]);
        assert_eq!(batch.tokens.dims(), [2, 3]);
        let targets = batch.targets.unwrap();
        assert_eq!(targets.clone().dims(), [2, 2]);
        assert_eq!(targets.into_data().convert::<i64>().to_vec::<i64>().unwrap(), vec![0, 1, 1, 2]);
    }

    #[test]
    fn test_unlabelled_batch_has_no_targets() {
        let batcher = SequenceBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![SequenceSample { tokens: vec![1, 2], taxon_ids: vec![] }]);
        assert!(batch.targets.is_none());
    }

    #[test]
    fn test_sets_are_padded_to_largest_and_truncated() {
        let batcher = SetBatcher::<TestBackend>::new(Default::default(), 3);
        let batch = batcher.batch(vec![
            SetSample { members: vec![vec![1, 1]; 5], taxon_ids: vec![] },
            SetSample { members: vec![vec![2, 2]], taxon_ids: vec![] },
        ]);
        assert_eq!(batch.lengths, vec![3, 1]);
        assert_eq!(batch.tokens.clone().dims(), [2, 3, 2]);
        let values = batch.tokens.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![1, 1, 1, 1, 1, 1, 2, 2, 0, 0, 0, 0]);
    }
}
