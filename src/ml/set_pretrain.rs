// ============================================================
// Layer 5 — Masked Set Pretraining (SetBERT pretrain model)
// ============================================================
// Self-supervised objective for the set aggregator:
//
//   raw reads [b, S, L] ── frozen encoder ──▶ embeddings [b, S, D]
//       │                                       (detached targets)
//       ▼
//   per set: m = min(floor(mask_ratio · max_set_len), occupied)
//   positions drawn uniformly without replacement
//       │
//       ▼
//   masked slots ← learned mask embedding
//       │
//       ▼
//   SetAggregator → drop class token → gather masked slots
//       │
//       ▼
//   sorted MSE(predictions, original embeddings)
//
// Masked slots carry no identity, so the loss compares the two
// sets after sorting (see losses::sorted_mse). Sets that mask
// fewer slots than the batch maximum leave the tail of their
// [b, M, D] block unused; those slots are excluded from the loss.

use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
    tensor::TensorData,
};
use rand::{seq::index, Rng};
use std::collections::BTreeSet;

use crate::error::{ensure, DeepDnaError, Result};
use crate::ml::losses::sorted_mse;
use crate::ml::set_aggregator::{set_padding_mask, SetAggregator, SetAggregatorConfig};
use crate::ml::token_encoder::split_class_token;

#[derive(Config, Debug)]
pub struct SetPretrainerConfig {
    pub base: SetAggregatorConfig,
    #[config(default = 0.15)]
    pub mask_ratio: f64,
}

impl SetPretrainerConfig {
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        ensure((0.0..=1.0).contains(&self.mask_ratio), || {
            format!("mask_ratio must be in [0, 1], got {}", self.mask_ratio)
        })
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SetMaskedPretrainer<B>> {
        self.validate()?;
        self.wrap(self.base.init(device)?, device)
    }

    /// Build around an existing aggregator (e.g. one wrapping a
    /// pretrained sequence encoder).
    pub fn wrap<B: Backend>(&self, base: SetAggregator<B>, device: &B::Device) -> Result<SetMaskedPretrainer<B>> {
        self.validate()?;
        let mask_token: Param<Tensor<B, 3>> =
            Initializer::Normal { mean: 0.0, std: 0.02 }.init([1, 1, self.base.embed_dim], device);
        Ok(SetMaskedPretrainer {
            base,
            mask_token,
            mask_ratio: self.mask_ratio,
        })
    }
}

#[derive(Debug)]
pub struct SetPretrainOutput<B: Backend> {
    /// Aggregator outputs at the masked slots: [batch, M, D]
    pub predictions: Tensor<B, 3>,
    /// Original embeddings at the masked slots: [batch, M, D]
    pub targets: Tensor<B, 3>,
    /// Masked slots per set (M is the maximum)
    pub num_masked: Vec<usize>,
    /// Frozen sequence embeddings, when computed from raw reads
    pub embeddings: Option<Tensor<B, 3>>,
    /// None when nothing was masked
    pub loss: Option<Tensor<B, 1>>,
}

#[derive(Module, Debug)]
pub struct SetMaskedPretrainer<B: Backend> {
    pub base: SetAggregator<B>,
    pub mask_token: Param<Tensor<B, 3>>,
    pub mask_ratio: f64,
}

impl<B: Backend> SetMaskedPretrainer<B> {
    /// Masked slots per set for the given occupied lengths.
    pub fn mask_counts(&self, lengths: &[usize]) -> Vec<usize> {
        let target = (self.mask_ratio * self.base.max_set_len as f64).floor() as usize;
        lengths.iter().map(|&len| target.min(len)).collect()
    }

    /// Draw the masked slot positions of every set.
    pub fn sample_positions<R: Rng>(&self, lengths: &[usize], rng: &mut R) -> Vec<Vec<usize>> {
        lengths
            .iter()
            .zip(self.mask_counts(lengths))
            .map(|(&len, count)| index::sample(rng, len, count).into_vec())
            .collect()
    }

    /// Forward pass over precomputed sequence embeddings [batch, S, D].
    /// `lengths` gives each set's occupied slots (all S when None).
    pub fn forward_embeddings<R: Rng>(
        &self,
        embeddings: Tensor<B, 3>,
        lengths: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<SetPretrainOutput<B>> {
        let [batch, slots, _] = embeddings.dims();
        let lengths = match lengths {
            Some(lengths) if lengths.len() != batch => {
                return Err(DeepDnaError::dimension_mismatch("set lengths per batch", batch, lengths.len()));
            }
            Some(lengths) => lengths.to_vec(),
            None => vec![slots; batch],
        };
        let positions = self.sample_positions(&lengths, rng);
        self.forward_positions(embeddings, &lengths, &positions)
    }

    /// Forward pass with explicit masked positions per set.
    pub fn forward_positions(
        &self,
        embeddings: Tensor<B, 3>,
        lengths: &[usize],
        positions: &[Vec<usize>],
    ) -> Result<SetPretrainOutput<B>> {
        let [batch, slots, dim] = embeddings.dims();
        if positions.len() != batch {
            return Err(DeepDnaError::dimension_mismatch("masked positions per batch", batch, positions.len()));
        }
        if lengths.len() != batch {
            return Err(DeepDnaError::dimension_mismatch("set lengths per batch", batch, lengths.len()));
        }
        // positions must be distinct real members of their set
        for (picked, &len) in positions.iter().zip(lengths) {
            let len = len.min(slots);
            if let Some(&bad) = picked.iter().find(|&&pos| pos >= len) {
                return Err(DeepDnaError::dimension_mismatch("masked slot position", len, bad));
            }
            let distinct = picked.iter().collect::<BTreeSet<_>>().len();
            if distinct != picked.len() {
                return Err(DeepDnaError::dimension_mismatch("distinct masked positions", distinct, picked.len()));
            }
        }
        let device = embeddings.device();
        let embeddings = embeddings.detach();
        let num_masked: Vec<usize> = positions.iter().map(Vec::len).collect();
        let widest = num_masked.iter().copied().max().unwrap_or(0);

        // slot mask [b, S] plus padded gather indices and validity [b, M]
        let mut slot_mask = vec![false; batch * slots];
        let mut gather = Vec::with_capacity(batch * widest);
        let mut valid = Vec::with_capacity(batch * widest);
        for (row, picked) in positions.iter().enumerate() {
            for &pos in picked {
                slot_mask[row * slots + pos] = true;
            }
            for m in 0..widest {
                gather.push(picked.get(m).copied().unwrap_or(0) as i64);
                valid.push(m < picked.len());
            }
        }

        let slot_mask = Tensor::<B, 2, Bool>::from_data(TensorData::new(slot_mask, [batch, slots]), &device)
            .unsqueeze_dim::<3>(2)
            .expand([batch, slots, dim]);
        let masked_input = embeddings
            .clone()
            .mask_where(slot_mask, self.mask_token.val().expand([batch, slots, dim]));

        let pad_mask = set_padding_mask(lengths, slots, &device)?;
        let (_, items) = split_class_token(self.base.forward(masked_input, Some(pad_mask))?);

        if widest == 0 {
            tracing::debug!("No set slots masked in this batch; skipping reconstruction loss");
            return Ok(SetPretrainOutput {
                predictions: Tensor::zeros([batch, 0, dim], &device),
                targets: Tensor::zeros([batch, 0, dim], &device),
                num_masked,
                embeddings: None,
                loss: None,
            });
        }

        let gather = Tensor::<B, 2, Int>::from_data(TensorData::new(gather, [batch, widest]), &device)
            .unsqueeze_dim::<3>(2)
            .expand([batch, widest, dim]);
        let valid = Tensor::<B, 2, Bool>::from_data(TensorData::new(valid, [batch, widest]), &device);

        let predictions = items.gather(1, gather.clone());
        let targets = embeddings.gather(1, gather);
        let loss = sorted_mse(predictions.clone(), targets.clone(), Some(valid));

        Ok(SetPretrainOutput {
            predictions,
            targets,
            num_masked,
            embeddings: None,
            loss: Some(loss),
        })
    }

    /// Embed raw reads [batch, S, L] with the frozen encoder and run
    /// the masked objective over them.
    pub fn forward<R: Rng>(
        &self,
        tokens: Tensor<B, 3, Int>,
        lengths: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<SetPretrainOutput<B>> {
        let embeddings = self.base.embed_sequences(tokens, None)?;
        let output = self.forward_embeddings(embeddings.clone(), lengths, rng)?;
        Ok(SetPretrainOutput { embeddings: Some(embeddings), ..output })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::set_aggregator::tests::set_config;
    use crate::ml::token_encoder::tests::{raw_tokens, TestBackend};
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_mask_counts_are_clamped_to_occupied_slots() {
        let device = Default::default();
        // floor(0.6 · 5) = 3
        let model = SetPretrainerConfig::new(set_config(None))
            .with_mask_ratio(0.6)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.mask_counts(&[5, 4, 2, 0]), vec![3, 3, 2, 0]);

        let mut rng = StdRng::seed_from_u64(5);
        for (picked, len) in model.sample_positions(&[5, 2], &mut rng).iter().zip([5, 2]) {
            let mut sorted = picked.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), picked.len(), "sampled without replacement");
            assert!(picked.iter().all(|&p| p < len));
        }
    }

    #[test]
    fn test_forward_gathers_masked_slots() {
        let device = Default::default();
        let model = SetPretrainerConfig::new(set_config(Some(2)))
            .with_mask_ratio(0.4)
            .init::<TestBackend>(&device)
            .unwrap();
        let tokens: Tensor<TestBackend, 3, Int> = raw_tokens::<TestBackend>(10, 10, 64, &device).reshape([2, 5, 10]);
        let mut rng = StdRng::seed_from_u64(9);

        let out = model.forward(tokens, Some(&[5, 1]), &mut rng).unwrap();
        assert_eq!(out.num_masked, vec![2, 1]);
        assert_eq!(out.predictions.dims(), [2, 2, 8]);
        assert_eq!(out.targets.dims(), [2, 2, 8]);
        assert_eq!(out.embeddings.as_ref().map(|e| e.dims()), Some([2, 5, 8]));
        let loss = out.loss.expect("masked slots produce a loss").into_scalar().elem::<f64>();
        assert!(loss.is_finite() && loss >= 0.0);
    }

    #[test]
    fn test_targets_are_original_embeddings() {
        let device = Default::default();
        let model = SetPretrainerConfig::new(set_config(None))
            .with_mask_ratio(0.4)
            .init::<TestBackend>(&device)
            .unwrap();
        let embeddings = Tensor::<TestBackend, 3>::random([1, 5, 8], Distribution::Default, &device);
        let out = model
            .forward_positions(embeddings.clone(), &[5], &[vec![3, 1]])
            .unwrap();

        let expected: Vec<f32> = embeddings
            .select(1, Tensor::from_data(TensorData::new(vec![3i64, 1], [2]), &device))
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();
        let got: Vec<f32> = out.targets.into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_zero_mask_ratio_masks_nothing_and_skips_loss() {
        let device = Default::default();
        let model = SetPretrainerConfig::new(set_config(None))
            .with_mask_ratio(0.0)
            .init::<TestBackend>(&device)
            .unwrap();
        let embeddings = Tensor::<TestBackend, 3>::random([2, 5, 8], Distribution::Default, &device);
        let mut rng = StdRng::seed_from_u64(1);
        let out = model.forward_embeddings(embeddings, None, &mut rng).unwrap();
        assert_eq!(out.num_masked, vec![0, 0]);
        assert!(out.loss.is_none());
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let device = Default::default();
        let model = SetPretrainerConfig::new(set_config(None)).init::<TestBackend>(&device).unwrap();
        let embeddings = Tensor::<TestBackend, 3>::random([2, 5, 8], Distribution::Default, &device);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(model.forward_embeddings(embeddings.clone(), Some(&[5]), &mut rng).is_err());
        assert!(model.forward_embeddings(embeddings, Some(&[5, 6]), &mut rng).is_err());
    }

    #[test]
    fn test_padded_or_repeated_positions_are_rejected() {
        let device = Default::default();
        let model = SetPretrainerConfig::new(set_config(None))
            .with_mask_ratio(0.4)
            .init::<TestBackend>(&device)
            .unwrap();
        let embeddings = Tensor::<TestBackend, 3>::random([2, 5, 8], Distribution::Default, &device);

        // slot 3 of a two-member set is padding
        let padded = model.forward_positions(embeddings.clone(), &[5, 2], &[vec![0], vec![3]]);
        assert!(matches!(padded, Err(DeepDnaError::DimensionMismatch { expected: 2, actual: 3, .. })));

        let repeated = model.forward_positions(embeddings.clone(), &[5, 2], &[vec![1, 1], vec![0]]);
        assert!(matches!(repeated, Err(DeepDnaError::DimensionMismatch { expected: 1, actual: 2, .. })));

        let out = model.forward_positions(embeddings, &[5, 2], &[vec![4, 1], vec![1]]).unwrap();
        assert_eq!(out.num_masked, vec![2, 1]);
    }

    #[test]
    fn test_gradients_skip_the_frozen_encoder() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let model = SetPretrainerConfig::new(set_config(None))
            .with_mask_ratio(0.4)
            .init::<AutodiffBackend>(&device)
            .unwrap();
        let tokens: Tensor<AutodiffBackend, 3, Int> =
            raw_tokens::<AutodiffBackend>(10, 10, 64, &device).reshape([2, 5, 10]);
        let mut rng = StdRng::seed_from_u64(21);

        let loss = model.forward(tokens, None, &mut rng).unwrap().loss.unwrap();
        let grads = loss.backward();

        let encoder = &model.base.sequence_encoder.base;
        assert!(encoder.class_token.val().grad(&grads).is_none());
        assert!(encoder.token_embedding.weight.val().grad(&grads).is_none());
        assert!(model.base.class_token.val().grad(&grads).is_some());
        assert!(model.mask_token.val().grad(&grads).is_some());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let cfg = SetPretrainerConfig::new(set_config(Some(4))).with_mask_ratio(0.25);
        let back: SetPretrainerConfig = serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(back.mask_ratio, 0.25);
        assert_eq!(back.base.num_induce, Some(4));
        assert_eq!(back.base.sequence_encoder.base.kmer, 3);
    }
}
