// ============================================================
// Layer 5 — Set Aggregator (SetBERT base)
// ============================================================
// Contextualises a set of sequence embeddings and summarises it
// in a learned set class token.
//
//   raw reads [batch, S, L]
//       │  frozen SequenceEncoder (outputs detached)
//       ▼
//   embeddings [batch, S, D]
//       │  prepend set class token
//       ▼
//   [batch, 1+S, D] ── stack × (SAB | ISAB) ── final LayerNorm
//       │
//       ▼
//   [batch, 1+S, D]   (position 0 = set class token)
//
// The aggregator owns the upstream SequenceEncoder and freezes it
// on construction: its parameters stop requiring gradients and
// its embeddings are detached, so training the set model never
// updates (or even differentiates through) the token model.
//
// Padding: each set may occupy fewer than max_set_len slots.
// Unoccupied slots are excluded as attention keys; the class slot
// never is.

use burn::{
    module::Param,
    nn::{Initializer, LayerNorm, LayerNormConfig},
    prelude::*,
    tensor::TensorData,
};

use crate::domain::traits::Freezable;
use crate::error::{ensure, DeepDnaError, Result};
use crate::ml::sequence_encoder::{SequenceEncoder, SequenceEncoderConfig};
use crate::ml::set_attention::{SetAttentionBlock, SetAttentionConfig};
use crate::ml::token_encoder::split_class_token;

#[derive(Config, Debug)]
pub struct SetAggregatorConfig {
    pub sequence_encoder: SequenceEncoderConfig,
    pub embed_dim: usize,
    pub max_set_len: usize,
    pub stack: usize,
    pub num_heads: usize,
    /// Inducing points per block; None uses full self-attention
    pub num_induce: Option<usize>,
    #[config(default = true)]
    pub pre_layernorm: bool,
}

impl SetAggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        self.sequence_encoder.validate()?;
        let upstream = self.sequence_encoder.base.embed_dim;
        if upstream != self.embed_dim {
            return Err(DeepDnaError::dimension_mismatch(
                "set aggregator embed_dim vs sequence encoder",
                upstream,
                self.embed_dim,
            ));
        }
        ensure(self.max_set_len >= 1, || "max_set_len must be at least 1".into())?;
        ensure(self.stack >= 1, || "stack must be at least 1".into())?;
        ensure(self.num_heads >= 1 && self.embed_dim % self.num_heads == 0, || {
            format!("embed_dim ({}) must be a multiple of num_heads ({})", self.embed_dim, self.num_heads)
        })?;
        ensure(self.num_induce != Some(0), || "num_induce must be at least 1 when set".into())?;
        Ok(())
    }

    /// Build with a freshly initialised (and frozen) sequence encoder.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SetAggregator<B>> {
        self.validate()?;
        let encoder = self.sequence_encoder.init(device)?;
        self.wrap(encoder, device)
    }

    /// Build around a trained sequence encoder, freezing it.
    pub fn wrap<B: Backend>(&self, encoder: SequenceEncoder<B>, device: &B::Device) -> Result<SetAggregator<B>> {
        self.validate()?;
        if encoder.embed_dim() != self.embed_dim {
            return Err(DeepDnaError::dimension_mismatch(
                "wrapped sequence encoder embed_dim",
                self.embed_dim,
                encoder.embed_dim(),
            ));
        }

        let block = SetAttentionConfig::new(self.embed_dim, self.num_heads)
            .with_num_induce(self.num_induce)
            .with_pre_layernorm(self.pre_layernorm);
        let blocks = (0..self.stack).map(|_| block.init(device)).collect();
        let class_token: Param<Tensor<B, 3>> =
            Initializer::Normal { mean: 0.0, std: 0.02 }.init([1, 1, self.embed_dim], device);

        tracing::debug!(
            "SetAggregator: max_set_len={}, stack={}, num_induce={:?}",
            self.max_set_len,
            self.stack,
            self.num_induce
        );
        Ok(SetAggregator {
            sequence_encoder: encoder.freeze(),
            class_token,
            blocks,
            final_norm: self.pre_layernorm.then(|| LayerNormConfig::new(self.embed_dim).init(device)),
            embed_dim: self.embed_dim,
            max_set_len: self.max_set_len,
        })
    }
}

/// Padding mask for sets with the given occupied lengths:
/// [batch, slots], true = unoccupied slot.
pub fn set_padding_mask<B: Backend>(lengths: &[usize], slots: usize, device: &B::Device) -> Result<Tensor<B, 2, Bool>> {
    if let Some(&len) = lengths.iter().find(|&&len| len > slots) {
        return Err(DeepDnaError::dimension_mismatch("set occupied length", slots, len));
    }
    let mask: Vec<bool> = lengths
        .iter()
        .flat_map(|&len| (0..slots).map(move |slot| slot >= len))
        .collect();
    Ok(Tensor::from_data(TensorData::new(mask, [lengths.len(), slots]), device))
}

#[derive(Module, Debug)]
pub struct SetAggregator<B: Backend> {
    pub sequence_encoder: SequenceEncoder<B>,
    pub class_token: Param<Tensor<B, 3>>,
    pub blocks: Vec<SetAttentionBlock<B>>,
    pub final_norm: Option<LayerNorm<B>>,
    pub embed_dim: usize,
    pub max_set_len: usize,
}

impl<B: Backend> SetAggregator<B> {
    /// embeddings: [batch, S, D] with S ≤ max_set_len,
    /// pad_mask: [batch, S] (true = unoccupied) → [batch, 1+S, D]
    pub fn forward(&self, embeddings: Tensor<B, 3>, pad_mask: Option<Tensor<B, 2, Bool>>) -> Result<Tensor<B, 3>> {
        let [batch, slots, dim] = embeddings.dims();
        if batch == 0 {
            return Err(DeepDnaError::EmptyBatch("set aggregator received no sets".into()));
        }
        if dim != self.embed_dim {
            return Err(DeepDnaError::dimension_mismatch("set item embed_dim", self.embed_dim, dim));
        }
        if slots > self.max_set_len {
            return Err(DeepDnaError::dimension_mismatch("set size", self.max_set_len, slots));
        }
        let device = embeddings.device();

        let pad_mask = match pad_mask {
            Some(mask) => {
                if mask.dims() != [batch, slots] {
                    return Err(DeepDnaError::dimension_mismatch("set padding mask slots", slots, mask.dims()[1]));
                }
                // the class slot is always attendable
                let class_slot = Tensor::<B, 2, Int>::zeros([batch, 1], &device).equal_elem(1);
                Some(Tensor::cat(vec![class_slot, mask], 1))
            }
            None => None,
        };

        let class_token = self.class_token.val().expand([batch, 1, dim]);
        let mut x = Tensor::cat(vec![class_token, embeddings], 1);
        for block in &self.blocks {
            x = block.forward(x, pad_mask.clone());
        }
        Ok(match &self.final_norm {
            Some(norm) => norm.forward(x),
            None => x,
        })
    }

    /// Embed raw reads [batch, S, L] with the frozen encoder, then
    /// aggregate. `lengths` gives each set's occupied slot count.
    pub fn forward_sequences(
        &self,
        tokens: Tensor<B, 3, Int>,
        lengths: Option<&[usize]>,
        chunk_size: Option<usize>,
    ) -> Result<Tensor<B, 3>> {
        let embeddings = self.embed_sequences(tokens, chunk_size)?;
        let [_, slots, _] = embeddings.dims();
        let pad_mask = lengths
            .map(|lengths| set_padding_mask(lengths, slots, &embeddings.device()))
            .transpose()?;
        self.forward(embeddings, pad_mask)
    }

    /// Frozen sequence embeddings for raw reads [batch, S, L].
    pub fn embed_sequences(&self, tokens: Tensor<B, 3, Int>, chunk_size: Option<usize>) -> Result<Tensor<B, 3>> {
        Ok(self.sequence_encoder.encode(tokens, chunk_size)?.detach())
    }

    /// Set-level embedding: the class-token output, [batch, D].
    pub fn encode_sets(
        &self,
        tokens: Tensor<B, 3, Int>,
        lengths: Option<&[usize]>,
        chunk_size: Option<usize>,
    ) -> Result<Tensor<B, 2>> {
        let (class_token, _) = split_class_token(self.forward_sequences(tokens, lengths, chunk_size)?);
        Ok(class_token)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::token_encoder::tests::{raw_tokens, small_config, TestBackend};
    use burn::tensor::Distribution;

    pub(crate) fn set_config(num_induce: Option<usize>) -> SetAggregatorConfig {
        SetAggregatorConfig::new(SequenceEncoderConfig::new(small_config()), 8, 5, 2, 2).with_num_induce(num_induce)
    }

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec().unwrap()
    }

    fn assert_close<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) {
        for (x, y) in values(a).iter().zip(values(b)) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
    }

    fn check_equivariance(num_induce: Option<usize>) {
        let device = Default::default();
        let model = set_config(num_induce).init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 3>::random([2, 5, 8], Distribution::Default, &device);
        let perm = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![3i64, 0, 4, 1, 2], [5]), &device);

        let (class, items) = split_class_token(model.forward(x.clone(), None).unwrap());
        let (class_p, items_p) = split_class_token(model.forward(x.select(1, perm.clone()), None).unwrap());

        assert_close(class, class_p);
        assert_close(items.select(1, perm), items_p);
    }

    #[test]
    fn test_sab_is_permutation_equivariant() {
        check_equivariance(None);
    }

    #[test]
    fn test_isab_is_permutation_equivariant() {
        check_equivariance(Some(3));
    }

    #[test]
    fn test_output_shape_and_sequence_path() {
        let device = Default::default();
        let model = set_config(None).init::<TestBackend>(&device).unwrap();
        let tokens: Tensor<TestBackend, 3, Int> = raw_tokens::<TestBackend>(10, 10, 64, &device).reshape([2, 5, 10]);

        let out = model.forward_sequences(tokens.clone(), Some(&[5, 3]), Some(4)).unwrap();
        assert_eq!(out.dims(), [2, 6, 8]);
        assert_eq!(model.encode_sets(tokens, None, None).unwrap().dims(), [2, 8]);
    }

    #[test]
    fn test_padding_slots_do_not_affect_class_token() {
        let device = Default::default();
        let model = set_config(Some(2)).init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 3>::random([1, 5, 8], Distribution::Default, &device);
        let noise = Tensor::<TestBackend, 3>::random([1, 2, 8], Distribution::Default, &device);
        let x_alt = x.clone().slice_assign([0..1, 3..5, 0..8], noise);

        let mask = set_padding_mask::<TestBackend>(&[3], 5, &device).unwrap();
        let (a, _) = split_class_token(model.forward(x, Some(mask.clone())).unwrap());
        let (b, _) = split_class_token(model.forward(x_alt, Some(mask)).unwrap());
        assert_close(a, b);
    }

    #[test]
    fn test_upstream_encoder_is_frozen() {
        let device = Default::default();
        let model = set_config(None).init::<TestBackend>(&device).unwrap();
        assert!(!model.sequence_encoder.is_trainable());
    }

    #[test]
    fn test_embed_dim_mismatch_fails_at_construction() {
        let device = Default::default();
        let cfg = SetAggregatorConfig::new(SequenceEncoderConfig::new(small_config()), 16, 5, 1, 2);
        assert!(matches!(cfg.init::<TestBackend>(&device), Err(DeepDnaError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_oversized_sets_are_rejected() {
        let device = Default::default();
        let model = set_config(None).init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 3>::random([1, 6, 8], Distribution::Default, &device);
        assert!(model.forward(x, None).is_err());
        assert!(set_padding_mask::<TestBackend>(&[6], 5, &device).is_err());
    }

    #[test]
    fn test_zero_inducing_points_are_rejected() {
        let device = Default::default();
        assert!(set_config(Some(0)).init::<TestBackend>(&device).is_err());
    }
}
