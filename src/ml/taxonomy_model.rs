// ============================================================
// Layer 5 — Taxonomy Models
// ============================================================
// End-to-end classifiers built from the encoders above:
//
//   SequenceTaxonomyModel: raw read [N, L]
//       → SequenceEncoder (fine-tuned, not frozen) → [N, D]
//       → HierarchicalClassifier
//
//   SetTaxonomyModel: raw reads [b, S, L]
//       → SetAggregator (frozen sequence encoder inside) → set class token [b, D]
//       → HierarchicalClassifier

use burn::prelude::*;

use crate::error::{DeepDnaError, Result};
use crate::ml::sequence_encoder::{SequenceEncoder, SequenceEncoderConfig};
use crate::ml::set_aggregator::{set_padding_mask, SetAggregator, SetAggregatorConfig};
use crate::ml::taxonomy_head::{HierarchicalClassifier, HierarchicalClassifierConfig, HierarchyOutput};
use crate::ml::token_encoder::split_class_token;

fn check_embed_dims(context: &str, encoder: usize, classifier: usize) -> Result<()> {
    if encoder != classifier {
        return Err(DeepDnaError::dimension_mismatch(context, encoder, classifier));
    }
    Ok(())
}

// ─── Sequence-level ───────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct SequenceTaxonomyConfig {
    pub encoder: SequenceEncoderConfig,
    pub classifier: HierarchicalClassifierConfig,
}

impl SequenceTaxonomyConfig {
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.classifier.validate()?;
        check_embed_dims(
            "classifier embed_dim vs sequence encoder",
            self.encoder.base.embed_dim,
            self.classifier.embed_dim,
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SequenceTaxonomyModel<B>> {
        self.validate()?;
        self.wrap(self.encoder.init(device)?, device)
    }

    /// Build around a pretrained sequence encoder, which stays trainable.
    pub fn wrap<B: Backend>(&self, encoder: SequenceEncoder<B>, device: &B::Device) -> Result<SequenceTaxonomyModel<B>> {
        self.validate()?;
        check_embed_dims("wrapped sequence encoder embed_dim", self.classifier.embed_dim, encoder.embed_dim())?;
        Ok(SequenceTaxonomyModel { encoder, classifier: self.classifier.init(device)? })
    }
}

#[derive(Module, Debug)]
pub struct SequenceTaxonomyModel<B: Backend> {
    pub encoder: SequenceEncoder<B>,
    pub classifier: HierarchicalClassifier<B>,
}

impl<B: Backend> SequenceTaxonomyModel<B> {
    /// Raw ids [N, L] → per-rank distributions.
    pub fn forward(&self, raw_tokens: Tensor<B, 2, Int>) -> Result<HierarchyOutput<B>> {
        self.classifier.forward(self.encoder.forward(raw_tokens)?)
    }
}

// ─── Set-level ────────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct SetTaxonomyConfig {
    pub aggregator: SetAggregatorConfig,
    pub classifier: HierarchicalClassifierConfig,
}

impl SetTaxonomyConfig {
    pub fn validate(&self) -> Result<()> {
        self.aggregator.validate()?;
        self.classifier.validate()?;
        check_embed_dims(
            "classifier embed_dim vs set aggregator",
            self.aggregator.embed_dim,
            self.classifier.embed_dim,
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SetTaxonomyModel<B>> {
        self.validate()?;
        self.wrap(self.aggregator.init(device)?, device)
    }

    pub fn wrap<B: Backend>(&self, aggregator: SetAggregator<B>, device: &B::Device) -> Result<SetTaxonomyModel<B>> {
        self.validate()?;
        check_embed_dims("wrapped set aggregator embed_dim", self.classifier.embed_dim, aggregator.embed_dim)?;
        Ok(SetTaxonomyModel { aggregator, classifier: self.classifier.init(device)? })
    }
}

#[derive(Module, Debug)]
pub struct SetTaxonomyModel<B: Backend> {
    pub aggregator: SetAggregator<B>,
    pub classifier: HierarchicalClassifier<B>,
}

impl<B: Backend> SetTaxonomyModel<B> {
    /// Raw reads [b, S, L] with occupied `lengths` → per-rank
    /// distributions for each set.
    pub fn forward(&self, tokens: Tensor<B, 3, Int>, lengths: Option<&[usize]>) -> Result<HierarchyOutput<B>> {
        let set_embeddings = self.aggregator.encode_sets(tokens, lengths, None)?;
        self.classifier.forward(set_embeddings)
    }

    /// Classify sets from precomputed sequence embeddings [b, S, D].
    pub fn forward_embeddings(
        &self,
        embeddings: Tensor<B, 3>,
        lengths: Option<&[usize]>,
    ) -> Result<HierarchyOutput<B>> {
        let [_, slots, _] = embeddings.dims();
        let pad_mask = lengths
            .map(|lengths| set_padding_mask(lengths, slots, &embeddings.device()))
            .transpose()?;
        let (class_token, _) = split_class_token(self.aggregator.forward(embeddings, pad_mask)?);
        self.classifier.forward(class_token)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::Freezable;
    use crate::ml::set_aggregator::tests::set_config;
    use crate::ml::taxonomy_head::tests::hierarchy;
    use crate::ml::token_encoder::tests::{raw_tokens, small_config, TestBackend};

    #[test]
    fn test_sequence_model_outputs_every_rank() {
        let device = Default::default();
        let cfg = SequenceTaxonomyConfig::new(
            SequenceEncoderConfig::new(small_config()),
            HierarchicalClassifierConfig::new(8, 3, hierarchy()).with_use_top_down_hierarchy(true),
        );
        let model = cfg.init::<TestBackend>(&device).unwrap();
        assert!(model.encoder.is_trainable());

        let out = model.forward(raw_tokens::<TestBackend>(4, 10, 64, &device)).unwrap();
        assert_eq!(out.ranks.iter().map(|p| p.dims()).collect::<Vec<_>>(), vec![[4, 2], [4, 3], [4, 5]]);
    }

    #[test]
    fn test_set_model_classifies_each_set() {
        let device = Default::default();
        let cfg = SetTaxonomyConfig::new(set_config(Some(2)), HierarchicalClassifierConfig::new(8, 3, hierarchy()));
        let model = cfg.init::<TestBackend>(&device).unwrap();
        assert!(!model.aggregator.sequence_encoder.is_trainable());

        let tokens: Tensor<TestBackend, 3, Int> = raw_tokens::<TestBackend>(10, 10, 64, &device).reshape([2, 5, 10]);
        let out = model.forward(tokens, Some(&[5, 2])).unwrap();
        assert_eq!(out.ranks[2].dims(), [2, 5]);
    }

    #[test]
    fn test_classifier_width_must_match_encoder() {
        let device = Default::default();
        let cfg = SequenceTaxonomyConfig::new(
            SequenceEncoderConfig::new(small_config()),
            HierarchicalClassifierConfig::new(16, 3, hierarchy()),
        );
        assert!(matches!(cfg.init::<TestBackend>(&device), Err(DeepDnaError::DimensionMismatch { .. })));
    }
}
