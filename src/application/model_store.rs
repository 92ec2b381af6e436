// ============================================================
// Layer 2 — Model Store
// ============================================================
// Rebuilds trained components from checkpoint directories so a
// later stage can start from an earlier one:
//
//   DNABERT pretraining dir ──▶ TokenEncoder  ──▶ SetBERT / taxonomy
//   SetBERT pretraining dir ──▶ SetAggregator ──▶ set taxonomy
//
// Every loader reads model_config.json, builds the module from
// it, loads the latest weights and then extracts the part that
// is wanted.

use anyhow::{bail, Context, Result};
use burn::prelude::*;
use std::path::Path;

use crate::domain::traits::Freezable;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    models::ModelConfig,
    set_aggregator::{SetAggregator, SetAggregatorConfig},
    taxonomy_model::{SequenceTaxonomyModel, SetTaxonomyModel},
    token_encoder::{TokenEncoder, TokenEncoderConfig},
};

/// Load the token encoder of any checkpoint that contains one.
pub fn load_token_encoder<B: Backend>(
    dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(TokenEncoderConfig, TokenEncoder<B>)> {
    let ckpt = CheckpointManager::open(dir)?;
    let config = ckpt.load_config()?;
    tracing::info!("Restoring token encoder from a {} checkpoint", config.name());

    let encoder = match &config {
        ModelConfig::TokenEncoder(c) => ckpt.load_model(c.init::<B>(device)?, device)?,
        ModelConfig::TokenPretrainer(c) => ckpt.load_model(c.init::<B>(device)?, device)?.base,
        ModelConfig::SequenceEncoder(c) => ckpt.load_model(c.init::<B>(device)?, device)?.base,
        ModelConfig::SequenceTaxonomy(c) => ckpt.load_model(c.init::<B>(device)?, device)?.encoder.base,
        other => bail!("a {} checkpoint does not hold a trainable token encoder", other.name()),
    };
    Ok((config.token_encoder().clone(), encoder))
}

/// Load the set aggregator of a SetBERT checkpoint; its sequence
/// encoder comes back frozen.
pub fn load_set_aggregator<B: Backend>(
    dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(SetAggregatorConfig, SetAggregator<B>)> {
    let ckpt = CheckpointManager::open(dir)?;
    let config = ckpt.load_config()?;
    tracing::info!("Restoring set aggregator from a {} checkpoint", config.name());

    let (set_config, mut aggregator) = match config {
        ModelConfig::SetAggregator(c) => {
            let model = ckpt.load_model(c.init::<B>(device)?, device)?;
            (c, model)
        }
        ModelConfig::SetPretrainer(c) => {
            let model = ckpt.load_model(c.init::<B>(device)?, device)?.base;
            (c.base, model)
        }
        ModelConfig::SetTaxonomy(c) => {
            let model = ckpt.load_model(c.init::<B>(device)?, device)?.aggregator;
            (c.aggregator, model)
        }
        other => bail!("a {} checkpoint does not hold a set aggregator", other.name()),
    };
    aggregator.sequence_encoder = aggregator.sequence_encoder.freeze();
    Ok((set_config, aggregator))
}

/// A trained taxonomy classifier of either level.
pub enum TaxonomyModel<B: Backend> {
    Sequence(SequenceTaxonomyModel<B>),
    Set(SetTaxonomyModel<B>),
}

/// Load a taxonomy checkpoint together with its config.
pub fn load_taxonomy_model<B: Backend>(
    dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(ModelConfig, TaxonomyModel<B>)> {
    let dir = dir.as_ref();
    let ckpt = CheckpointManager::open(dir)?;
    let config = ckpt.load_config()?;
    let model = match &config {
        ModelConfig::SequenceTaxonomy(c) => TaxonomyModel::Sequence(ckpt.load_model(c.init::<B>(device)?, device)?),
        ModelConfig::SetTaxonomy(c) => TaxonomyModel::Set(ckpt.load_model(c.init::<B>(device)?, device)?),
        other => bail!("'{}' holds a {} model, not a taxonomy model", dir.display(), other.name()),
    };
    Ok((config, model))
}

/// Read back a checkpoint's config only.
pub fn load_model_config(dir: impl AsRef<Path>) -> Result<ModelConfig> {
    let dir = dir.as_ref();
    CheckpointManager::open(dir)?
        .load_config()
        .with_context(|| format!("'{}' is not a model checkpoint", dir.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::set_aggregator::tests::set_config;
    use crate::ml::set_pretrain::SetPretrainerConfig;
    use crate::ml::token_encoder::tests::{small_config, TestBackend};
    use crate::ml::token_pretrain::TokenPretrainerConfig;
    use std::{fs, path::PathBuf};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("deepdna-store-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_token_encoder_comes_out_of_a_pretraining_checkpoint() {
        let dir = scratch_dir("token");
        let device = Default::default();
        let config = TokenPretrainerConfig::new(small_config());
        let ckpt = CheckpointManager::new(&dir).unwrap();
        ckpt.save_config(&ModelConfig::TokenPretrainer(config.clone())).unwrap();
        ckpt.save_model(&config.init::<TestBackend>(&device).unwrap(), 1).unwrap();

        let (restored_cfg, encoder) = load_token_encoder::<TestBackend>(&dir, &device).unwrap();
        assert_eq!(restored_cfg.kmer, 3);
        assert_eq!(encoder.token_length, 10);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_set_aggregator_is_refrozen() {
        let dir = scratch_dir("set");
        let device = Default::default();
        let config = SetPretrainerConfig::new(set_config(Some(2)));
        let ckpt = CheckpointManager::new(&dir).unwrap();
        ckpt.save_config(&ModelConfig::SetPretrainer(config.clone())).unwrap();
        ckpt.save_model(&config.init::<TestBackend>(&device).unwrap(), 1).unwrap();

        let (set_cfg, aggregator) = load_set_aggregator::<TestBackend>(&dir, &device).unwrap();
        assert_eq!(set_cfg.num_induce, Some(2));
        assert!(!aggregator.sequence_encoder.is_trainable());
        assert!(load_token_encoder::<TestBackend>(&dir, &device).is_err());
        assert!(load_taxonomy_model::<TestBackend>(&dir, &device).is_err());
        fs::remove_dir_all(dir).ok();
    }
}
