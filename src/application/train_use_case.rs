// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs one training stage of the DNABERT → SetBERT → taxonomy
// pipeline. Every stage follows the same steps:
//
//   Step 1: Generate labelled reads   (Layer 4 - data)
//   Step 2: Build the model           (Layer 5 - ml, or Layer 2 model_store
//                                      when starting from a checkpoint)
//   Step 3: Tokenise + split samples  (Layer 4 - data)
//   Step 4: Save configs              (Layer 6 - infra)
//   Step 5: Run the training loop     (Layer 5 - ml)
//
// Stages:
//   pretrain_dnabert  masked k-mer span reconstruction
//   pretrain_setbert  masked set member reconstruction on top of
//                     a frozen DNABERT encoder
//   train_taxonomy    hierarchical classifier on reads or on sets
//
// Reference: Burn Book §5 (Training)

use anyhow::{bail, Result};
use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::application::model_store::{load_model_config, load_set_aggregator, load_token_encoder};
use crate::data::{
    batcher::{SequenceBatcher, SetBatcher},
    dataset::{SampleEncoder, SequenceDataset, SetDataset},
    splitter::split_by_label,
    synthetic::{SyntheticCommunity, SyntheticConfig},
};
use crate::domain::{
    kmer::{KmerTokenizer, BASES},
    taxonomy::TaxonomyHierarchy,
    traits::SequenceSource,
};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::{
    models::ModelConfig,
    set_aggregator::SetAggregatorConfig,
    set_pretrain::SetPretrainerConfig,
    taxonomy_head::{HierarchicalClassifierConfig, RankLossPolicy},
    taxonomy_model::{SequenceTaxonomyConfig, SetTaxonomyConfig},
    token_encoder::TokenEncoderConfig,
    token_pretrain::TokenPretrainerConfig,
    trainer::{TrainOptions, Trainer},
};

pub type MyBackend = Autodiff<Wgpu>;
type MyInnerBackend = Wgpu;

/// File the run settings are saved to inside the checkpoint directory.
pub const TRAIN_CONFIG: &str = "train_config.json";

/// Which unit the taxonomy classifier labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyLevel {
    Sequence,
    Set,
}

/// One stage of the pipeline with its model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    PretrainDnabert {
        model: TokenPretrainerConfig,
    },
    PretrainSetbert {
        /// DNABERT checkpoint to start from; its encoder replaces
        /// the one in `model`
        dnabert_dir: Option<String>,
        model: SetPretrainerConfig,
    },
    TrainTaxonomy {
        level: TaxonomyLevel,
        /// DNABERT or SetBERT checkpoint to start from
        pretrained_dir: Option<String>,
        /// Encoder (and, for sets, aggregator) built when nothing
        /// is restored. Sequence-level runs only use the nested
        /// sequence encoder.
        architecture: SetAggregatorConfig,
        use_top_down_hierarchy: bool,
        loss_policy: RankLossPolicy,
    },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PretrainDnabert { .. } => "DNABERT pretraining",
            Self::PretrainSetbert { .. } => "SetBERT pretraining",
            Self::TrainTaxonomy { level: TaxonomyLevel::Sequence, .. } => "sequence taxonomy training",
            Self::TrainTaxonomy { level: TaxonomyLevel::Set, .. } => "set taxonomy training",
        }
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// Saved as train_config.json next to the checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub checkpoint_dir: String,
    pub data: SyntheticConfig,
    pub train: TrainOptions,
    /// Share of every label group used for training
    pub train_fraction: f64,
    pub stage: Stage,
}

impl TrainConfig {
    /// The settings a previous run saved in `checkpoint_dir`, or
    /// None when that run predates them.
    pub fn load(checkpoint_dir: &str) -> Result<Option<Self>> {
        let ckpt = CheckpointManager::open(checkpoint_dir)?;
        if !ckpt.dir().join(TRAIN_CONFIG).is_file() {
            return Ok(None);
        }
        ckpt.read_json(TRAIN_CONFIG).map(Some)
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Execute the configured stage end to end.
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        if !(cfg.train_fraction > 0.0 && cfg.train_fraction < 1.0) {
            bail!("train_fraction must be in (0, 1), got {}", cfg.train_fraction);
        }

        // ── Step 1: Synthetic community ──────────────────────────────────────
        let community = SyntheticCommunity::new(cfg.data.clone())?;
        tracing::info!(
            "Starting {}: {} genera x {} reads of {} bp",
            cfg.stage.name(),
            cfg.data.num_genera,
            cfg.data.reads_per_genus,
            cfg.data.sequence_length
        );

        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt.write_json(TRAIN_CONFIG, cfg)?;
        let device = WgpuDevice::default();

        match &cfg.stage {
            Stage::PretrainDnabert { model } => self.pretrain_dnabert(model, &community, &ckpt, device),
            Stage::PretrainSetbert { dnabert_dir, model } => {
                self.pretrain_setbert(model, dnabert_dir.as_deref(), &community, &ckpt, device)
            }
            Stage::TrainTaxonomy { level, pretrained_dir, architecture, use_top_down_hierarchy, loss_policy } => {
                let heads = HeadSettings { top_down: *use_top_down_hierarchy, loss_policy: loss_policy.clone() };
                match level {
                    TaxonomyLevel::Sequence => self.train_sequence_taxonomy(
                        architecture,
                        pretrained_dir.as_deref(),
                        heads,
                        &community,
                        &ckpt,
                        device,
                    ),
                    TaxonomyLevel::Set => self.train_set_taxonomy(
                        architecture,
                        pretrained_dir.as_deref(),
                        heads,
                        &community,
                        &ckpt,
                        device,
                    ),
                }
            }
        }
    }

    fn pretrain_dnabert(
        &self,
        model: &TokenPretrainerConfig,
        community: &SyntheticCommunity,
        ckpt: &CheckpointManager,
        device: WgpuDevice,
    ) -> Result<()> {
        let cfg = &self.config;

        // ── Step 2: Model ────────────────────────────────────────────────────
        let pretrainer = model.init::<MyBackend>(&device)?;

        // ── Step 3: Samples ──────────────────────────────────────────────────
        let tokenizer = tokenizer_for(&model.base, &cfg.data)?;
        let encoder = SampleEncoder::new(&tokenizer, model.base.sequence_length);
        let (train_reads, val_reads) = self.split(community.sequences()?, |r| r.label.clone());
        let train_dataset = SequenceDataset::from_reads(&train_reads, &encoder)?;
        let val_dataset = SequenceDataset::from_reads(&val_reads, &encoder)?;

        // ── Step 4: Configs ──────────────────────────────────────────────────
        ckpt.save_config(&ModelConfig::TokenPretrainer(model.clone()))?;
        let metrics = MetricsLogger::new(ckpt.dir(), &["masked_token".to_string()])?;

        // ── Step 5: Training loop ────────────────────────────────────────────
        let trainer = Trainer::<MyBackend>::new(&cfg.train, ckpt, &metrics, device.clone());
        trainer.fit(
            pretrainer,
            SequenceBatcher::<MyBackend>::new(device.clone()),
            SequenceBatcher::<MyInnerBackend>::new(device),
            train_dataset,
            val_dataset,
        )?;
        Ok(())
    }

    fn pretrain_setbert(
        &self,
        model: &SetPretrainerConfig,
        dnabert_dir: Option<&str>,
        community: &SyntheticCommunity,
        ckpt: &CheckpointManager,
        device: WgpuDevice,
    ) -> Result<()> {
        let cfg = &self.config;
        let mut model = model.clone();

        // ── Step 2: Model ────────────────────────────────────────────────────
        let pretrainer = match dnabert_dir {
            Some(dir) => {
                let (token_config, token_encoder) = load_token_encoder::<MyBackend>(dir, &device)?;
                adopt_token_encoder(&mut model.base, token_config);
                let encoder = model.base.sequence_encoder.wrap(token_encoder)?;
                let aggregator = model.base.wrap(encoder, &device)?;
                model.wrap(aggregator, &device)?
            }
            None => {
                tracing::warn!("No DNABERT checkpoint given; the frozen sequence encoder keeps random weights");
                model.init::<MyBackend>(&device)?
            }
        };

        // ── Step 3: Samples ──────────────────────────────────────────────────
        let token_config = &model.base.sequence_encoder.base;
        let tokenizer = tokenizer_for(token_config, &cfg.data)?;
        let encoder = SampleEncoder::new(&tokenizer, token_config.sequence_length);
        let max_set_len = model.base.max_set_len;
        let sets = community.sets(max_set_len)?;
        let (train_sets, val_sets) = self.split(sets, |s| s.label.clone().unwrap_or_default());
        let train_dataset = SetDataset::from_sets(&train_sets, &encoder)?;
        let val_dataset = SetDataset::from_sets(&val_sets, &encoder)?;

        // ── Step 4: Configs ──────────────────────────────────────────────────
        ckpt.save_config(&ModelConfig::SetPretrainer(model.clone()))?;
        let metrics = MetricsLogger::new(ckpt.dir(), &[])?;

        // ── Step 5: Training loop ────────────────────────────────────────────
        let trainer = Trainer::<MyBackend>::new(&cfg.train, ckpt, &metrics, device.clone());
        trainer.fit(
            pretrainer,
            SetBatcher::<MyBackend>::new(device.clone(), max_set_len),
            SetBatcher::<MyInnerBackend>::new(device, max_set_len),
            train_dataset,
            val_dataset,
        )?;
        Ok(())
    }

    fn train_sequence_taxonomy(
        &self,
        architecture: &SetAggregatorConfig,
        pretrained_dir: Option<&str>,
        heads: HeadSettings,
        community: &SyntheticCommunity,
        ckpt: &CheckpointManager,
        device: WgpuDevice,
    ) -> Result<()> {
        let cfg = &self.config;
        let mut encoder_config = architecture.sequence_encoder.clone();
        let reads = community.sequences()?;
        let hierarchy = TaxonomyHierarchy::build(reads.iter().map(|r| r.label.as_str()), cfg.data.depth)?;

        // ── Step 2: Model ────────────────────────────────────────────────────
        let encoder = match pretrained_dir {
            Some(dir) => {
                let (token_config, token_encoder) = load_token_encoder::<MyBackend>(dir, &device)?;
                encoder_config.base = token_config;
                encoder_config.wrap(token_encoder)?
            }
            None => encoder_config.init::<MyBackend>(&device)?,
        };
        let classifier = heads.classifier(encoder_config.base.embed_dim, &hierarchy);
        let model_config = SequenceTaxonomyConfig::new(encoder_config, classifier);
        let model = model_config.wrap(encoder, &device)?;

        // ── Step 3: Samples ──────────────────────────────────────────────────
        let token_config = &model_config.encoder.base;
        let tokenizer = tokenizer_for(token_config, &cfg.data)?;
        let encoder = SampleEncoder::new(&tokenizer, token_config.sequence_length).with_hierarchy(&hierarchy);
        let (train_reads, val_reads) = self.split(reads, |r| r.label.clone());
        let train_dataset = SequenceDataset::from_reads(&train_reads, &encoder)?;
        let val_dataset = SequenceDataset::from_reads(&val_reads, &encoder)?;

        // ── Step 4: Configs ──────────────────────────────────────────────────
        ckpt.save_config(&ModelConfig::SequenceTaxonomy(model_config.clone()))?;
        let metrics = MetricsLogger::new(ckpt.dir(), hierarchy.rank_names())?;

        // ── Step 5: Training loop ────────────────────────────────────────────
        let trainer = Trainer::<MyBackend>::new(&cfg.train, ckpt, &metrics, device.clone());
        trainer.fit(
            model,
            SequenceBatcher::<MyBackend>::new(device.clone()),
            SequenceBatcher::<MyInnerBackend>::new(device),
            train_dataset,
            val_dataset,
        )?;
        Ok(())
    }

    fn train_set_taxonomy(
        &self,
        architecture: &SetAggregatorConfig,
        pretrained_dir: Option<&str>,
        heads: HeadSettings,
        community: &SyntheticCommunity,
        ckpt: &CheckpointManager,
        device: WgpuDevice,
    ) -> Result<()> {
        let cfg = &self.config;
        let mut aggregator_config = architecture.clone();

        // ── Step 2: Model ────────────────────────────────────────────────────
        let restored = match pretrained_dir {
            Some(dir) => Some((dir, load_model_config(dir)?)),
            None => None,
        };
        let aggregator = match restored {
            Some((
                dir,
                ModelConfig::SetAggregator(_) | ModelConfig::SetPretrainer(_) | ModelConfig::SetTaxonomy(_),
            )) => {
                let (set_config, aggregator) = load_set_aggregator::<MyBackend>(dir, &device)?;
                aggregator_config = set_config;
                aggregator
            }
            Some((dir, _)) => {
                let (token_config, token_encoder) = load_token_encoder::<MyBackend>(dir, &device)?;
                adopt_token_encoder(&mut aggregator_config, token_config);
                let encoder = aggregator_config.sequence_encoder.wrap(token_encoder)?;
                aggregator_config.wrap(encoder, &device)?
            }
            None => aggregator_config.init::<MyBackend>(&device)?,
        };

        let max_set_len = aggregator_config.max_set_len;
        let sets = community.sets(max_set_len)?;
        let hierarchy = TaxonomyHierarchy::build(sets.iter().filter_map(|s| s.label.as_deref()), cfg.data.depth)?;
        let classifier = heads.classifier(aggregator_config.embed_dim, &hierarchy);
        let model_config = SetTaxonomyConfig::new(aggregator_config, classifier);
        let model = model_config.wrap(aggregator, &device)?;

        // ── Step 3: Samples ──────────────────────────────────────────────────
        let token_config = &model_config.aggregator.sequence_encoder.base;
        let tokenizer = tokenizer_for(token_config, &cfg.data)?;
        let encoder = SampleEncoder::new(&tokenizer, token_config.sequence_length).with_hierarchy(&hierarchy);
        let (train_sets, val_sets) = self.split(sets, |s| s.label.clone().unwrap_or_default());
        let train_dataset = SetDataset::from_sets(&train_sets, &encoder)?;
        let val_dataset = SetDataset::from_sets(&val_sets, &encoder)?;

        // ── Step 4: Configs ──────────────────────────────────────────────────
        ckpt.save_config(&ModelConfig::SetTaxonomy(model_config.clone()))?;
        let metrics = MetricsLogger::new(ckpt.dir(), hierarchy.rank_names())?;

        // ── Step 5: Training loop ────────────────────────────────────────────
        let trainer = Trainer::<MyBackend>::new(&cfg.train, ckpt, &metrics, device.clone());
        trainer.fit(
            model,
            SetBatcher::<MyBackend>::new(device.clone(), max_set_len),
            SetBatcher::<MyInnerBackend>::new(device, max_set_len),
            train_dataset,
            val_dataset,
        )?;
        Ok(())
    }

    /// Label-stratified split seeded from the run seed.
    fn split<T>(&self, items: Vec<T>, label: impl Fn(&T) -> String) -> (Vec<T>, Vec<T>) {
        let mut rng = StdRng::seed_from_u64(self.config.train.seed);
        let (train, val) = split_by_label(items, self.config.train_fraction, &mut rng, label);
        tracing::info!("Split: {} train, {} validation", train.len(), val.len());
        (train, val)
    }
}

/// Classifier options shared by both taxonomy levels.
struct HeadSettings {
    top_down: bool,
    loss_policy: RankLossPolicy,
}

impl HeadSettings {
    fn classifier(self, embed_dim: usize, hierarchy: &TaxonomyHierarchy) -> HierarchicalClassifierConfig {
        HierarchicalClassifierConfig::new(embed_dim, hierarchy.depth(), hierarchy.clone())
            .with_use_top_down_hierarchy(self.top_down)
            .with_loss_policy(self.loss_policy)
    }
}

/// Put a restored token encoder under `set`, resizing the set
/// model to the encoder's width.
fn adopt_token_encoder(set: &mut SetAggregatorConfig, token_config: TokenEncoderConfig) {
    if set.embed_dim != token_config.embed_dim {
        tracing::info!(
            "Set model width follows the restored encoder: {} -> {}",
            set.embed_dim,
            token_config.embed_dim
        );
        set.embed_dim = token_config.embed_dim;
    }
    set.sequence_encoder.base = token_config;
}

/// Tokenizer matching `config`, checked against the generated reads.
fn tokenizer_for(config: &TokenEncoderConfig, data: &SyntheticConfig) -> Result<KmerTokenizer> {
    if config.num_bases != BASES.len() {
        bail!("reads use {} bases but the model expects {}", BASES.len(), config.num_bases);
    }
    if data.sequence_length < config.sequence_length {
        bail!(
            "reads are {} bp but the model needs {} bp",
            data.sequence_length,
            config.sequence_length
        );
    }
    Ok(KmerTokenizer::new(config.kmer)?)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::set_aggregator::tests::set_config;
    use crate::ml::token_encoder::tests::small_config;

    fn train_config(stage: Stage) -> TrainConfig {
        TrainConfig {
            checkpoint_dir: "unused".into(),
            data: SyntheticConfig { sequence_length: 12, ..Default::default() },
            train: TrainOptions::default(),
            train_fraction: 0.75,
            stage,
        }
    }

    #[test]
    fn test_train_config_json_names_the_stage() {
        let config = train_config(Stage::TrainTaxonomy {
            level: TaxonomyLevel::Set,
            pretrained_dir: Some("ckpt/setbert".into()),
            architecture: set_config(None),
            use_top_down_hierarchy: true,
            loss_policy: RankLossPolicy::WeightedSum(vec![1.0, 1.0, 2.0]),
        });
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"stage\":\"train_taxonomy\""));
        assert!(json.contains("\"level\":\"set\""));

        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage.name(), "set taxonomy training");
    }

    #[test]
    fn test_bad_train_fraction_is_rejected() {
        let mut config = train_config(Stage::PretrainDnabert { model: TokenPretrainerConfig::new(small_config()) });
        config.train_fraction = 1.0;
        assert!(TrainUseCase::new(config).execute().is_err());
    }

    #[test]
    fn test_reads_shorter_than_the_model_are_rejected() {
        let data = SyntheticConfig { sequence_length: 8, ..Default::default() };
        assert!(tokenizer_for(&small_config(), &data).is_err());

        let data = SyntheticConfig { sequence_length: 12, ..Default::default() };
        assert_eq!(tokenizer_for(&small_config(), &data).unwrap().kmer(), 3);
    }

    #[test]
    fn test_restored_encoder_sets_the_set_width() {
        let mut set = set_config(None);
        let wider = TokenEncoderConfig::new(12, 3, 16, 1, 2);
        adopt_token_encoder(&mut set, wider);
        assert_eq!(set.embed_dim, 16);
        assert_eq!(set.sequence_encoder.base.embed_dim, 16);
        assert!(set.validate().is_ok());
    }
}
