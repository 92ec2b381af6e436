// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Subcommands and their flags. Groups of flags shared by several
// commands are flattened in from small Args structs:
//
//   RunArgs      checkpoint dir + optimiser settings
//   DataArgs     synthetic community shape
//   EncoderArgs  DNABERT token encoder architecture
//   SetArgs      SetBERT aggregator architecture
//
// The application layer never sees clap types: training commands
// are converted into a TrainConfig at this boundary, and inspect
// flags into DataOverrides.

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{
    inspect_use_case::DataOverrides,
    train_use_case::{Stage, TaxonomyLevel, TrainConfig},
};
use crate::data::synthetic::SyntheticConfig;
use crate::ml::{
    sequence_encoder::SequenceEncoderConfig,
    set_aggregator::SetAggregatorConfig,
    set_pretrain::SetPretrainerConfig,
    taxonomy_head::RankLossPolicy,
    token_encoder::TokenEncoderConfig,
    token_pretrain::TokenPretrainerConfig,
    trainer::TrainOptions,
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pretrain the DNABERT token encoder by masked span reconstruction
    PretrainDnabert(PretrainDnabertArgs),

    /// Pretrain the SetBERT aggregator on top of a frozen DNABERT encoder
    PretrainSetbert(PretrainSetbertArgs),

    /// Train a hierarchical taxonomy classifier on reads or sets
    TrainTaxonomy(TrainTaxonomyArgs),

    /// Describe a checkpoint and optionally classify fresh samples with it
    Inspect(InspectArgs),
}

// ─── Shared flag groups ───────────────────────────────────────────────────────

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directory for checkpoints, configs and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Seed for shuffling, splitting and masking
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Share of each genus used for training; the rest validates
    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,
}

impl RunArgs {
    fn options(&self) -> TrainOptions {
        TrainOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            lr: self.lr,
            seed: self.seed,
            num_workers: self.num_workers,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(long, default_value_t = 8)]
    pub num_genera: usize,

    #[arg(long, default_value_t = 64)]
    pub reads_per_genus: usize,

    /// Read length in bases; defaults to the model's sequence length
    #[arg(long)]
    pub read_length: Option<usize>,

    /// Taxonomy ranks per label
    #[arg(long, default_value_t = 3)]
    pub depth: usize,

    /// Children per taxon between consecutive ranks
    #[arg(long, default_value_t = 2)]
    pub branching: usize,

    /// Per-base substitution probability within a genus
    #[arg(long, default_value_t = 0.02)]
    pub mutation_rate: f64,

    /// Seed of the generated community
    #[arg(long, default_value_t = 42)]
    pub data_seed: u64,
}

impl DataArgs {
    pub fn config(&self, sequence_length: usize) -> SyntheticConfig {
        SyntheticConfig {
            num_genera: self.num_genera,
            reads_per_genus: self.reads_per_genus,
            sequence_length: self.read_length.unwrap_or(sequence_length),
            depth: self.depth,
            branching: self.branching,
            mutation_rate: self.mutation_rate,
            seed: Some(self.data_seed),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EncoderArgs {
    /// Bases per read seen by the encoder
    #[arg(long, default_value_t = 150)]
    pub sequence_length: usize,

    #[arg(long, default_value_t = 3)]
    pub kmer: usize,

    #[arg(long, default_value_t = 64)]
    pub embed_dim: usize,

    /// Token encoder blocks
    #[arg(long, default_value_t = 4)]
    pub stack: usize,

    /// Must divide embed_dim
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    /// Use post-layernorm blocks instead of pre-layernorm
    #[arg(long)]
    pub post_layernorm: bool,

    /// Reserve a pad token so pretraining can trim reads
    #[arg(long)]
    pub variable_length: bool,

    /// Reads encoded per forward pass
    #[arg(long, default_value_t = 256)]
    pub chunk_size: usize,
}

impl EncoderArgs {
    pub fn config(&self) -> TokenEncoderConfig {
        TokenEncoderConfig::new(self.sequence_length, self.kmer, self.embed_dim, self.stack, self.num_heads)
            .with_pre_layernorm(!self.post_layernorm)
            .with_variable_length(self.variable_length)
    }

    pub fn sequence_config(&self) -> SequenceEncoderConfig {
        SequenceEncoderConfig::new(self.config()).with_chunk_size(self.chunk_size)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Largest set the aggregator accepts
    #[arg(long, default_value_t = 16)]
    pub max_set_len: usize,

    /// Set attention blocks
    #[arg(long, default_value_t = 2)]
    pub set_stack: usize,

    #[arg(long, default_value_t = 4)]
    pub set_num_heads: usize,

    /// Inducing points per block; omit for full self-attention
    #[arg(long)]
    pub num_induce: Option<usize>,
}

impl SetArgs {
    pub fn config(&self, encoder: &EncoderArgs) -> SetAggregatorConfig {
        SetAggregatorConfig::new(
            encoder.sequence_config(),
            encoder.embed_dim,
            self.max_set_len,
            self.set_stack,
            self.set_num_heads,
        )
        .with_num_induce(self.num_induce)
        .with_pre_layernorm(!encoder.post_layernorm)
    }
}

// ─── pretrain-dnabert ─────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PretrainDnabertArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub encoder: EncoderArgs,

    /// Share of tokens covered by the masked span
    #[arg(long, default_value_t = 0.15)]
    pub mask_ratio: f64,

    /// Shortest trimmed read in bases (variable length only)
    #[arg(long)]
    pub min_len: Option<usize>,

    /// Longest trimmed read in bases (variable length only)
    #[arg(long)]
    pub max_len: Option<usize>,
}

impl From<PretrainDnabertArgs> for TrainConfig {
    fn from(a: PretrainDnabertArgs) -> Self {
        let model = TokenPretrainerConfig::new(a.encoder.config())
            .with_mask_ratio(a.mask_ratio)
            .with_min_len(a.min_len)
            .with_max_len(a.max_len);
        TrainConfig {
            checkpoint_dir: a.run.checkpoint_dir.clone(),
            data: a.data.config(a.encoder.sequence_length),
            train: a.run.options(),
            train_fraction: a.run.train_fraction,
            stage: Stage::PretrainDnabert { model },
        }
    }
}

// ─── pretrain-setbert ─────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PretrainSetbertArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub data: DataArgs,

    // used only when --dnabert-dir is not given
    #[command(flatten)]
    pub encoder: EncoderArgs,

    #[command(flatten)]
    pub set: SetArgs,

    /// Checkpoint directory of a pretrain-dnabert run
    #[arg(long)]
    pub dnabert_dir: Option<String>,

    /// Share of set slots replaced by the mask token
    #[arg(long, default_value_t = 0.15)]
    pub mask_ratio: f64,
}

impl From<PretrainSetbertArgs> for TrainConfig {
    fn from(a: PretrainSetbertArgs) -> Self {
        let model = SetPretrainerConfig::new(a.set.config(&a.encoder)).with_mask_ratio(a.mask_ratio);
        TrainConfig {
            checkpoint_dir: a.run.checkpoint_dir.clone(),
            data: a.data.config(a.encoder.sequence_length),
            train: a.run.options(),
            train_fraction: a.run.train_fraction,
            stage: Stage::PretrainSetbert { dnabert_dir: a.dnabert_dir, model },
        }
    }
}

// ─── train-taxonomy ───────────────────────────────────────────────────────────

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LevelArg {
    /// One label per read
    Sequence,
    /// One label per set of reads
    Set,
}

impl From<LevelArg> for TaxonomyLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Sequence => TaxonomyLevel::Sequence,
            LevelArg::Set => TaxonomyLevel::Set,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainTaxonomyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub encoder: EncoderArgs,

    #[command(flatten)]
    pub set: SetArgs,

    #[arg(long, value_enum, default_value_t = LevelArg::Sequence)]
    pub level: LevelArg,

    /// Checkpoint of a pretrain-dnabert or pretrain-setbert run
    #[arg(long)]
    pub pretrained_dir: Option<String>,

    /// Condition each rank on the one above it
    #[arg(long)]
    pub top_down: bool,

    /// Per-rank loss weights, root first (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub rank_weights: Vec<f64>,
}

impl From<TrainTaxonomyArgs> for TrainConfig {
    fn from(a: TrainTaxonomyArgs) -> Self {
        let loss_policy = match a.rank_weights.is_empty() {
            true => RankLossPolicy::Sum,
            false => RankLossPolicy::WeightedSum(a.rank_weights),
        };
        TrainConfig {
            checkpoint_dir: a.run.checkpoint_dir.clone(),
            data: a.data.config(a.encoder.sequence_length),
            train: a.run.options(),
            train_fraction: a.run.train_fraction,
            stage: Stage::TrainTaxonomy {
                level: a.level.into(),
                pretrained_dir: a.pretrained_dir,
                architecture: a.set.config(&a.encoder),
                use_top_down_hierarchy: a.top_down,
                loss_policy,
            },
        }
    }
}

// ─── inspect ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Classify this many generated samples (taxonomy checkpoints only)
    #[arg(long)]
    pub predict: Option<usize>,

    // the community otherwise comes from the run's train_config.json
    /// Reads per genus to generate
    #[arg(long)]
    pub reads_per_genus: Option<usize>,

    /// Read length in bases
    #[arg(long)]
    pub read_length: Option<usize>,

    /// Per-base substitution probability within a genus
    #[arg(long)]
    pub mutation_rate: Option<f64>,

    /// Seed of the generated community
    #[arg(long)]
    pub data_seed: Option<u64>,
}

impl InspectArgs {
    pub fn overrides(&self) -> DataOverrides {
        DataOverrides {
            reads_per_genus: self.reads_per_genus,
            read_length: self.read_length,
            mutation_rate: self.mutation_rate,
            seed: self.data_seed,
        }
    }
}
