// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Read-only view of a checkpoint directory:
//
//   summary  → model description, latest epoch, last metrics row
//   predict  → rebuild a taxonomy model, classify freshly
//              generated reads (or sets) and compare each
//              prediction with the true label
//
// Predictions regenerate the community the model was trained on,
// as recorded in train_config.json. Only the settings given in
// DataOverrides change; the label depth always follows the
// model's hierarchy.
//
// Inference runs on the plain Wgpu backend (no autodiff).

use anyhow::{Context, Result};
use burn::{
    backend::{wgpu::WgpuDevice, Wgpu},
    data::dataloader::batcher::Batcher,
};
use std::fs;

use crate::application::model_store::{load_model_config, load_taxonomy_model, TaxonomyModel};
use crate::application::train_use_case::{TrainConfig, TRAIN_CONFIG};
use crate::data::{
    batcher::{SequenceBatcher, SetBatcher},
    dataset::SampleEncoder,
    synthetic::{SyntheticCommunity, SyntheticConfig},
};
use crate::domain::{kmer::KmerTokenizer, taxonomy::TaxonomyHierarchy, traits::SequenceSource};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{models::ModelConfig, taxonomy_head::HierarchyOutput};

type InferBackend = Wgpu;

/// One classified read or set.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub truth: String,
    pub predicted: String,
    /// Leading ranks where prediction and truth agree
    pub matching_ranks: usize,
}

/// Predictions together with the depth they were scored against.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionReport {
    /// Ranks in the model's hierarchy
    pub depth: usize,
    pub predictions: Vec<Prediction>,
}

impl PredictionReport {
    /// Samples whose every rank was predicted correctly.
    pub fn fully_correct(&self) -> usize {
        self.predictions.iter().filter(|p| p.matching_ranks == self.depth).count()
    }
}

/// Generator settings that differ from the trained run. Unset
/// fields keep the value saved in train_config.json.
#[derive(Debug, Clone, Default)]
pub struct DataOverrides {
    pub reads_per_genus: Option<usize>,
    pub read_length: Option<usize>,
    pub mutation_rate: Option<f64>,
    pub seed: Option<u64>,
}

impl DataOverrides {
    pub fn apply(&self, mut data: SyntheticConfig) -> SyntheticConfig {
        if let Some(n) = self.reads_per_genus {
            data.reads_per_genus = n;
        }
        if let Some(len) = self.read_length {
            data.sequence_length = len;
        }
        if let Some(rate) = self.mutation_rate {
            data.mutation_rate = rate;
        }
        if let Some(seed) = self.seed {
            data.seed = Some(seed);
        }
        data
    }
}

pub struct InspectUseCase {
    checkpoint_dir: String,
}

impl InspectUseCase {
    pub fn new(checkpoint_dir: impl Into<String>) -> Self {
        Self { checkpoint_dir: checkpoint_dir.into() }
    }

    /// Human readable description of the checkpoint.
    pub fn summary(&self) -> Result<String> {
        let config = load_model_config(&self.checkpoint_dir)?;
        let ckpt = CheckpointManager::open(&self.checkpoint_dir)?;

        let mut lines = vec![config.describe()];
        match ckpt.latest_epoch() {
            Ok(epoch) => lines.push(format!("latest epoch:     {epoch}")),
            Err(_) => lines.push("latest epoch:     none saved".to_string()),
        }

        let csv = ckpt.dir().join("metrics.csv");
        if let Ok(text) = fs::read_to_string(&csv) {
            let mut rows = text.lines();
            if let (Some(header), Some(last)) = (rows.next(), rows.last()) {
                for (name, value) in header.split(',').zip(last.split(',')).skip(1) {
                    lines.push(format!("{:<18}{value}", format!("{name}:")));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    /// The community the checkpoint was trained on, with `overrides`
    /// applied. Checkpoints without a saved run fall back to the
    /// default community.
    pub fn data_config(&self, overrides: &DataOverrides) -> Result<SyntheticConfig> {
        let data = match TrainConfig::load(&self.checkpoint_dir)? {
            Some(config) => config.data,
            None => {
                tracing::warn!(
                    "No {} in '{}'; generating the default community",
                    TRAIN_CONFIG,
                    self.checkpoint_dir
                );
                SyntheticConfig::default()
            }
        };
        Ok(overrides.apply(data))
    }

    /// Classify `count` samples of the trained community with the
    /// saved taxonomy model. Reads shorter than the model's sequence
    /// length are generated at that length instead.
    pub fn predict(&self, overrides: &DataOverrides, count: usize) -> Result<PredictionReport> {
        let mut data = self.data_config(overrides)?;
        let device = WgpuDevice::default();
        let (config, model) = load_taxonomy_model::<InferBackend>(&self.checkpoint_dir, &device)?;
        let hierarchy = hierarchy_of(&config)?;
        let token_config = config.token_encoder();
        data.sequence_length = data.sequence_length.max(token_config.sequence_length);
        if data.depth != hierarchy.depth() {
            tracing::warn!("Generating {}-rank labels to match the model, not {}", hierarchy.depth(), data.depth);
            data.depth = hierarchy.depth();
        }
        let tokenizer = KmerTokenizer::new(token_config.kmer)?;
        let encoder = SampleEncoder::new(&tokenizer, token_config.sequence_length);
        let community = SyntheticCommunity::new(data)?;

        let (truths, output) = match model {
            TaxonomyModel::Sequence(model) => {
                let reads = spread(community.sequences()?, count);
                let samples = reads.iter().map(|r| encoder.sequence(r)).collect::<crate::error::Result<Vec<_>>>()?;
                let batch = SequenceBatcher::<InferBackend>::new(device).batch(samples);
                let truths = reads.into_iter().map(|r| r.label).collect::<Vec<_>>();
                (truths, model.forward(batch.tokens)?)
            }
            TaxonomyModel::Set(model) => {
                let max_set_len = model.aggregator.max_set_len;
                let sets = spread(community.sets(max_set_len)?, count);
                let samples = sets.iter().map(|s| encoder.set(s)).collect::<crate::error::Result<Vec<_>>>()?;
                let batch = SetBatcher::<InferBackend>::new(device, max_set_len).batch(samples);
                let truths = sets.into_iter().map(|s| s.label.unwrap_or_default()).collect::<Vec<_>>();
                (truths, model.forward(batch.tokens, Some(&batch.lengths))?)
            }
        };
        Ok(PredictionReport { depth: hierarchy.depth(), predictions: compare(hierarchy, truths, &output) })
    }
}

/// The hierarchy a taxonomy config was trained with.
fn hierarchy_of(config: &ModelConfig) -> Result<&TaxonomyHierarchy> {
    match config {
        ModelConfig::SequenceTaxonomy(c) => Ok(&c.classifier.hierarchy),
        ModelConfig::SetTaxonomy(c) => Ok(&c.classifier.hierarchy),
        other => None.with_context(|| format!("a {} model has no taxonomy", other.name())),
    }
}

/// `count` items evenly spaced through `items`, so every genus shows up.
fn spread<T>(items: Vec<T>, count: usize) -> Vec<T> {
    let step = (items.len() / count.max(1)).max(1);
    items.into_iter().step_by(step).take(count).collect()
}

fn compare<B: burn::prelude::Backend>(
    hierarchy: &TaxonomyHierarchy,
    truths: Vec<String>,
    output: &HierarchyOutput<B>,
) -> Vec<Prediction> {
    let predictions = output.predictions();
    let deepest = hierarchy.depth() - 1;
    truths
        .into_iter()
        .enumerate()
        .map(|(row, truth)| {
            let ids: Vec<usize> = predictions.iter().map(|rank| rank[row]).collect();
            let truth_ids = hierarchy.encode_prefix(&truth);
            let matching_ranks = ids.iter().zip(&truth_ids).take_while(|(p, t)| p == t).count();
            Prediction {
                predicted: hierarchy.decode(deepest, ids[deepest]).unwrap_or_default(),
                truth,
                matching_ranks,
            }
        })
        .collect()
}
