// ============================================================
// Layer 5 — Training Loop
// ============================================================
// One train + validation loop shared by every model, using
// Burn's DataLoader and Adam.
//
// Each trainable model implements TrainingObjective: given one
// batch it returns an optional loss plus correct-prediction
// counts. The loop then does the usual
//
//   forward → loss.backward() → GradientsParams → Adam step
//
// and skips the optimiser step when a batch produced no loss
// (nothing was masked).
//
// Backends:
//   - training runs on B (an AutodiffBackend)
//   - model.valid() moves the model to B::InnerBackend, so the
//     validation batcher builds tensors for the inner backend
//
// Masks are drawn from a StdRng seeded by TrainOptions::seed.
// Validation reseeds every epoch so its masks stay comparable
// across epochs.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::Result;
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::data::{
    batcher::{SequenceBatch, SetBatch},
    dataset::{SequenceSample, SetSample},
};
use crate::error::{DeepDnaError, Result as LibResult};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::set_pretrain::SetMaskedPretrainer;
use crate::ml::taxonomy_model::{SequenceTaxonomyModel, SetTaxonomyModel};
use crate::ml::token_pretrain::TokenMaskedPretrainer;

/// Optimisation settings shared by every training stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub seed: u64,
    pub num_workers: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self { epochs: 10, batch_size: 16, lr: 1e-4, seed: 42, num_workers: 1 }
    }
}

/// What one batch contributed.
#[derive(Debug)]
pub struct StepOutput<B: Backend> {
    /// None when the batch has nothing to learn from
    pub loss: Option<Tensor<B, 1>>,
    /// Correct predictions per tracked accuracy column
    pub correct: Vec<usize>,
    /// Denominator for `correct`
    pub total: usize,
}

/// A model that can score one batch of its training data.
pub trait TrainingObjective<B: Backend> {
    /// Dataset item the batcher consumes
    type Item: Send + Sync + Clone + Debug + 'static;
    type Batch: Send + Clone + Debug + 'static;

    fn run_batch(&self, batch: Self::Batch, rng: &mut StdRng) -> LibResult<StepOutput<B>>;
}

fn require_targets<B: Backend>(targets: Option<Tensor<B, 2, Int>>) -> LibResult<Tensor<B, 2, Int>> {
    targets.ok_or_else(|| DeepDnaError::invalid_config("taxonomy training needs labelled samples"))
}

impl<B: Backend> TrainingObjective<B> for TokenMaskedPretrainer<B> {
    type Item = SequenceSample;
    type Batch = SequenceBatch<B>;

    fn run_batch(&self, batch: Self::Batch, rng: &mut StdRng) -> LibResult<StepOutput<B>> {
        let [rows, len] = batch.tokens.dims();
        let out = self.forward(batch.tokens.clone(), rng)?;

        // masked-token reconstruction accuracy
        let mask: Vec<bool> = out
            .spans
            .iter()
            .flat_map(|span| (0..len).map(move |pos| span.contains(pos)))
            .collect();
        let mask = Tensor::<B, 2, Bool>::from_data(burn::tensor::TensorData::new(mask, [rows, len]), &out.logits.device());
        let hits = out
            .logits
            .argmax(2)
            .reshape([rows, len])
            .equal(batch.tokens)
            .int()
            .mul(mask.int())
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;

        Ok(StepOutput { loss: out.loss, correct: vec![hits], total: out.num_masked })
    }
}

impl<B: Backend> TrainingObjective<B> for SetMaskedPretrainer<B> {
    type Item = SetSample;
    type Batch = SetBatch<B>;

    fn run_batch(&self, batch: Self::Batch, rng: &mut StdRng) -> LibResult<StepOutput<B>> {
        let out = self.forward(batch.tokens, Some(&batch.lengths), rng)?;
        Ok(StepOutput { loss: out.loss, correct: Vec::new(), total: 0 })
    }
}

impl<B: Backend> TrainingObjective<B> for SequenceTaxonomyModel<B> {
    type Item = SequenceSample;
    type Batch = SequenceBatch<B>;

    fn run_batch(&self, batch: Self::Batch, _rng: &mut StdRng) -> LibResult<StepOutput<B>> {
        let targets = require_targets(batch.targets)?;
        let [rows, _] = targets.dims();
        let out = self.forward(batch.tokens)?;
        Ok(StepOutput {
            loss: Some(self.classifier.loss(&out, targets.clone())?),
            correct: self.classifier.correct_counts(&out, targets)?,
            total: rows,
        })
    }
}

impl<B: Backend> TrainingObjective<B> for SetTaxonomyModel<B> {
    type Item = SetSample;
    type Batch = SetBatch<B>;

    fn run_batch(&self, batch: Self::Batch, _rng: &mut StdRng) -> LibResult<StepOutput<B>> {
        let targets = require_targets(batch.targets)?;
        let [rows, _] = targets.dims();
        let out = self.forward(batch.tokens, Some(&batch.lengths))?;
        Ok(StepOutput {
            loss: Some(self.classifier.loss(&out, targets.clone())?),
            correct: self.classifier.correct_counts(&out, targets)?,
            total: rows,
        })
    }
}

/// Running sums over one pass of a data loader.
#[derive(Default)]
struct PassTotals {
    loss_sum: f64,
    batches: usize,
    skipped: usize,
    correct: Vec<usize>,
    total: usize,
}

impl PassTotals {
    fn add<B: Backend>(&mut self, step: &StepOutput<B>, loss: Option<f64>) {
        match loss {
            Some(value) => {
                self.loss_sum += value;
                self.batches += 1;
            }
            None => self.skipped += 1,
        }
        if self.correct.len() < step.correct.len() {
            self.correct.resize(step.correct.len(), 0);
        }
        for (sum, c) in self.correct.iter_mut().zip(&step.correct) {
            *sum += c;
        }
        self.total += step.total;
    }

    fn mean_loss(&self) -> f64 {
        if self.batches > 0 {
            self.loss_sum / self.batches as f64
        } else {
            f64::NAN
        }
    }

    fn accuracy(&self, columns: usize) -> Vec<f64> {
        (0..columns)
            .map(|i| {
                let correct = self.correct.get(i).copied().unwrap_or(0);
                if self.total > 0 { correct as f64 / self.total as f64 } else { 0.0 }
            })
            .collect()
    }
}

/// Runs the epoch loop for any TrainingObjective on backend B.
pub struct Trainer<'a, B: AutodiffBackend> {
    options: &'a TrainOptions,
    ckpt: &'a CheckpointManager,
    metrics: &'a MetricsLogger,
    device: B::Device,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(options: &'a TrainOptions, ckpt: &'a CheckpointManager, metrics: &'a MetricsLogger, device: B::Device) -> Self {
        Self { options, ckpt, metrics, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Train `model` for the configured epochs, checkpointing after
    /// each one, and return the trained model.
    pub fn fit<M, TB, VB, D>(
        &self,
        mut model: M,
        train_batcher: TB,
        valid_batcher: VB,
        train_dataset: D,
        val_dataset: D,
    ) -> Result<M>
    where
        M: AutodiffModule<B> + TrainingObjective<B>,
        M::InnerModule: TrainingObjective<B::InnerBackend>,
        TB: Batcher<M::Item, <M as TrainingObjective<B>>::Batch> + Clone + Send + Sync + 'static,
        VB: Batcher<M::Item, <M::InnerModule as TrainingObjective<B::InnerBackend>>::Batch>
            + Clone
            + Send
            + Sync
            + 'static,
        D: Dataset<M::Item> + 'static,
    {
        let opts = self.options;
        if train_dataset.is_empty() {
            anyhow::bail!("training set is empty");
        }
        tracing::info!(
            "Training on {} samples, validating on {} ({} epochs, batch size {})",
            train_dataset.len(),
            val_dataset.len(),
            opts.epochs,
            opts.batch_size
        );

        // m = β1*m + (1-β1)*g ; v = β2*v + (1-β2)*g² ; θ -= lr * m / (√v + ε)
        let mut optim = AdamConfig::new().with_epsilon(1e-8).init::<B, M>();

        let train_loader = DataLoaderBuilder::new(train_batcher)
            .batch_size(opts.batch_size)
            .shuffle(opts.seed)
            .num_workers(opts.num_workers)
            .build(train_dataset);
        let val_loader = DataLoaderBuilder::new(valid_batcher)
            .batch_size(opts.batch_size)
            .num_workers(opts.num_workers)
            .build(val_dataset);

        let columns = self.metrics.columns().len();
        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut best_val_loss = f64::INFINITY;

        for epoch in 1..=opts.epochs {
            // ── Training phase ────────────────────────────────────────────────
            let mut train = PassTotals::default();
            for batch in train_loader.iter() {
                let step = model.run_batch(batch, &mut rng)?;
                let Some(loss) = step.loss.clone() else {
                    train.add(&step, None);
                    continue;
                };
                train.add(&step, Some(loss.clone().into_scalar().elem::<f64>()));

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(opts.lr, model, grads);
            }
            if train.skipped > 0 {
                tracing::debug!("Epoch {}: {} batches had no loss, step skipped", epoch, train.skipped);
            }

            // ── Validation phase ──────────────────────────────────────────────
            let model_valid = model.valid();
            let mut val_rng = StdRng::seed_from_u64(opts.seed.wrapping_add(1));
            let mut val = PassTotals::default();
            for batch in val_loader.iter() {
                let step = model_valid.run_batch(batch, &mut val_rng)?;
                let loss = step.loss.clone().map(|l| l.into_scalar().elem::<f64>());
                val.add(&step, loss);
            }

            let metrics = EpochMetrics::new(epoch, train.mean_loss(), val.mean_loss(), val.accuracy(columns));
            let accuracy: Vec<String> = self
                .metrics
                .columns()
                .iter()
                .zip(&metrics.accuracy)
                .map(|(name, a)| format!("{name}={:.1}%", a * 100.0))
                .collect();
            println!(
                "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | {}",
                epoch,
                opts.epochs,
                metrics.train_loss,
                metrics.val_loss,
                accuracy.join(" | "),
            );
            if metrics.is_improvement(best_val_loss) {
                best_val_loss = metrics.val_loss;
                tracing::info!("Epoch {}: new best val_loss {:.4}", epoch, best_val_loss);
            }

            self.metrics.log(&metrics)?;
            self.ckpt.save_model(&model, epoch)?;
            tracing::info!("Checkpoint saved for epoch {}", epoch);
        }

        tracing::info!("Training complete!");
        Ok(model)
    }
}
