// ============================================================
// Layer 5 — Masked Token Pretraining (DNABERT pretrain model)
// ============================================================
// Self-supervised objective for the token encoder:
//
//   raw ids ──(+ reserved)──▶ model ids
//       │
//       ▼  variable_length only: sample usable length U in
//       │  [min_len, max_len] (token space) and pad past it
//       ▼
//   pick one contiguous span of floor(mask_ratio · U) tokens
//   starting uniformly in [0, U - span] and overwrite it with
//   the mask sentinel
//       │
//       ▼
//   TokenEncoder → drop class token → Linear(D → 4^k)
//       │
//       ▼
//   cross-entropy against the raw ids, masked positions only
//
// Spans are sampled on the host with a caller-supplied RNG, so a
// seeded RNG reproduces a training step exactly.
//
// mask_ratio = 0 produces empty spans. The forward pass still
// runs; the output carries `loss: None` and the trainer skips
// the optimiser step for that batch.

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::TensorData,
};
use rand::Rng;

use crate::error::{ensure, DeepDnaError, Result};
use crate::ml::losses::masked_cross_entropy;
use crate::ml::token_encoder::{split_class_token, TokenEncoder, TokenEncoderConfig};

#[derive(Config, Debug)]
pub struct TokenPretrainerConfig {
    pub base: TokenEncoderConfig,
    #[config(default = 0.15)]
    pub mask_ratio: f64,
    /// Shortest usable length in bases when trimming (defaults to max_len)
    pub min_len: Option<usize>,
    /// Longest usable length in bases when trimming (defaults to sequence_length)
    pub max_len: Option<usize>,
}

impl TokenPretrainerConfig {
    /// (min_len, max_len) in bases after applying defaults.
    pub fn resolved_lengths(&self) -> (usize, usize) {
        let max_len = self.max_len.unwrap_or(self.base.sequence_length);
        let min_len = self.min_len.unwrap_or(max_len);
        (min_len, max_len)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        ensure((0.0..=1.0).contains(&self.mask_ratio), || {
            format!("mask_ratio must be in [0, 1], got {}", self.mask_ratio)
        })?;
        let (min_len, max_len) = self.resolved_lengths();
        ensure(min_len <= max_len, || format!("min_len ({min_len}) > max_len ({max_len})"))?;
        ensure(max_len <= self.base.sequence_length, || {
            format!("max_len ({max_len}) exceeds sequence_length ({})", self.base.sequence_length)
        })?;
        ensure(min_len >= self.base.kmer, || {
            format!("min_len ({min_len}) shorter than kmer ({})", self.base.kmer)
        })?;
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TokenMaskedPretrainer<B>> {
        self.validate()?;
        let base = self.base.init(device)?;
        let (min_len, max_len) = self.resolved_lengths();
        let (min_tokens, max_tokens) = if self.base.variable_length {
            (min_len + 1 - self.base.kmer, max_len + 1 - self.base.kmer)
        } else {
            (self.base.token_length(), self.base.token_length())
        };

        Ok(TokenMaskedPretrainer {
            base,
            head: LinearConfig::new(self.base.embed_dim, self.base.kmer_vocab_size()).init(device),
            mask_ratio: self.mask_ratio,
            min_tokens,
            max_tokens,
            num_reserved: self.base.num_reserved_tokens(),
            mask_token: self.base.mask_token(),
            variable_length: self.base.variable_length,
        })
    }
}

/// The masked region of one sequence for one training step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskSpan {
    pub start: usize,
    pub len: usize,
    /// Positions at or beyond this index are padding
    pub usable_len: usize,
}

impl MaskSpan {
    pub fn contains(&self, position: usize) -> bool {
        (self.start..self.start + self.len).contains(&position)
    }
}

#[derive(Debug)]
pub struct TokenPretrainOutput<B: Backend> {
    /// Reconstruction logits over raw k-mer ids: [batch, L, 4^k]
    pub logits: Tensor<B, 3>,
    pub spans: Vec<MaskSpan>,
    /// Total masked positions across the batch
    pub num_masked: usize,
    /// None when nothing was masked
    pub loss: Option<Tensor<B, 1>>,
}

#[derive(Module, Debug)]
pub struct TokenMaskedPretrainer<B: Backend> {
    pub base: TokenEncoder<B>,
    pub head: Linear<B>,
    pub mask_ratio: f64,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub num_reserved: usize,
    pub mask_token: i64,
    pub variable_length: bool,
}

impl<B: Backend> TokenMaskedPretrainer<B> {
    /// Draw one span per sequence.
    pub fn sample_spans<R: Rng>(&self, batch: usize, rng: &mut R) -> Vec<MaskSpan> {
        (0..batch)
            .map(|_| {
                let usable_len = if self.variable_length {
                    rng.gen_range(self.min_tokens..=self.max_tokens)
                } else {
                    self.max_tokens
                };
                let len = (self.mask_ratio * usable_len as f64).floor() as usize;
                let start = rng.gen_range(0..=usable_len - len);
                MaskSpan { start, len, usable_len }
            })
            .collect()
    }

    /// Shift raw ids into model space, trim and mask them.
    pub fn apply_masks(&self, raw_tokens: Tensor<B, 2, Int>, spans: &[MaskSpan]) -> Result<Tensor<B, 2, Int>> {
        let [batch, len] = raw_tokens.dims();
        if spans.len() != batch {
            return Err(DeepDnaError::dimension_mismatch("mask spans per batch", batch, spans.len()));
        }
        let device = raw_tokens.device();

        let mut masked = Vec::with_capacity(batch * len);
        let mut trimmed = Vec::with_capacity(batch * len);
        for span in spans {
            for pos in 0..len {
                masked.push(span.contains(pos));
                trimmed.push(pos >= span.usable_len);
            }
        }
        let masked = Tensor::<B, 2, Bool>::from_data(TensorData::new(masked, [batch, len]), &device);

        let mut tokens = raw_tokens.add_scalar(self.num_reserved as i64);
        if self.variable_length {
            let trimmed = Tensor::<B, 2, Bool>::from_data(TensorData::new(trimmed, [batch, len]), &device);
            tokens = tokens.mask_fill(trimmed, 0);
        }
        Ok(tokens.mask_fill(masked, self.mask_token))
    }

    /// Forward pass with explicit spans.
    pub fn forward_masked(&self, raw_tokens: Tensor<B, 2, Int>, spans: &[MaskSpan]) -> Result<TokenPretrainOutput<B>> {
        let [batch, len] = raw_tokens.dims();
        let model_tokens = self.apply_masks(raw_tokens.clone(), spans)?;

        let (_, tokens) = split_class_token(self.base.forward(model_tokens)?);
        let logits = self.head.forward(tokens);

        let num_masked: usize = spans.iter().map(|s| s.len).sum();
        let loss = if num_masked == 0 {
            tracing::debug!("No positions masked in this batch; skipping reconstruction loss");
            None
        } else {
            let mask: Vec<bool> = spans
                .iter()
                .flat_map(|span| (0..len).map(move |pos| span.contains(pos)))
                .collect();
            let mask = Tensor::<B, 2, Bool>::from_data(TensorData::new(mask, [batch, len]), &logits.device());
            Some(masked_cross_entropy(logits.clone(), raw_tokens, mask))
        };

        Ok(TokenPretrainOutput { logits, spans: spans.to_vec(), num_masked, loss })
    }

    /// Sample fresh spans and run the forward pass.
    pub fn forward<R: Rng>(&self, raw_tokens: Tensor<B, 2, Int>, rng: &mut R) -> Result<TokenPretrainOutput<B>> {
        let spans = self.sample_spans(raw_tokens.dims()[0], rng);
        self.forward_masked(raw_tokens, &spans)
    }
}
