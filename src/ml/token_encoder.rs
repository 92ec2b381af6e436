// ============================================================
// Layer 5 — Token Encoder (DNABERT base)
// ============================================================
// The token-level transformer every other model builds on.
//
//   token ids [batch, L]
//       │  Embedding (vocab = num_bases^k + reserved)
//       ▼
//   [batch, L, D]  ── prepend learned class token ──▶ [batch, 1+L, D]
//       │
//       ▼  × stack
//   EncoderBlock: relative-position self-attention + feed-forward,
//                 residual connections, pre- or post-layernorm
//       │
//       ▼
//   [batch, 1+L, D]   (position 0 = class token)
//
// Token id layout:
//   variable_length = false → 0 = mask
//   variable_length = true  → 0 = pad, 1 = mask
//   raw k-mer ids are shifted up past the reserved ids.
// Id 0 is excluded from attention as a key.
//
// Reference: Ji et al. (2021) DNABERT
//            Vaswani et al. (2017) Attention Is All You Need

use burn::{
    module::Param,
    nn::{Embedding, EmbeddingConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::gelu,
};

use crate::error::{ensure, DeepDnaError, Result};
use crate::ml::attention::{RelativeAttentionConfig, RelativeMultiHeadAttention};

#[derive(Config, Debug)]
pub struct TokenEncoderConfig {
    /// Raw sequence length in bases
    pub sequence_length: usize,
    pub kmer: usize,
    pub embed_dim: usize,
    /// Number of stacked encoder blocks
    pub stack: usize,
    pub num_heads: usize,
    #[config(default = true)]
    pub pre_layernorm: bool,
    /// Reserve a pad token so pretraining can trim sequences
    #[config(default = false)]
    pub variable_length: bool,
    #[config(default = 4)]
    pub num_bases: usize,
}

impl TokenEncoderConfig {
    /// Tokens per sequence: sequence_length - kmer + 1.
    pub fn token_length(&self) -> usize {
        (self.sequence_length + 1).saturating_sub(self.kmer)
    }

    /// Mask sentinel, plus pad when variable length is enabled.
    pub fn num_reserved_tokens(&self) -> usize {
        1 + usize::from(self.variable_length)
    }

    /// Size of the raw k-mer vocabulary.
    pub fn kmer_vocab_size(&self) -> usize {
        self.num_bases.pow(self.kmer as u32)
    }

    /// Embedding table size, reserved ids included.
    pub fn vocab_size(&self) -> usize {
        self.kmer_vocab_size() + self.num_reserved_tokens()
    }

    pub fn mask_token(&self) -> i64 {
        i64::from(self.variable_length)
    }

    pub fn pad_token(&self) -> Option<i64> {
        self.variable_length.then_some(0)
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.kmer >= 1, || "kmer must be at least 1".into())?;
        ensure(self.num_bases >= 2, || format!("num_bases must be at least 2, got {}", self.num_bases))?;
        ensure(self.sequence_length >= self.kmer, || {
            format!("sequence_length ({}) shorter than kmer ({})", self.sequence_length, self.kmer)
        })?;
        ensure(self.stack >= 1, || "stack must be at least 1".into())?;
        ensure(self.num_heads >= 1 && self.embed_dim > 0 && self.embed_dim % self.num_heads == 0, || {
            format!("embed_dim ({}) must be a positive multiple of num_heads ({})", self.embed_dim, self.num_heads)
        })?;
        ensure(
            self.kmer <= 15 && self.num_bases.checked_pow(self.kmer as u32).is_some_and(|v| v < i32::MAX as usize),
            || format!("vocabulary {}^{} is too large", self.num_bases, self.kmer),
        )?;
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TokenEncoder<B>> {
        self.validate()?;
        let token_length = self.token_length();
        let blocks = (0..self.stack)
            .map(|_| self.build_encoder_block(token_length + 1, device))
            .collect();
        let class_token: Param<Tensor<B, 3>> =
            Initializer::Normal { mean: 0.0, std: 0.02 }.init([1, 1, self.embed_dim], device);

        tracing::debug!(
            "TokenEncoder: vocab={}, tokens={}, embed_dim={}, stack={}",
            self.vocab_size(),
            token_length,
            self.embed_dim,
            self.stack
        );
        Ok(TokenEncoder {
            token_embedding: EmbeddingConfig::new(self.vocab_size(), self.embed_dim).init(device),
            class_token,
            blocks,
            token_length,
            embed_dim: self.embed_dim,
        })
    }

    fn build_encoder_block<B: Backend>(&self, max_len: usize, device: &B::Device) -> EncoderBlock<B> {
        // feed-forward width equals the embedding width
        let ff_dim = self.embed_dim;
        EncoderBlock {
            attention: RelativeAttentionConfig::new(self.embed_dim, self.num_heads, max_len).init(device),
            ffn_linear1: LinearConfig::new(self.embed_dim, ff_dim).init(device),
            ffn_linear2: LinearConfig::new(ff_dim, self.embed_dim).init(device),
            norm1: LayerNormConfig::new(self.embed_dim).init(device),
            norm2: LayerNormConfig::new(self.embed_dim).init(device),
            pre_layernorm: self.pre_layernorm,
        }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub attention:     RelativeMultiHeadAttention<B>,
    pub ffn_linear1:   Linear<B>,
    pub ffn_linear2:   Linear<B>,
    pub norm1:         LayerNorm<B>,
    pub norm2:         LayerNorm<B>,
    pub pre_layernorm: bool,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        if self.pre_layernorm {
            let x = x.clone() + self.attention.forward(self.norm1.forward(x), pad_mask);
            x.clone() + self.feed_forward(self.norm2.forward(x))
        } else {
            let x = self.norm1.forward(x.clone() + self.attention.forward(x, pad_mask));
            self.norm2.forward(x.clone() + self.feed_forward(x))
        }
    }

    fn feed_forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct TokenEncoder<B: Backend> {
    pub token_embedding: Embedding<B>,
    pub class_token:     Param<Tensor<B, 3>>,
    pub blocks:          Vec<EncoderBlock<B>>,
    pub token_length:    usize,
    pub embed_dim:       usize,
}

impl<B: Backend> TokenEncoder<B> {
    /// tokens: model-space ids [batch, L] → [batch, 1+L, embed_dim]
    pub fn forward(&self, tokens: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let [batch, len] = tokens.dims();
        if batch == 0 {
            return Err(DeepDnaError::EmptyBatch("token encoder received no sequences".into()));
        }
        if len != self.token_length {
            return Err(DeepDnaError::dimension_mismatch("token encoder input length", self.token_length, len));
        }
        let device = tokens.device();

        // The class slot is never a sentinel, so prepend a non-zero column
        // before deriving the key mask.
        let pad_mask = Tensor::cat(vec![Tensor::<B, 2, Int>::ones([batch, 1], &device), tokens.clone()], 1)
            .equal_elem(0);

        let embedded = self.token_embedding.forward(tokens);
        let class_token = self.class_token.val().expand([batch, 1, self.embed_dim]);
        let mut x = Tensor::cat(vec![class_token, embedded], 1);
        for block in &self.blocks {
            x = block.forward(x, Some(pad_mask.clone()));
        }
        Ok(x)
    }
}

/// Split encoder output into (class token [batch, D], tokens [batch, L, D]).
pub fn split_class_token<B: Backend>(x: Tensor<B, 3>) -> (Tensor<B, 2>, Tensor<B, 3>) {
    let [batch, len, dim] = x.dims();
    let class = x.clone().slice([0..batch, 0..1, 0..dim]).reshape([batch, dim]);
    let rest = x.slice([0..batch, 1..len, 0..dim]);
    (class, rest)
}
