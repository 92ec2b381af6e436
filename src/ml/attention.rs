// ============================================================
// Layer 5 — Relative-Position Multi-Head Self-Attention
// ============================================================
// Token-level attention for the DNABERT encoder.
//
// Instead of adding absolute position embeddings to the input,
// every head learns an additive bias for each signed distance
// (j - i) between query i and key j:
//
//   score[h, i, j] = (q_i · k_j) / √d_head + bias[h, j - i]
//
// Keys flagged in `pad_mask` (token id 0) are filled with a
// large negative value before the softmax, so they receive no
// attention weight. The class token at position 0 is never
// masked, which guarantees every row has a valid key.
//
// Reference: Shaw et al. (2018) Self-Attention with Relative
//            Position Representations

use burn::{
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
    tensor::{activation::softmax, TensorData},
};

const MASKED_SCORE: f32 = -1.0e4;

#[derive(Config, Debug)]
pub struct RelativeAttentionConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    /// Longest sequence (class token included) the bias table spans.
    pub max_len: usize,
}

impl RelativeAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RelativeMultiHeadAttention<B> {
        let linear = || LinearConfig::new(self.embed_dim, self.embed_dim).init(device);
        RelativeMultiHeadAttention {
            query: linear(),
            key: linear(),
            value: linear(),
            output: linear(),
            relative_bias: EmbeddingConfig::new(2 * self.max_len - 1, self.num_heads).init(device),
            num_heads: self.num_heads,
            head_dim: self.embed_dim / self.num_heads,
            max_len: self.max_len,
        }
    }
}

#[derive(Module, Debug)]
pub struct RelativeMultiHeadAttention<B: Backend> {
    pub query: Linear<B>,
    pub key: Linear<B>,
    pub value: Linear<B>,
    pub output: Linear<B>,
    pub relative_bias: Embedding<B>,
    pub num_heads: usize,
    pub head_dim: usize,
    pub max_len: usize,
}

impl<B: Backend> RelativeMultiHeadAttention<B> {
    /// x: [batch, len, embed_dim], pad_mask: [batch, len] (true = ignore as key)
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        let [batch, len, embed_dim] = x.dims();
        let heads = self.num_heads;
        let device = x.device();

        let split_heads = |t: Tensor<B, 3>| {
            t.reshape([batch, len, heads, self.head_dim]).swap_dims(1, 2)
        };
        let q = split_heads(self.query.forward(x.clone()));
        let k = split_heads(self.key.forward(x.clone()));
        let v = split_heads(self.value.forward(x));

        // [batch, heads, len, len]
        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((self.head_dim as f64).sqrt());
        let bias = self
            .position_bias(len, &device)
            .unsqueeze::<4>()
            .expand([batch, heads, len, len]);
        let mut scores = scores + bias;

        if let Some(mask) = pad_mask {
            let mask = mask.reshape([batch, 1, 1, len]).expand([batch, heads, len, len]);
            scores = scores.mask_fill(mask, MASKED_SCORE);
        }

        let weights = softmax(scores, 3);
        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, len, embed_dim]);
        self.output.forward(context)
    }

    /// Per-head bias for every (query, key) pair: [heads, len, len].
    fn position_bias(&self, len: usize, device: &B::Device) -> Tensor<B, 3> {
        let reach = self.max_len as i64 - 1;
        let offsets: Vec<i64> = (0..len as i64)
            .flat_map(|i| (0..len as i64).map(move |j| (j - i).clamp(-reach, reach) + reach))
            .collect();
        let offsets = Tensor::<B, 2, Int>::from_data(TensorData::new(offsets, [len, len]), device);
        // [len, len, heads] → [heads, len, len]
        self.relative_bias.forward(offsets).permute([2, 0, 1])
    }
}
