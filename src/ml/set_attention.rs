// ============================================================
// Layer 5 — Set Attention Blocks (SAB / ISAB)
// ============================================================
// Permutation-equivariant building blocks for the set model.
//
//   MAB(Q, K) : multihead attention block: Q attends over K,
//               then a GELU feed-forward, both with residuals
//   SAB(X)    = MAB(X, X)                        O(n²)
//   ISAB(X)   = MAB(X, MAB(I, X))                O(n·m)
//               I = m learned inducing points
//
// None of these use positional information, so permuting the
// rows of X permutes the output rows the same way. Padded set
// slots are only ever excluded as keys.
//
// Reference: Lee et al. (2019) Set Transformer

use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::gelu,
};

#[derive(Config, Debug)]
pub struct SetAttentionConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    /// Number of inducing points; None builds a plain SAB
    pub num_induce: Option<usize>,
    #[config(default = true)]
    pub pre_layernorm: bool,
}

impl SetAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SetAttentionBlock<B> {
        let induce = self.num_induce.map(|n| InducedPoints {
            points: Initializer::Normal { mean: 0.0, std: 0.02 }.init([1, n, self.embed_dim], device),
            mab: self.build_mab(device),
        });
        SetAttentionBlock { mab: self.build_mab(device), induce }
    }

    fn build_mab<B: Backend>(&self, device: &B::Device) -> MultiheadAttentionBlock<B> {
        MultiheadAttentionBlock {
            attention: MultiHeadAttentionConfig::new(self.embed_dim, self.num_heads)
                .with_dropout(0.0)
                .init(device),
            norm_query: LayerNormConfig::new(self.embed_dim).init(device),
            norm_key: LayerNormConfig::new(self.embed_dim).init(device),
            norm_ff: LayerNormConfig::new(self.embed_dim).init(device),
            ffn_linear1: LinearConfig::new(self.embed_dim, self.embed_dim).init(device),
            ffn_linear2: LinearConfig::new(self.embed_dim, self.embed_dim).init(device),
            pre_layernorm: self.pre_layernorm,
        }
    }
}

#[derive(Module, Debug)]
pub struct MultiheadAttentionBlock<B: Backend> {
    pub attention:     MultiHeadAttention<B>,
    pub norm_query:    LayerNorm<B>,
    pub norm_key:      LayerNorm<B>,
    pub norm_ff:       LayerNorm<B>,
    pub ffn_linear1:   Linear<B>,
    pub ffn_linear2:   Linear<B>,
    pub pre_layernorm: bool,
}

impl<B: Backend> MultiheadAttentionBlock<B> {
    /// query: [batch, n, D], key: [batch, m, D], key_mask: [batch, m]
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        key_mask: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let with_mask = |input: MhaInput<B>| match key_mask {
            Some(mask) => input.mask_pad(mask),
            None => input,
        };

        if self.pre_layernorm {
            let q = self.norm_query.forward(query.clone());
            let kv = self.norm_key.forward(key);
            let attended = self.attention.forward(with_mask(MhaInput::new(q, kv.clone(), kv))).context;
            let h = query + attended;
            h.clone() + self.feed_forward(self.norm_ff.forward(h))
        } else {
            let attended = self
                .attention
                .forward(with_mask(MhaInput::new(query.clone(), key.clone(), key)))
                .context;
            let h = self.norm_query.forward(query + attended);
            self.norm_ff.forward(h.clone() + self.feed_forward(h))
        }
    }

    fn feed_forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct InducedPoints<B: Backend> {
    pub points: Param<Tensor<B, 3>>,
    pub mab:    MultiheadAttentionBlock<B>,
}

#[derive(Module, Debug)]
pub struct SetAttentionBlock<B: Backend> {
    pub mab:    MultiheadAttentionBlock<B>,
    pub induce: Option<InducedPoints<B>>,
}

impl<B: Backend> SetAttentionBlock<B> {
    /// x: [batch, n, D], pad_mask: [batch, n] (true = padding)
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        match &self.induce {
            None => self.mab.forward(x.clone(), x, pad_mask),
            Some(induce) => {
                let [batch, _, dim] = x.dims();
                let num_points = induce.points.val().dims()[1];
                let points = induce.points.val().expand([batch, num_points, dim]);
                // inducing points summarise the set, the set reads them back
                let summary = induce.mab.forward(points, x.clone(), pad_mask);
                self.mab.forward(x, summary, None)
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_sab_and_isab_preserve_shape() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random([2, 6, 8], Distribution::Default, &device);

        let sab = SetAttentionConfig::new(8, 2).init::<TestBackend>(&device);
        assert!(sab.induce.is_none());
        assert_eq!(sab.forward(x.clone(), None).dims(), [2, 6, 8]);

        let isab = SetAttentionConfig::new(8, 2)
            .with_num_induce(Some(3))
            .with_pre_layernorm(false)
            .init::<TestBackend>(&device);
        assert_eq!(isab.induce.as_ref().unwrap().points.val().dims(), [1, 3, 8]);
        assert_eq!(isab.forward(x, None).dims(), [2, 6, 8]);
    }
}
