// ============================================================
// Layer 5 — Hierarchical Taxonomy Classifier
// ============================================================
// Maps one embedding per sample to a probability distribution
// over every rank of a TaxonomyHierarchy.
//
// Independent mode:
//   p_r = softmax(Linear_r(x))                    for every rank
//
// Top-down mode:
//   p_0     = softmax(Linear_0(x))
//   z_{r+1} = Linear_{r+1}([x, p_r])
//   p_{r+1}(c) = p_r(parent(c)) · softmax over siblings(c) of z_{r+1}
//
// The sibling softmax normalises within each parent's group of
// children, so every rank still sums to 1 and no child can be
// more likely than its parent.
//
// The child→parent structure of each rank transition is stored
// as constant tensors on the module:
//   parent_index[r]  [n_{r+1}]        parent id of each child
//   membership[r]    [n_{r+1}, n_r]   one-hot of the same
//
// Loss is per-rank cross-entropy on the probabilities, combined
// by a RankLossPolicy.

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::{activation::softmax, TensorData},
};
use serde::{Deserialize, Serialize};

use crate::domain::taxonomy::TaxonomyHierarchy;
use crate::error::{ensure, DeepDnaError, Result};
use crate::ml::losses::{count_correct, rank_cross_entropy};

/// How per-rank losses are combined into one scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RankLossPolicy {
    /// Every rank counts once
    Sum,
    /// One weight per rank, root first
    WeightedSum(Vec<f64>),
}

impl RankLossPolicy {
    /// Resolve into one weight per rank.
    pub fn weights(&self, depth: usize) -> Result<Vec<f64>> {
        match self {
            Self::Sum => Ok(vec![1.0; depth]),
            Self::WeightedSum(weights) if weights.len() == depth => Ok(weights.clone()),
            Self::WeightedSum(weights) => Err(DeepDnaError::invalid_config(format!(
                "{} rank loss weights for a hierarchy of depth {depth}",
                weights.len()
            ))),
        }
    }
}

#[derive(Config, Debug)]
pub struct HierarchicalClassifierConfig {
    pub embed_dim: usize,
    pub depth: usize,
    pub hierarchy: TaxonomyHierarchy,
    #[config(default = false)]
    pub use_top_down_hierarchy: bool,
    #[config(default = "RankLossPolicy::Sum")]
    pub loss_policy: RankLossPolicy,
}

impl HierarchicalClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.embed_dim > 0, || "embed_dim must be positive".into())?;
        if self.hierarchy.depth() != self.depth {
            return Err(DeepDnaError::DepthMismatch { expected: self.depth, actual: self.hierarchy.depth() });
        }
        self.loss_policy.weights(self.depth).map(|_| ())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<HierarchicalClassifier<B>> {
        self.validate()?;
        let sizes = self.hierarchy.vocab_sizes();

        let heads = sizes
            .iter()
            .enumerate()
            .map(|(rank, &n)| {
                let input = match rank {
                    r if r > 0 && self.use_top_down_hierarchy => self.embed_dim + sizes[r - 1],
                    _ => self.embed_dim,
                };
                LinearConfig::new(input, n).init(device)
            })
            .collect();

        let mut parent_index = Vec::new();
        let mut membership = Vec::new();
        if self.use_top_down_hierarchy {
            for rank in 1..self.depth {
                let parents = self.hierarchy.parents(rank);
                let n_parents = sizes[rank - 1];
                let mut one_hot = vec![0.0f32; parents.len() * n_parents];
                for (child, &parent) in parents.iter().enumerate() {
                    one_hot[child * n_parents + parent] = 1.0;
                }
                let ids: Vec<i64> = parents.iter().map(|&p| p as i64).collect();
                parent_index.push(Tensor::from_data(TensorData::new(ids, [parents.len()]), device));
                membership.push(Tensor::from_data(TensorData::new(one_hot, [parents.len(), n_parents]), device));
            }
        }

        tracing::debug!(
            "HierarchicalClassifier: vocab sizes={:?}, top_down={}",
            sizes,
            self.use_top_down_hierarchy
        );
        Ok(HierarchicalClassifier {
            heads,
            parent_index,
            membership,
            rank_weights: self.loss_policy.weights(self.depth)?,
            embed_dim: self.embed_dim,
            top_down: self.use_top_down_hierarchy,
        })
    }
}

/// Per-rank probability distributions, root first: each [batch, n_r].
#[derive(Debug, Clone)]
pub struct HierarchyOutput<B: Backend> {
    pub ranks: Vec<Tensor<B, 2>>,
}

impl<B: Backend> HierarchyOutput<B> {
    /// Most likely taxon id per rank, as [rank][row].
    pub fn predictions(&self) -> Vec<Vec<usize>> {
        self.ranks
            .iter()
            .map(|probs| {
                let [batch, _] = probs.dims();
                probs
                    .clone()
                    .argmax(1)
                    .reshape([batch])
                    .into_data()
                    .iter::<i64>()
                    .map(|id| id as usize)
                    .collect()
            })
            .collect()
    }
}

#[derive(Module, Debug)]
pub struct HierarchicalClassifier<B: Backend> {
    pub heads: Vec<Linear<B>>,
    pub parent_index: Vec<Tensor<B, 1, Int>>,
    pub membership: Vec<Tensor<B, 2>>,
    pub rank_weights: Vec<f64>,
    pub embed_dim: usize,
    pub top_down: bool,
}

impl<B: Backend> HierarchicalClassifier<B> {
    pub fn depth(&self) -> usize {
        self.heads.len()
    }

    /// x: [batch, D] → one distribution per rank.
    pub fn forward(&self, x: Tensor<B, 2>) -> Result<HierarchyOutput<B>> {
        let [_, dim] = x.dims();
        if dim != self.embed_dim {
            return Err(DeepDnaError::dimension_mismatch("classifier input embed_dim", self.embed_dim, dim));
        }

        let mut ranks: Vec<Tensor<B, 2>> = Vec::with_capacity(self.depth());
        for (rank, head) in self.heads.iter().enumerate() {
            let probs = match ranks.last() {
                Some(previous) if self.top_down => {
                    let logits = head.forward(Tensor::cat(vec![x.clone(), previous.clone()], 1));
                    let parent_index = self.parent_index[rank - 1].clone();
                    let siblings = sibling_softmax(logits, self.membership[rank - 1].clone(), parent_index.clone());
                    siblings * previous.clone().select(1, parent_index)
                }
                _ => softmax(head.forward(x.clone()), 1),
            };
            ranks.push(probs);
        }
        Ok(HierarchyOutput { ranks })
    }

    /// Weighted sum of per-rank cross-entropies; `targets` is
    /// [batch, depth] taxon ids.
    pub fn loss(&self, output: &HierarchyOutput<B>, targets: Tensor<B, 2, Int>) -> Result<Tensor<B, 1>> {
        let targets = self.rank_targets(output, targets)?;
        let mut total: Option<Tensor<B, 1>> = None;
        for ((probs, target), &weight) in output.ranks.iter().zip(targets).zip(&self.rank_weights) {
            let term = rank_cross_entropy(probs.clone(), target).mul_scalar(weight);
            total = Some(match total {
                Some(sum) => sum + term,
                None => term,
            });
        }
        total.ok_or_else(|| DeepDnaError::EmptyBatch("classifier has no ranks".into()))
    }

    /// Correct predictions per rank.
    pub fn correct_counts(&self, output: &HierarchyOutput<B>, targets: Tensor<B, 2, Int>) -> Result<Vec<usize>> {
        Ok(output
            .ranks
            .iter()
            .zip(self.rank_targets(output, targets)?)
            .map(|(probs, target)| count_correct(probs.clone(), target))
            .collect())
    }

    /// Fraction of correct predictions per rank.
    pub fn accuracy(&self, output: &HierarchyOutput<B>, targets: Tensor<B, 2, Int>) -> Result<Vec<f64>> {
        let [batch, _] = targets.dims();
        let counts = self.correct_counts(output, targets)?;
        Ok(counts.into_iter().map(|c| c as f64 / batch.max(1) as f64).collect())
    }

    fn rank_targets(&self, output: &HierarchyOutput<B>, targets: Tensor<B, 2, Int>) -> Result<Vec<Tensor<B, 1, Int>>> {
        let [batch, depth] = targets.dims();
        if depth != self.depth() || output.ranks.len() != self.depth() {
            return Err(DeepDnaError::DepthMismatch { expected: self.depth(), actual: depth });
        }
        Ok((0..depth)
            .map(|rank| targets.clone().slice([0..batch, rank..rank + 1]).reshape([batch]))
            .collect())
    }
}

/// Softmax of `logits` [batch, n] within each sibling group given by
/// `membership` [n, n_parents] / `parent_index` [n].
fn sibling_softmax<B: Backend>(
    logits: Tensor<B, 2>,
    membership: Tensor<B, 2>,
    parent_index: Tensor<B, 1, Int>,
) -> Tensor<B, 2> {
    let [batch, n] = logits.dims();
    let [_, n_parents] = membership.dims();

    // per-group max keeps exp() in range for every group
    let outside = membership
        .clone()
        .equal_elem(0.0)
        .unsqueeze_dim::<3>(0)
        .expand([batch, n, n_parents]);
    let group_max = logits
        .clone()
        .detach()
        .unsqueeze_dim::<3>(2)
        .expand([batch, n, n_parents])
        .mask_fill(outside, -1.0e9)
        .max_dim(1)
        .reshape([batch, n_parents])
        .select(1, parent_index.clone());

    let exp = (logits - group_max).exp();
    let group_sum = exp.clone().matmul(membership).select(1, parent_index);
    exp / group_sum.clamp_min(1.0e-12)
}

/// Encode full taxonomy labels into [batch, depth] taxon ids.
pub fn encode_labels<B: Backend, S: AsRef<str>>(
    hierarchy: &TaxonomyHierarchy,
    labels: &[S],
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let depth = hierarchy.depth();
    let mut ids = Vec::with_capacity(labels.len() * depth);
    for label in labels {
        ids.extend(hierarchy.encode(label.as_ref())?.into_iter().map(|id| id as i64));
    }
    Ok(Tensor::from_data(TensorData::new(ids, [labels.len(), depth]), device))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::token_encoder::tests::TestBackend;
    use burn::{module::Param, tensor::Distribution};

    pub(crate) const LABELS: [&str; 5] = [
        "k__A; p__X; g__1",
        "k__A; p__X; g__2",
        "k__A; p__Y; g__3",
        "k__B; p__Z; g__4",
        "k__B; p__Z; g__5",
    ];

    pub(crate) fn hierarchy() -> TaxonomyHierarchy {
        TaxonomyHierarchy::build(LABELS, 3).unwrap()
    }

    fn values(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec().unwrap()
    }

    #[test]
    fn test_top_down_rejects_wrong_depth() {
        let device = Default::default();
        let cfg = HierarchicalClassifierConfig::new(8, 6, hierarchy()).with_use_top_down_hierarchy(true);
        assert!(matches!(
            cfg.init::<TestBackend>(&device),
            Err(DeepDnaError::DepthMismatch { expected: 6, actual: 3 })
        ));
    }

    #[test]
    fn test_invalid_weights_and_embed_dim_are_rejected() {
        let device = Default::default();
        let weighted = HierarchicalClassifierConfig::new(8, 3, hierarchy())
            .with_loss_policy(RankLossPolicy::WeightedSum(vec![1.0, 2.0]));
        assert!(weighted.init::<TestBackend>(&device).is_err());
        assert!(HierarchicalClassifierConfig::new(0, 3, hierarchy()).init::<TestBackend>(&device).is_err());
    }

    #[test]
    fn test_every_rank_sums_to_one() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        for top_down in [false, true] {
            let model = HierarchicalClassifierConfig::new(8, 3, hierarchy())
                .with_use_top_down_hierarchy(top_down)
                .init::<TestBackend>(&device)
                .unwrap();
            let out = model.forward(x.clone()).unwrap();
            assert_eq!(out.ranks.iter().map(|p| p.dims()[1]).collect::<Vec<_>>(), vec![2, 3, 5]);
            for probs in out.ranks {
                for row in values(probs.sum_dim(1)) {
                    assert!((row - 1.0).abs() < 1e-5, "top_down={top_down}: {row}");
                }
            }
        }
    }

    #[test]
    fn test_children_of_impossible_parent_get_no_mass() {
        let device = Default::default();
        let mut model = HierarchicalClassifierConfig::new(8, 3, hierarchy())
            .with_use_top_down_hierarchy(true)
            .init::<TestBackend>(&device)
            .unwrap();
        // k__A (id 0) becomes impossible regardless of the input
        model.heads[0].weight = Param::from_tensor(Tensor::zeros([8, 2], &device));
        model.heads[0].bias = Some(Param::from_tensor(Tensor::from_floats([-40.0, 40.0], &device)));

        let x = Tensor::<TestBackend, 2>::random([3, 8], Distribution::Normal(0.0, 1.0), &device);
        let out = model.forward(x).unwrap();
        let h = hierarchy();

        let phyla = values(out.ranks[1].clone());
        let genera = values(out.ranks[2].clone());
        for row in 0..3 {
            for (id, taxon) in h.vocabulary(1).iter().enumerate() {
                if taxon.parent == Some(0) {
                    assert!(phyla[row * 3 + id] < 1e-6);
                }
            }
            for (id, taxon) in h.vocabulary(2).iter().enumerate() {
                let parent = taxon.parent.unwrap();
                assert!(genera[row * 5 + id] <= phyla[row * 3 + parent] + 1e-6);
            }
        }
    }

    #[test]
    fn test_loss_policy_weights_ranks() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);
        let targets = encode_labels::<TestBackend, _>(&hierarchy(), &LABELS, &device).unwrap();

        let mut model = HierarchicalClassifierConfig::new(8, 3, hierarchy())
            .init::<TestBackend>(&device)
            .unwrap();
        let out = model.forward(x).unwrap();
        let summed = model.loss(&out, targets.clone()).unwrap().into_scalar().elem::<f64>();

        model.rank_weights = RankLossPolicy::WeightedSum(vec![1.0, 0.0, 0.0]).weights(3).unwrap();
        let root_only = model.loss(&out, targets.clone()).unwrap().into_scalar().elem::<f64>();
        let root_ce = rank_cross_entropy(out.ranks[0].clone(), targets.slice([0..5, 0..1]).reshape([5]))
            .into_scalar()
            .elem::<f64>();

        assert!((root_only - root_ce).abs() < 1e-5);
        assert!(summed > root_only);
    }

    #[test]
    fn test_accuracy_per_rank() {
        let device = Default::default();
        let model = HierarchicalClassifierConfig::new(8, 3, hierarchy())
            .with_use_top_down_hierarchy(true)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);
        let targets = encode_labels::<TestBackend, _>(&hierarchy(), &LABELS, &device).unwrap();
        let out = model.forward(x).unwrap();

        let accuracy = model.accuracy(&out, targets).unwrap();
        assert_eq!(accuracy.len(), 3);
        assert!(accuracy.iter().all(|a| (0.0..=1.0).contains(a)));
        assert_eq!(out.predictions().iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 5, 5]);
    }

    #[test]
    fn test_unknown_labels_are_rejected() {
        let device = Default::default();
        let err = encode_labels::<TestBackend, _>(&hierarchy(), &["k__A; p__Q; g__1"], &device).unwrap_err();
        assert!(matches!(err, DeepDnaError::UnknownLabel { rank: 1, .. }));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let cfg = HierarchicalClassifierConfig::new(8, 3, hierarchy())
            .with_use_top_down_hierarchy(true)
            .with_loss_policy(RankLossPolicy::WeightedSum(vec![0.5, 1.0, 2.0]));
        let back: HierarchicalClassifierConfig = serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(back.hierarchy, cfg.hierarchy);
        assert_eq!(back.loss_policy, cfg.loss_policy);
        assert!(back.use_top_down_hierarchy);
    }
}
