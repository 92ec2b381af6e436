// ============================================================
// Layer 5 — Loss Functions
// ============================================================
// The three objectives used across the system:
//
//   masked_cross_entropy : token reconstruction, averaged over
//                          masked positions only
//   sorted_mse           : order-invariant set reconstruction
//   rank_cross_entropy   : one taxonomy rank, on probabilities
//
// Sorted matching:
//   Masked set items have no identity, so predictions and
//   targets are each sorted along the slot axis (independently
//   per feature) and then compared element-wise. Two equal
//   multisets of vectors always sort to the same matrix, so the
//   loss is exactly zero for any slot permutation; no explicit
//   assignment step is needed. Sorting indices are taken from
//   detached copies and applied with `gather`, which keeps the
//   loss differentiable with respect to the values.

use burn::{prelude::*, tensor::activation::log_softmax};

/// Value written into unused slots of both predictions and targets
/// so they sort to the end and cancel out.
const SORT_FILL: f32 = 1.0e6;

const PROB_EPSILON: f32 = 1.0e-7;

/// Cross-entropy over `[batch, len, vocab]` logits, counting only
/// positions where `mask` is true.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    mask: Tensor<B, 2, Bool>,
) -> Tensor<B, 1> {
    let [batch, len, _] = logits.dims();
    let picked = log_softmax(logits, 2)
        .gather(2, targets.unsqueeze_dim::<3>(2))
        .reshape([batch, len]);
    let weights = mask.float();
    let count = weights.clone().sum().clamp_min(1.0);
    picked.mul(weights).sum().neg().div(count)
}

/// Mean squared error between `predictions` and `targets`
/// ([batch, slots, dim]) after sorting both along the slot axis.
///
/// `valid` ([batch, slots], true = real slot) restricts the mean to
/// real slots; unused slots are overwritten with the same constant
/// on both sides before sorting.
pub fn sorted_mse<B: Backend>(
    predictions: Tensor<B, 3>,
    targets: Tensor<B, 3>,
    valid: Option<Tensor<B, 2, Bool>>,
) -> Tensor<B, 1> {
    let [batch, slots, dim] = predictions.dims();

    let (predictions, targets, count) = match valid {
        Some(valid) => {
            let unused = valid.clone().bool_not().unsqueeze_dim::<3>(2).expand([batch, slots, dim]);
            let count = valid.float().sum().mul_scalar(dim as f64).clamp_min(1.0);
            (
                predictions.mask_fill(unused.clone(), SORT_FILL),
                targets.mask_fill(unused, SORT_FILL),
                count,
            )
        }
        None => {
            let count = Tensor::<B, 1>::from_floats([(batch * slots * dim) as f32], &predictions.device());
            (predictions, targets, count)
        }
    };

    let sorted_predictions = sort_slots(predictions);
    let sorted_targets = sort_slots(targets);
    (sorted_predictions - sorted_targets).powf_scalar(2.0).sum().div(count)
}

fn sort_slots<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    let order = x.clone().detach().argsort(1);
    x.gather(1, order)
}

/// Cross-entropy of `[batch, labels]` probabilities against
/// `[batch]` label ids.
pub fn rank_cross_entropy<B: Backend>(probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch, _] = probs.dims();
    probs
        .clamp_min(PROB_EPSILON)
        .log()
        .gather(1, targets.unsqueeze_dim::<2>(1))
        .reshape([batch])
        .mean()
        .neg()
}

/// Number of rows whose argmax equals the target.
pub fn count_correct<B: Backend>(scores: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch, _] = scores.dims();
    scores
        .argmax(1)
        .reshape([batch])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray;

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_sorted_mse_is_zero_for_any_permutation() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 3>::random([2, 4, 3], Distribution::Default, &device);
        for perm in [[0i64, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]] {
            let idx = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(perm.to_vec(), [4]), &device);
            let predictions = targets.clone().select(1, idx);
            assert_eq!(scalar(sorted_mse(predictions, targets.clone(), None)), 0.0);
        }
    }

    #[test]
    fn test_sorted_mse_positive_for_different_sets() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);
        let predictions = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        assert!((scalar(sorted_mse(predictions, targets, None)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sorted_mse_ignores_unused_slots() {
        let device = Default::default();
        // Slot 1 of set 0 is unused and holds garbage on both sides.
        let predictions = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 99.0, -5.0], [1, 2, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0f32, 2.0, -7.0, 40.0], [1, 2, 2]),
            &device,
        );
        let valid = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true, false], [1, 2]), &device);
        assert_eq!(scalar(sorted_mse(predictions, targets, Some(valid))), 0.0);
    }

    #[test]
    fn test_masked_cross_entropy_counts_only_masked_positions() {
        let device = Default::default();
        // Position 0 predicts its target perfectly, position 1 is
        // badly wrong but unmasked.
        let logits = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![50.0f32, 0.0, 0.0, 0.0, 50.0, 0.0], [1, 2, 3]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![0i64, 2], [1, 2]), &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true, false], [1, 2]), &device);
        assert!(scalar(masked_cross_entropy(logits.clone(), targets.clone(), mask)) < 1e-4);

        let all = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true, true], [1, 2]), &device);
        assert!(scalar(masked_cross_entropy(logits, targets, all)) > 10.0);
    }

    #[test]
    fn test_rank_cross_entropy_and_accuracy() {
        let device = Default::default();
        let probs = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.9f32, 0.1, 0.2, 0.8], [2, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 0], [2]), &device);
        let expected = -(0.9f64.ln() + 0.2f64.ln()) / 2.0;
        assert!((scalar(rank_cross_entropy(probs.clone(), targets.clone())) - expected).abs() < 1e-5);
        assert_eq!(count_correct(probs, targets), 1);
    }
}
