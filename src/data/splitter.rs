// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles samples and splits them into training and validation
// sets. The caller passes the RNG so a seeded run always produces
// the same split.
//
// split_by_label keeps the label mix of both halves close to the
// full set: each label is shuffled and split on its own, so rare
// genera are not all pushed into one side.

use rand::{seq::SliceRandom, Rng};
use std::collections::BTreeMap;

/// Shuffle `samples` and split into (train, validation).
pub fn split_train_val<T, R: Rng>(mut samples: Vec<T>, train_fraction: f64, rng: &mut R) -> (Vec<T>, Vec<T>) {
    samples.shuffle(rng);

    let total = samples.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let val = samples.split_off(split_at.min(total));

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );
    (samples, val)
}

/// Split every label group separately, then merge and shuffle.
pub fn split_by_label<T, R, F>(samples: Vec<T>, train_fraction: f64, rng: &mut R, label: F) -> (Vec<T>, Vec<T>)
where
    R: Rng,
    F: Fn(&T) -> String,
{
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for sample in samples {
        groups.entry(label(&sample)).or_default().push(sample);
    }

    let (mut train, mut val) = (Vec::new(), Vec::new());
    for (_, group) in groups {
        let (t, v) = split_train_val(group, train_fraction, rng);
        train.extend(t);
        val.extend(v);
    }
    train.shuffle(rng);
    val.shuffle(rng);
    (train, val)
}
