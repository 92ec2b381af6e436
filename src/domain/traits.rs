// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams the rest of the system programs against:
//
//   SequenceSource : anything that can hand us labelled reads
//                    (a FASTA reader, a database, the synthetic
//                    generator used by the CLI)
//
//   Freezable      : a component that can be cut out of
//                    training. Freezing is a hard boundary:
//                    parameters stop requiring gradients AND the
//                    component's outputs are detached, so no
//                    gradient is ever computed across it.

use crate::domain::sequence::{LabelledSequence, SequenceSet};
use crate::error::Result;

// ─── SequenceSource ───────────────────────────────────────────────────────────
/// Upstream dataset provider.
pub trait SequenceSource {
    /// Every labelled read this source can provide.
    fn sequences(&self) -> Result<Vec<LabelledSequence>>;

    /// Group reads into sets of at most `max_set_len` members.
    /// The default groups reads sharing a label, in source order.
    fn sets(&self, max_set_len: usize) -> Result<Vec<SequenceSet>> {
        let mut by_label: Vec<(String, Vec<LabelledSequence>)> = Vec::new();
        for seq in self.sequences()? {
            match by_label.iter_mut().find(|(label, _)| *label == seq.label) {
                Some((_, members)) => members.push(seq),
                None => by_label.push((seq.label.clone(), vec![seq])),
            }
        }

        let mut sets = Vec::new();
        for (label, members) in by_label {
            for chunk in members.chunks(max_set_len.max(1)) {
                sets.push(SequenceSet {
                    members: chunk.to_vec(),
                    label: Some(label.clone()),
                });
            }
        }
        Ok(sets)
    }
}

// ─── Freezable ────────────────────────────────────────────────────────────────
/// A sub-model whose trainability is an explicit capability.
///
/// Training loops must honour `is_trainable() == false` by never
/// letting gradients cross the component: implementations detach
/// their outputs once frozen.
pub trait Freezable: Sized {
    fn is_trainable(&self) -> bool;

    /// Consume the component and return a frozen copy.
    fn freeze(self) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<LabelledSequence>);

    impl SequenceSource for Fixed {
        fn sequences(&self) -> Result<Vec<LabelledSequence>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_default_sets_group_by_label() {
        let src = Fixed(vec![
            LabelledSequence::new("AAAA", "k__A"),
            LabelledSequence::new("CCCC", "k__B"),
            LabelledSequence::new("GGGG", "k__A"),
            LabelledSequence::new("TTTT", "k__A"),
        ]);
        let sets = src.sets(2).unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].label.as_deref(), Some("k__A"));
        assert_eq!(sets[0].len(), 2);
        assert_eq!(sets[1].len(), 1);
        assert_eq!(sets[2].label.as_deref(), Some("k__B"));
    }
}
