// ============================================================
// Layer 4 — Synthetic Community Generator
// ============================================================
// Stand-in SequenceSource for the CLI: a toy microbial community
// with a balanced taxonomy.
//
//   genus g (0 ≤ g < num_genera)
//     rank r label id = g / branching^(depth - 1 - r)
//     ancestral sequence: uniform random bases
//     reads: ancestor with independent point mutations
//
// Reads of the same genus are therefore close in k-mer space and
// genera that share a family share a label prefix.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::kmer::BASES;
use crate::domain::sequence::LabelledSequence;
use crate::domain::taxonomy::DEFAULT_RANK_NAMES;
use crate::domain::traits::SequenceSource;
use crate::error::{ensure, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub num_genera: usize,
    pub reads_per_genus: usize,
    pub sequence_length: usize,
    /// Number of taxonomy ranks in each label
    pub depth: usize,
    /// Children per taxon between consecutive ranks
    pub branching: usize,
    /// Per-base substitution probability
    pub mutation_rate: f64,
    /// None draws a fresh seed
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_genera: 8,
            reads_per_genus: 64,
            sequence_length: 150,
            depth: 3,
            branching: 2,
            mutation_rate: 0.02,
            seed: Some(42),
        }
    }
}

pub struct SyntheticCommunity {
    config: SyntheticConfig,
}

impl SyntheticCommunity {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        ensure(config.num_genera >= 1, || "num_genera must be at least 1".into())?;
        ensure(config.depth >= 1, || "depth must be at least 1".into())?;
        ensure(config.branching >= 1, || "branching must be at least 1".into())?;
        ensure(config.sequence_length >= 1, || "sequence_length must be at least 1".into())?;
        ensure((0.0..=1.0).contains(&config.mutation_rate), || {
            format!("mutation_rate must be in [0, 1], got {}", config.mutation_rate)
        })?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Full label of genus `genus`.
    pub fn label(&self, genus: usize) -> String {
        let depth = self.config.depth;
        (0..depth)
            .map(|rank| {
                let levels_below = (depth - 1 - rank) as u32;
                let id = genus / self.config.branching.saturating_pow(levels_below);
                let prefix = DEFAULT_RANK_NAMES
                    .get(rank)
                    .and_then(|name| name.chars().next())
                    .unwrap_or('r');
                format!("{prefix}__T{rank}_{id}")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(rand::thread_rng()).unwrap_or_else(|_| StdRng::seed_from_u64(0)),
        }
    }
}

impl SequenceSource for SyntheticCommunity {
    fn sequences(&self) -> Result<Vec<LabelledSequence>> {
        let cfg = &self.config;
        let mut rng = self.rng();
        let mut reads = Vec::with_capacity(cfg.num_genera * cfg.reads_per_genus);

        for genus in 0..cfg.num_genera {
            let ancestor: Vec<u8> = (0..cfg.sequence_length)
                .map(|_| BASES[rng.gen_range(0..BASES.len())])
                .collect();
            let label = self.label(genus);
            for _ in 0..cfg.reads_per_genus {
                let read: Vec<u8> = ancestor
                    .iter()
                    .map(|&base| {
                        if rng.gen_bool(cfg.mutation_rate) {
                            *BASES.choose(&mut rng).unwrap_or(&base)
                        } else {
                            base
                        }
                    })
                    .collect();
                reads.push(LabelledSequence::new(String::from_utf8_lossy(&read), label.clone()));
            }
        }

        tracing::info!(
            "Generated {} synthetic reads across {} genera",
            reads.len(),
            cfg.num_genera
        );
        Ok(reads)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::taxonomy::TaxonomyHierarchy;

    fn community() -> SyntheticCommunity {
        SyntheticCommunity::new(SyntheticConfig {
            num_genera: 4,
            reads_per_genus: 3,
            sequence_length: 20,
            ..SyntheticConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_labels_follow_branching() {
        let c = community();
        assert_eq!(c.label(0), "k__T0_0; p__T1_0; c__T2_0");
        assert_eq!(c.label(3), "k__T0_0; p__T1_1; c__T2_3");
    }

    #[test]
    fn test_reads_have_requested_shape_and_alphabet() {
        let reads = community().sequences().unwrap();
        assert_eq!(reads.len(), 12);
        assert!(reads.iter().all(|r| r.sequence.len() == 20));
        assert!(reads.iter().all(|r| r.sequence.bytes().all(|b| BASES.contains(&b))));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        assert_eq!(community().sequences().unwrap(), community().sequences().unwrap());
    }

    #[test]
    fn test_labels_build_a_hierarchy() {
        let reads = community().sequences().unwrap();
        let h = TaxonomyHierarchy::build(reads.iter().map(|r| r.label.as_str()), 3).unwrap();
        assert_eq!(h.vocab_sizes(), vec![1, 2, 4]);
    }

    #[test]
    fn test_sets_group_one_genus() {
        let sets = community().sets(2).unwrap();
        assert_eq!(sets.len(), 8);
        assert!(sets.iter().all(|s| s.members.iter().all(|m| Some(&m.label) == s.label.as_ref())));
    }

    #[test]
    fn test_invalid_mutation_rate_is_rejected() {
        let cfg = SyntheticConfig { mutation_rate: 1.5, ..SyntheticConfig::default() };
        assert!(SyntheticCommunity::new(cfg).is_err());
    }
}
