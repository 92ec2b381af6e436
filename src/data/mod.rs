// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From labelled reads to tensor batches:
//
//   SequenceSource (SyntheticCommunity)
//       │  labelled reads, or sets grouped by label
//       ▼
//   split_by_label    → stratified train / validation split
//       │
//       ▼
//   SampleEncoder     → k-mer token ids (+ taxon ids per rank)
//       │
//       ▼
//   Sequence/SetDataset → Burn's Dataset trait
//       │
//       ▼
//   Sequence/SetBatcher → padded tensor batches
//       │
//       ▼
//   DataLoader        → feeds the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Seeded generator of labelled reads with a known taxonomy
pub mod synthetic;

/// Implements Burn's Dataset trait for read and set samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Shuffles and splits data into train/validation sets
pub mod splitter;
