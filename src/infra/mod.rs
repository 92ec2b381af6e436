// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-backed concerns shared by the training stages:
//
//   checkpoint.rs : model weights (CompactRecorder), the
//                   ModelConfig needed to rebuild the module,
//                   and small JSON side files
//
//   metrics.rs    : epoch-level loss and accuracy appended to
//                   metrics.csv
//
// Reference: Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
