// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal: train a
// pipeline stage, or look inside a trained checkpoint.
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No argument parsing here (that's Layer 1)
//   - Files are only touched through Layer 6 (infra)
//
// Stages chain through checkpoint directories:
//
//   pretrain DNABERT ──▶ pretrain SetBERT ──▶ train taxonomy
//          └──────────────────────────────────────▲

// Rebuilding models from earlier checkpoints
pub mod model_store;

// The training workflow
pub mod train_use_case;

// Checkpoint summaries and predictions
pub mod inspect_use_case;
