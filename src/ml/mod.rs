// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model architecture, losses and the training loop.
//
// Components wrap one another, each owning exactly one base:
//
//   TokenEncoder ──▶ TokenMaskedPretrainer            (DNABERT pretraining)
//        │
//        ▼
//   SequenceEncoder ──▶ SequenceTaxonomyModel         (read classification)
//        │ (frozen)
//        ▼
//   SetAggregator ──▶ SetMaskedPretrainer             (SetBERT pretraining)
//        │
//        ▼
//   SetTaxonomyModel                                  (set classification)
//
// What's in this layer:
//
//   attention.rs        : multi-head attention with relative positions
//   token_encoder.rs    : k-mer embedding + class token + encoder blocks
//   token_pretrain.rs   : masked span sampling and reconstruction head
//   sequence_encoder.rs : one embedding per read, chunked inference
//   set_attention.rs    : SAB / ISAB blocks with padding masks
//   set_aggregator.rs   : permutation-equivariant set transformer
//   set_pretrain.rs     : masked set member reconstruction
//   taxonomy_head.rs    : per-rank heads, optional top-down conditioning
//   taxonomy_model.rs   : encoder + classifier compositions
//   losses.rs           : masked CE, sorted-match MSE, rank CE
//   models.rs           : closed registry of model configs
//   trainer.rs          : shared epoch loop (Adam, validation, checkpoints)
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Ji et al. (2021) DNABERT
//            Lee et al. (2019) Set Transformer

pub mod attention;
pub mod token_encoder;
pub mod token_pretrain;
pub mod sequence_encoder;

pub mod set_attention;
pub mod set_aggregator;
pub mod set_pretrain;

pub mod taxonomy_head;
pub mod taxonomy_model;

pub mod losses;

/// Serialisable registry of every buildable model
pub mod models;

/// Full training loop with validation and checkpointing
pub mod trainer;
