// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types for the concepts the models work with:
// reads, sets of reads, k-mer tokens and the taxonomy tree.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// Labelled reads and sets of reads
pub mod sequence;

// Sliding-window k-mer tokenisation
pub mod kmer;

// Fixed-depth taxonomy tree with closed per-rank vocabularies
pub mod taxonomy;

// Core abstractions (traits) that other layers implement
pub mod traits;
