#![recursion_limit = "256"]

//! Hierarchical DNA representation learning with Burn.
//!
//! DNABERT encodes single reads from overlapping k-mer tokens,
//! SetBERT aggregates a set of read embeddings into one sample
//! embedding, and a hierarchical classifier predicts a taxon per
//! rank from either.

pub mod error;

pub mod domain;
pub mod data;
pub mod ml;
pub mod infra;

pub mod application;
pub mod cli;

pub use error::{DeepDnaError, Result};
