// ============================================================
// Layer 5 — Sequence Encoder (DNABERT encoder model)
// ============================================================
// Turns raw k-mer id sequences into fixed-size embeddings: the
// class-token output of a trained TokenEncoder.
//
// encode() accepts any number of leading batch dimensions:
//
//   [d0, d1, ..., L]  → flatten → [N, L]
//                     → slices of ≤ chunk_size rows, each run
//                       through the encoder on its own
//                     → concat  → [N, D]
//                     → restore → [d0, d1, ..., D]
//
// Chunking only bounds peak activation memory. Rows never
// interact inside the encoder, so the result does not depend on
// the chunk size.
//
// Once frozen the encoder's parameters stop requiring gradients
// and every embedding it returns is detached.

use burn::prelude::*;

use crate::domain::traits::Freezable;
use crate::error::{ensure, DeepDnaError, Result};
use crate::ml::token_encoder::{split_class_token, TokenEncoder, TokenEncoderConfig};

#[derive(Config, Debug)]
pub struct SequenceEncoderConfig {
    pub base: TokenEncoderConfig,
    /// Default rows per forward slice in `encode`
    #[config(default = 256)]
    pub chunk_size: usize,
}

impl SequenceEncoderConfig {
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        ensure(self.chunk_size > 0, || "chunk_size must be at least 1".into())
    }

    /// Build with a freshly initialised token encoder.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SequenceEncoder<B>> {
        self.validate()?;
        let base = self.base.init(device)?;
        self.wrap(base)
    }

    /// Wrap an already trained token encoder.
    pub fn wrap<B: Backend>(&self, base: TokenEncoder<B>) -> Result<SequenceEncoder<B>> {
        self.validate()?;
        if base.token_length != self.base.token_length() {
            return Err(DeepDnaError::dimension_mismatch(
                "wrapped token encoder length",
                self.base.token_length(),
                base.token_length,
            ));
        }
        if base.embed_dim != self.base.embed_dim {
            return Err(DeepDnaError::dimension_mismatch(
                "wrapped token encoder embed_dim",
                self.base.embed_dim,
                base.embed_dim,
            ));
        }
        Ok(SequenceEncoder {
            base,
            chunk_size: self.chunk_size,
            num_reserved: self.base.num_reserved_tokens(),
            trainable: true,
        })
    }
}

#[derive(Module, Debug)]
pub struct SequenceEncoder<B: Backend> {
    pub base: TokenEncoder<B>,
    pub chunk_size: usize,
    pub num_reserved: usize,
    pub trainable: bool,
}

impl<B: Backend> SequenceEncoder<B> {
    pub fn embed_dim(&self) -> usize {
        self.base.embed_dim
    }

    pub fn token_length(&self) -> usize {
        self.base.token_length
    }

    /// Raw ids [N, L] → class-token embeddings [N, D].
    pub fn forward(&self, raw_tokens: Tensor<B, 2, Int>) -> Result<Tensor<B, 2>> {
        let encoded = self.base.forward(raw_tokens.add_scalar(self.num_reserved as i64))?;
        let (class_token, _) = split_class_token(encoded);
        Ok(if self.trainable { class_token } else { class_token.detach() })
    }

    /// Embed raw ids of shape [..., L] into [..., D], `chunk_size`
    /// rows at a time (the configured default when None).
    pub fn encode<const D: usize>(&self, batch: Tensor<B, D, Int>, chunk_size: Option<usize>) -> Result<Tensor<B, D>> {
        let chunk_size = chunk_size.unwrap_or(self.chunk_size);
        if chunk_size == 0 {
            return Err(DeepDnaError::invalid_config("chunk_size must be at least 1"));
        }

        let dims = batch.dims();
        let len = dims[D - 1];
        let rows: usize = dims[..D - 1].iter().product();
        if rows == 0 {
            return Err(DeepDnaError::EmptyBatch("nothing to encode".into()));
        }

        let flat: Tensor<B, 2, Int> = batch.reshape([rows, len]);
        let mut slices = Vec::with_capacity(rows.div_ceil(chunk_size));
        for start in (0..rows).step_by(chunk_size) {
            let end = (start + chunk_size).min(rows);
            slices.push(self.forward(flat.clone().slice([start..end, 0..len]))?);
        }
        tracing::trace!("Encoded {} sequences in {} slices", rows, slices.len());

        let mut shape = dims;
        shape[D - 1] = self.embed_dim();
        Ok(Tensor::cat(slices, 0).reshape(shape))
    }
}

impl<B: Backend> Freezable for SequenceEncoder<B> {
    fn is_trainable(&self) -> bool {
        self.trainable
    }

    fn freeze(self) -> Self {
        Self { trainable: false, ..self.no_grad() }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::token_encoder::tests::{raw_tokens, small_config, TestBackend};

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec().unwrap()
    }

    #[test]
    fn test_chunk_size_does_not_change_embeddings() {
        let device = Default::default();
        let encoder = SequenceEncoderConfig::new(small_config())
            .init::<TestBackend>(&device)
            .unwrap();
        let tokens = raw_tokens::<TestBackend>(7, 10, 64, &device);
        let reference = values(encoder.encode(tokens.clone(), Some(100)).unwrap());

        for chunk in [1, 2, 3, 7] {
            let chunked = values(encoder.encode(tokens.clone(), Some(chunk)).unwrap());
            assert_eq!(chunked.len(), reference.len());
            for (a, b) in chunked.iter().zip(&reference) {
                assert!((a - b).abs() < 1e-5, "chunk {chunk}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_encode_restores_leading_shape() {
        let device = Default::default();
        let encoder = SequenceEncoderConfig::new(small_config())
            .with_chunk_size(4)
            .init::<TestBackend>(&device)
            .unwrap();
        let flat = raw_tokens::<TestBackend>(6, 10, 64, &device);
        let nested: Tensor<TestBackend, 3, Int> = flat.clone().reshape([2, 3, 10]);

        let out = encoder.encode(nested, None).unwrap();
        assert_eq!(out.dims(), [2, 3, 8]);

        // same rows, same embeddings
        let flat_out = values(encoder.encode(flat, None).unwrap());
        for (a, b) in values(out).iter().zip(&flat_out) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let device = Default::default();
        assert!(SequenceEncoderConfig::new(small_config())
            .with_chunk_size(0)
            .init::<TestBackend>(&device)
            .is_err());
        let encoder = SequenceEncoderConfig::new(small_config()).init::<TestBackend>(&device).unwrap();
        let tokens = raw_tokens::<TestBackend>(2, 10, 64, &device);
        assert!(encoder.encode(tokens, Some(0)).is_err());
    }

    #[test]
    fn test_wrap_checks_dimensions() {
        let device = Default::default();
        let base = small_config().init::<TestBackend>(&device).unwrap();
        let other = SequenceEncoderConfig::new(TokenEncoderConfig::new(20, 3, 8, 1, 2));
        assert!(matches!(other.wrap(base), Err(DeepDnaError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_freeze_flips_capability() {
        let device = Default::default();
        let encoder = SequenceEncoderConfig::new(small_config()).init::<TestBackend>(&device).unwrap();
        assert!(encoder.is_trainable());
        assert!(!encoder.freeze().is_trainable());
    }
}
