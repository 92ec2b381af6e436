// ============================================================
// Layer 3 — K-mer Tokenizer
// ============================================================
// Turns a nucleotide string into overlapping k-mer token ids.
//
// Each k-mer is read as a base-4 number (A=0, C=1, G=2, T=3),
// so the raw vocabulary is exactly 4^k ids. A sequence of
// length n yields n - k + 1 tokens.
//
// Example with k = 3:
//   "ACGTA" → ACG, CGT, GTA → [6, 27, 44]
//
// These are RAW ids. The models shift them up to make room for
// their reserved mask/pad sentinels.

use crate::error::{DeepDnaError, Result};

/// Nucleotide alphabet in token order.
pub const BASES: [u8; 4] = *b"ACGT";

/// Sliding-window k-mer tokenizer over the ACGT alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerTokenizer {
    kmer: usize,
}

fn base_index(base: u8) -> Option<u32> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

impl KmerTokenizer {
    pub fn new(kmer: usize) -> Result<Self> {
        // 4^k must fit in a u32 token id
        if kmer == 0 || kmer > 15 {
            return Err(DeepDnaError::invalid_config(format!(
                "kmer must be in 1..=15, got {kmer}"
            )));
        }
        Ok(Self { kmer })
    }

    pub fn kmer(&self) -> usize {
        self.kmer
    }

    /// Size of the raw k-mer vocabulary (4^k).
    pub fn vocab_size(&self) -> usize {
        BASES.len().pow(self.kmer as u32)
    }

    /// Number of tokens produced for a sequence of `len` bases.
    pub fn token_length(&self, len: usize) -> usize {
        len.saturating_sub(self.kmer) + usize::from(len >= self.kmer)
    }

    /// Encode a nucleotide string into raw k-mer ids.
    pub fn encode(&self, sequence: &str) -> Result<Vec<u32>> {
        let bytes = sequence.as_bytes();
        if bytes.len() < self.kmer {
            return Err(DeepDnaError::dimension_mismatch(
                "sequence shorter than kmer",
                self.kmer,
                bytes.len(),
            ));
        }

        let modulus = self.vocab_size() as u32;
        let mut tokens = Vec::with_capacity(self.token_length(bytes.len()));
        let mut rolling = 0u32;
        for (position, &b) in bytes.iter().enumerate() {
            let idx = base_index(b).ok_or(DeepDnaError::InvalidBase { base: b as char, position })?;
            // rolling base-4 window: drop the oldest base, append the new one
            rolling = (rolling * 4 + idx) % modulus;
            if position + 1 >= self.kmer {
                tokens.push(rolling);
            }
        }
        Ok(tokens)
    }

    /// Decode a raw k-mer id back to its bases.
    pub fn decode(&self, token: u32) -> String {
        let mut out = vec![b'A'; self.kmer];
        let mut t = token;
        for slot in out.iter_mut().rev() {
            *slot = BASES[(t % 4) as usize];
            t /= 4;
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_and_token_length() {
        let tok = KmerTokenizer::new(3).unwrap();
        assert_eq!(tok.vocab_size(), 64);
        assert_eq!(tok.token_length(150), 148);
        assert_eq!(tok.token_length(2), 0);
    }

    #[test]
    fn test_encode_known_kmers() {
        let tok = KmerTokenizer::new(3).unwrap();
        assert_eq!(tok.encode("ACGTA").unwrap(), vec![6, 27, 44]);
        assert_eq!(tok.encode("aaa").unwrap(), vec![0]);
        assert_eq!(tok.encode("TTT").unwrap(), vec![63]);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let tok = KmerTokenizer::new(4).unwrap();
        let seq = "GATTACA";
        let decoded: Vec<String> = tok.encode(seq).unwrap().into_iter().map(|t| tok.decode(t)).collect();
        assert_eq!(decoded, vec!["GATT", "ATTA", "TTAC", "TACA"]);
    }

    #[test]
    fn test_invalid_base() {
        let tok = KmerTokenizer::new(3).unwrap();
        let err = tok.encode("ACNGT").unwrap_err();
        assert!(matches!(err, DeepDnaError::InvalidBase { base: 'N', position: 2 }));
    }

    #[test]
    fn test_rejects_short_sequence_and_bad_k() {
        let tok = KmerTokenizer::new(5).unwrap();
        assert!(tok.encode("ACG").is_err());
        assert!(KmerTokenizer::new(0).is_err());
    }
}
