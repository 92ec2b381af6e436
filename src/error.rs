// ============================================================
// Library Error Type
// ============================================================
// Every model, hierarchy and tokenizer operation in the library
// returns this error. The application and CLI layers wrap it in
// anyhow with extra context.
//
// Construction-time checks (bad hyperparameters, a hierarchy of
// the wrong depth, mismatched embedding widths) surface here
// instead of as panics deep inside a tensor op.

use thiserror::Error;

/// Errors raised by the deepdna library.
#[derive(Debug, Error)]
pub enum DeepDnaError {
    /// A constructor precondition was violated.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration
        message: String,
    },

    /// A taxonomy hierarchy does not have the depth a model was configured for.
    #[error("Hierarchy depth mismatch: expected {expected} ranks, got {actual}")]
    DepthMismatch {
        /// Depth the component was configured with
        expected: usize,
        /// Depth of the supplied hierarchy
        actual: usize,
    },

    /// Two composed tensors or components disagree on a dimension.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// A taxonomy label is not part of the closed vocabulary.
    #[error("Unknown label at rank {rank}: '{label}'")]
    UnknownLabel {
        /// Rank where resolution failed
        rank: usize,
        /// The offending label (or label prefix)
        label: String,
    },

    /// A nucleotide outside the tokenizer alphabet.
    #[error("Invalid base '{base}' at position {position}")]
    InvalidBase {
        /// The offending character
        base: char,
        /// Position in the raw sequence
        position: usize,
    },

    /// An operation received zero items where at least one is required.
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// A serialised hierarchy is structurally broken.
    #[error("Malformed hierarchy: {0}")]
    Hierarchy(String),

    /// JSON (de)serialisation failure.
    #[error("Serialisation error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeepDnaError {
    /// Create an InvalidConfig error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { context: context.into(), expected, actual }
    }
}

/// Library result alias.
pub type Result<T, E = DeepDnaError> = std::result::Result<T, E>;

/// Fail with InvalidConfig unless `cond` holds.
pub(crate) fn ensure(cond: bool, message: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(DeepDnaError::invalid_config(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_passes_and_fails() {
        assert!(ensure(true, || "unused".into()).is_ok());
        let err = ensure(false, || "min_len > max_len".into()).unwrap_err();
        assert!(matches!(err, DeepDnaError::InvalidConfig { .. }));
        assert!(err.to_string().contains("min_len > max_len"));
    }
}
