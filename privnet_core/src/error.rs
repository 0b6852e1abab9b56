use thiserror::Error;

/// Failures surfaced by the privacy core. Nothing here is retried internally.
#[derive(Debug, Error)]
pub enum PrivNetError {
    #[error("malformed key material: {reason}")]
    InvalidKey { reason: &'static str },

    #[error("malformed ciphertext: {reason}")]
    InvalidCiphertext { reason: &'static str },

    #[error("value {value} does not fit the fixed-point code range at scale {scale}")]
    QuantizationOverflow { value: f64, scale: f64 },

    #[error("dimension mismatch: left operand {left:?}, right operand {right:?}")]
    DimensionMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error("entropy source unavailable")]
    EntropyUnavailable,

    #[error("scale must be finite and positive, got {0}")]
    InvalidScale(f64),

    #[error("shape {shape:?} describes {expected} elements but {found} were supplied")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },

    #[error("masked linear operations need integral weights, found {0}")]
    NonIntegralWeights(f64),

    #[error("serialization version mismatch for {context}: expected {expected}, found {found}")]
    VersionMismatch {
        context: &'static str,
        expected: u16,
        found: u16,
    },

    #[error("AEAD operation failed")]
    AeadFailure,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = PrivNetError> = std::result::Result<T, E>;
