use thiserror::Error;

/// Error type for opaque token operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token must be {expected} characters long, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Token contains characters outside the base32 alphabet")]
    InvalidCharacters,

    #[error("Token digest must be {expected} bytes, got {actual}")]
    InvalidDigest { expected: usize, actual: usize },

    #[error("Random source unavailable: {0}")]
    RandomSource(String),
}
