//! Error types shared across the crate.

use thiserror::Error;

/// Errors produced by the alignment engine and its model tables.
#[derive(Debug, Error)]
pub enum Error {
    /// Input that violates a documented precondition.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Two jump tables built under incompatible configurations were merged.
    #[error("jump table shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The Viterbi backtrace reached a state that cannot occur in a
    /// well-formed trellis.
    #[error("malformed trellis: {0}")]
    MalformedTrellis(String),

    /// Serialized model data that does not match the expected layout.
    #[error("corrupt model data: {0}")]
    Corrupt(String),

    /// Underlying I/O failure while reading or writing a model.
    #[error("model i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for alignment operations
pub type Result<T> = std::result::Result<T, Error>;
