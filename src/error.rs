//! Error taxonomy
//!
//! Programmer errors (malformed shapes, out-of-range K) surface as `Err`.
//! Expected statistical outcomes such as non-convergence are reported through
//! flags on the returned records instead.

#[derive(Debug, thiserror::Error)]
pub enum CdmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient data: {available} usable responses, {required} required")]
    InsufficientData { available: usize, required: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl CdmError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CdmError::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CdmError>;
