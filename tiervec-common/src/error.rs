//! Error types for TierVec

use thiserror::Error;

use crate::types::VectorId;

/// Result type for TierVec operations
pub type Result<T> = std::result::Result<T, Error>;

/// TierVec error types
#[derive(Error, Debug)]
pub enum Error {
    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node not found: {0}")]
    NotFound(VectorId),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Parameter errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Persistence errors
    #[error("Corrupt index format: {0}")]
    CorruptFormat(String),

    // Capacity errors
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Check if error indicates a corrupt on-disk index
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptFormat(_))
    }

    /// Check if error is a per-node read failure that batch paths absorb
    pub fn is_absorbable(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = Error::DimensionMismatch {
            expected: 128,
            actual: 64,
        };
        assert_eq!(
            err.to_string(),
            "Vector dimension mismatch: expected 128, got 64"
        );
    }

    #[test]
    fn test_absorbable_classification() {
        assert!(Error::NotFound(7).is_absorbable());
        assert!(!Error::InvalidParameter("k=0".into()).is_absorbable());
    }
}
