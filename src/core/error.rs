//! Error types for kernel evaluation and surface reconstruction

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter { name: &'static str, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Model not fitted")]
    UnfittedModel,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Block shape mismatch: expected {expected:?}, got {actual:?}")]
    BlockShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Regularized kernel system has no unique solution")]
    SingularSystem,

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl KernelError {
    pub(crate) fn hyperparameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidHyperparameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = KernelError::hyperparameter("alpha", "expected a single number");
        assert_eq!(
            err.to_string(),
            "Invalid hyperparameter `alpha`: expected a single number"
        );

        let err = KernelError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 4, got 3");

        let err = KernelError::BlockShapeMismatch {
            expected: (2, 3),
            actual: (3, 2),
        };
        assert!(err.to_string().contains("(2, 3)"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: KernelError = io.into();
        assert!(matches!(err, KernelError::IoError(_)));
    }
}
