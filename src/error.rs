//! Error types for the modelmux scoring engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for modelmux operations
pub type Result<T> = std::result::Result<T, ModelMuxError>;

/// Main error type for the scoring engine
#[derive(Error, Debug)]
pub enum ModelMuxError {
    #[error("No model with ID '{0}'")]
    ModelNotFound(Uuid),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Feature vector does not match model configuration: {0}")]
    ConfigMismatch(String),

    #[error("Instance pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Instance pool is closed")]
    PoolClosed,

    #[error("Could not populate instance pool: {0}")]
    PoolInit(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelMuxError {
    /// Stable machine-readable tag for the wire protocol and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelMuxError::ModelNotFound(_) => "model_not_found",
            ModelMuxError::Scoring(_) => "scoring",
            ModelMuxError::ConfigMismatch(_) => "config_mismatch",
            ModelMuxError::PoolExhausted { .. } => "pool_exhausted",
            ModelMuxError::PoolClosed => "pool_closed",
            ModelMuxError::PoolInit(_) => "pool_init",
            ModelMuxError::Persistence(_) => "persistence",
            ModelMuxError::Protocol(_) => "protocol",
            ModelMuxError::Config(_) => "config",
            ModelMuxError::Io(_) => "io",
            ModelMuxError::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelMuxError::Scoring("bad input".to_string());
        assert_eq!(err.to_string(), "Scoring error: bad input");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ModelMuxError = io_err.into();
        assert!(matches!(err, ModelMuxError::Io(_)));
        assert_eq!(err.kind(), "io");
    }
}
