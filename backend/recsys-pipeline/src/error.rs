use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing record fields (null/negative timestamps, non-finite scores).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required input artifact does not exist.
    #[error("Missing upstream artifact: {0}")]
    MissingUpstreamArtifact(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Fatal errors abort the run; only the ranker artifact lookup is allowed to recover.
    pub fn is_missing_artifact(&self) -> bool {
        matches!(self, PipelineError::MissingUpstreamArtifact(_))
    }
}

// Implement conversions from other error types
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

impl From<tempfile::PersistError> for PipelineError {
    fn from(err: tempfile::PersistError) -> Self {
        PipelineError::Io(err.error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: PipelineError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(!err.is_missing_artifact());
    }

    #[test]
    fn test_display_prefix() {
        let err = PipelineError::MissingUpstreamArtifact("candidates_val.jsonl".to_string());
        assert!(err.is_missing_artifact());
        assert_eq!(
            err.to_string(),
            "Missing upstream artifact: candidates_val.jsonl"
        );
    }
}
