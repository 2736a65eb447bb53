use thiserror::Error;

#[derive(Error, Debug)]
pub enum VikingError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("dependency not met: {0}")]
    DependencyNotMet(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("parse failed: {0}")]
    ParseFailed(String),

    #[error("capacity exceeded: current={current} new={requested} max={max}")]
    CapacityExceeded {
        current: usize,
        requested: usize,
        max: usize,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type VikingResult<T> = Result<T, VikingError>;

impl VikingError {
    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, VikingError::Http(_) | VikingError::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = VikingError::NotFound("viking://resources/docs".into());
        assert_eq!(err.to_string(), "not found: viking://resources/docs");

        let err = VikingError::CapacityExceeded {
            current: 90,
            requested: 20,
            max: 100,
        };
        assert!(err.to_string().contains("max=100"));

        let err = VikingError::InvalidState("session closed".into());
        assert!(err.to_string().contains("session closed"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VikingError>();
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VikingError = io_err.into();
        assert!(matches!(err, VikingError::Io(_)));
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: VikingError = json_err.into();
        assert!(matches!(err, VikingError::Serialization(_)));
    }

    #[test]
    fn transient_classification() {
        assert!(VikingError::Provider("503".into()).is_transient());
        assert!(!VikingError::Cancelled.is_transient());
        assert!(!VikingError::NotFound("x".into()).is_transient());
    }
}
