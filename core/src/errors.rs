use thiserror::Error;

/// Companion settings and owner-context errors
#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Layout Error: {0}")]
    LayoutError(String),

    #[error("The file does not exist: {0}")]
    PathNotFound(String),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result type for companion settings operations
pub type CompanionResult<T> = Result<T, CompanionError>;
