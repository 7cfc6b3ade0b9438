//! Error types for logging setup

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// A global subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Invalid filter directives or file settings
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
