use thiserror::Error;

/// Main error type for the Vigil supervisor
#[derive(Debug, Error)]
pub enum VigilError {
    // Worker process errors
    #[error("Failed to spawn worker: {0}")]
    SpawnError(String),

    #[error("Failed to stop worker (pid {0}): {1}")]
    StopError(u32, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
