use thiserror::Error;

/// Top-level error type for the askgate system.
///
/// Subsystem crates define their own error types and convert from
/// `AskgateError` where they need to, so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AskgateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for AskgateError {
    fn from(err: toml::de::Error) -> Self {
        AskgateError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AskgateError {
    fn from(err: toml::ser::Error) -> Self {
        AskgateError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AskgateError {
    fn from(err: serde_json::Error) -> Self {
        AskgateError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for askgate operations.
pub type Result<T> = std::result::Result<T, AskgateError>;
