//! Error types for local prediction

use thiserror::Error;

/// Errors raised while loading a resource description or evaluating it
#[derive(Error, Debug)]
pub enum PredictError {
    /// Resource description is structurally inconsistent
    #[error("Malformed model: {0}")]
    MalformedModel(String),

    /// Input key that does not resolve to a field (strict mode only)
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Ensemble members that were referenced but never supplied
    #[error("Missing dependency: {resource} references unresolved {missing:?}")]
    MissingDependency {
        resource: String,
        missing: Vec<String>,
    },

    /// Option value outside its domain
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// I/O error while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PredictError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedModel(message.into())
    }

    pub(crate) fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption(message.into())
    }
}

impl From<serde_json::Error> for PredictError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedModel(err.to_string())
    }
}

/// Result type for local prediction operations
pub type Result<T> = std::result::Result<T, PredictError>;
