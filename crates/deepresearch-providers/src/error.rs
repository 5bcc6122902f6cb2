//! Error types for deepresearch-providers

use deepresearch_core::{GuardError, ReasoningError, SearchError};
use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors raised by HTTP collaborators.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A required environment variable is missing.
    #[error("environment variable {key} is not set")]
    MissingEnv { key: String },

    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    /// The request never produced a response.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

impl From<ProviderError> for ReasoningError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Api { status, body } => ReasoningError::Api { status, body },
            ProviderError::Decode(msg) => ReasoningError::Malformed(msg),
            other => ReasoningError::Transport(other.to_string()),
        }
    }
}

impl From<ProviderError> for GuardError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Api { status, body } => GuardError::Api { status, body },
            ProviderError::Decode(msg) => GuardError::Malformed(msg),
            other => GuardError::Transport(other.to_string()),
        }
    }
}

impl From<ProviderError> for SearchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Api { status, body } => SearchError::Api { status, body },
            ProviderError::Decode(msg) => SearchError::Malformed(msg),
            other => SearchError::Transport(other.to_string()),
        }
    }
}
