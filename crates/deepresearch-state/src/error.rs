//! Error types for deepresearch-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend I/O or query failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored bytes no longer match the digest recorded at save time.
    #[error("checkpoint digest mismatch for thread {thread_id}: expected {expected}, got {actual}")]
    DigestMismatch {
        thread_id: String,
        expected: String,
        actual: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A digest string was not 64 hex characters.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// The referenced task does not exist (or has expired).
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
