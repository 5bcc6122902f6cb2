//! deepresearch-state: persistence for research workflows
//!
//! This crate owns everything the orchestration engine writes to disk:
//! per-thread workflow checkpoints and the short-lived task status records
//! used by the asynchronous submission service.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: integrity of stored snapshots. Every checkpoint is stored as the
//! exact JSON bytes that were hashed, so tampering or partial writes surface
//! as [`StorageError::DigestMismatch`] on load instead of silently resuming
//! from a damaged state.
//!
//! ## Key Components
//!
//! - [`CheckpointStore`] / [`TaskRegistry`]: async storage seams
//! - [`SurrealCheckpointStore`] / [`SurrealTaskRegistry`]: SurrealDB backends
//! - [`fakes`]: in-memory implementations for tests

pub mod connection;
mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
mod surreal_store;

pub use connection::{
    connect, connect_cloud, connect_from_env, connect_local, CloudConfig, DbTarget,
    DEFAULT_LOCAL_PATH,
};
pub use error::{StateError, StorageError};
pub use storage_traits::{
    CheckpointRecord, CheckpointStore, ContentDigest, StorageResult, TaskRecord, TaskRegistry,
    TaskStatus, ThreadId,
};
pub use surreal_store::{SurrealCheckpointStore, SurrealTaskRegistry};

/// Result type for deepresearch-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
