//! Storage trait definitions for deepresearch
//!
//! These traits define the persistence seams of the orchestration engine:
//! - `CheckpointStore`: latest workflow snapshot per conversation thread
//! - `TaskRegistry`: short-lived status records for asynchronous submissions
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore : Workflow Snapshots
// ---------------------------------------------------------------------------

/// Identity of a conversation thread. All workflow state is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        ThreadId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        ThreadId(s.to_string())
    }
}

/// A persisted workflow snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub thread_id: ThreadId,
    /// Incremented on every save that changes the stored bytes.
    pub revision: u64,
    /// Stage label at save time (informational, for listings).
    pub stage: String,
    /// The snapshot itself.
    pub state: serde_json::Value,
    /// SHA-256 of the serialized `state` as written.
    pub state_digest: ContentDigest,
    pub saved_at: DateTime<Utc>,
}

/// Encode a snapshot into the exact bytes that are stored and hashed.
pub fn encode_state(state: &serde_json::Value) -> StorageResult<(String, ContentDigest)> {
    let json = serde_json::to_string(state)?;
    let digest = ContentDigest::from_bytes(json.as_bytes());
    Ok((json, digest))
}

/// Verify stored bytes against their recorded digest and decode them.
pub fn decode_state(
    thread_id: &ThreadId,
    json: &str,
    expected: &str,
) -> StorageResult<(serde_json::Value, ContentDigest)> {
    let actual = ContentDigest::from_bytes(json.as_bytes());
    if actual.as_str() != expected {
        return Err(StorageError::DigestMismatch {
            thread_id: thread_id.to_string(),
            expected: expected.to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    let value = serde_json::from_str(json)?;
    Ok((value, actual))
}

/// Latest-snapshot store keyed by thread.
///
/// Guarantees:
/// - `save` is idempotent: saving identical bytes twice leaves one revision.
/// - `load` returns the most recent snapshot, or `None` if nothing is stored.
/// - `load` fails with `StorageError::DigestMismatch` when stored bytes were
///   altered after the save.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `state` as the thread's current snapshot.
    async fn save(
        &self,
        thread_id: &ThreadId,
        stage: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord>;

    /// Load the thread's current snapshot.
    async fn load(&self, thread_id: &ThreadId) -> StorageResult<Option<CheckpointRecord>>;

    /// Remove the thread's snapshot. No-op if absent.
    async fn clear(&self, thread_id: &ThreadId) -> StorageResult<()>;

    /// All threads with a stored snapshot, sorted.
    async fn list_threads(&self) -> StorageResult<Vec<ThreadId>>;
}

// ---------------------------------------------------------------------------
// TaskRegistry : Asynchronous Submission Status
// ---------------------------------------------------------------------------

/// Lifecycle of an asynchronous task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(StorageError::Backend(format!("unknown task status: {other}"))),
        }
    }
}

/// Status record for one submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub thread_id: ThreadId,
    /// The submitted message (or the resume decision).
    pub message: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Time-to-live applied from the last update.
    pub ttl_secs: u64,
}

impl TaskRecord {
    /// A fresh pending task.
    pub fn pending(
        task_id: impl Into<String>,
        thread_id: ThreadId,
        message: impl Into<String>,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            thread_id,
            message: message.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            ttl_secs,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.updated_at + Duration::seconds(self.ttl_secs as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Registry of task status records with expiry.
///
/// Semantics:
/// - `get` treats an expired record as absent.
/// - `update` refreshes the record's expiry window.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Insert or replace a task record.
    async fn put(&self, record: &TaskRecord) -> StorageResult<()>;

    /// Fetch a live task record.
    async fn get(&self, task_id: &str, now: DateTime<Utc>) -> StorageResult<Option<TaskRecord>>;

    /// Transition a live task. Fails with `TaskNotFound` if absent or expired.
    async fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StorageResult<TaskRecord>;

    /// Drop expired records, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_try_from_rejects_short_strings() {
        let err = ContentDigest::try_from("abc".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn test_decode_state_detects_tampering() {
        let thread = ThreadId::new("t-1");
        let (json, digest) = encode_state(&serde_json::json!({"stage": "intake"})).unwrap();
        assert!(decode_state(&thread, &json, digest.as_str()).is_ok());

        let tampered = json.replace("intake", "delivered");
        let err = decode_state(&thread, &tampered, digest.as_str()).unwrap_err();
        assert!(matches!(err, StorageError::DigestMismatch { .. }));
    }

    #[test]
    fn test_task_record_expiry_window() {
        let now = Utc::now();
        let rec = TaskRecord::pending("task-1", ThreadId::new("t"), "hi", 60, now);
        assert!(!rec.is_expired_at(now));
        assert!(rec.is_expired_at(now + Duration::seconds(60)));
    }

    #[test]
    fn test_task_status_parse() {
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert!("unknown".parse::<TaskStatus>().is_err());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }
}
