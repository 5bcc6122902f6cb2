//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryCheckpointStore` and `MemoryTaskRegistry` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    revision: u64,
    stage: String,
    json: String,
    digest: ContentDigest,
    saved_at: DateTime<Utc>,
}

/// In-memory checkpoint store backed by a `HashMap<thread_id, snapshot>`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<HashMap<String, StoredCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a thread's stored bytes without touching the recorded digest.
    ///
    /// Simulates on-disk corruption so callers can exercise recovery paths.
    pub fn overwrite_raw(&self, thread_id: &ThreadId, json: &str) {
        let mut snapshots = self.snapshots.lock().unwrap();
        if let Some(stored) = snapshots.get_mut(thread_id.as_str()) {
            stored.json = json.to_string();
        }
    }

    /// Number of saves that changed a thread's bytes.
    pub fn revision(&self, thread_id: &ThreadId) -> Option<u64> {
        let snapshots = self.snapshots.lock().unwrap();
        snapshots.get(thread_id.as_str()).map(|s| s.revision)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        thread_id: &ThreadId,
        stage: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord> {
        let (json, digest) = encode_state(state)?;
        let mut snapshots = self.snapshots.lock().unwrap();

        let stored = match snapshots.get(thread_id.as_str()) {
            Some(existing) if existing.digest == digest => existing.clone(),
            Some(existing) => StoredCheckpoint {
                revision: existing.revision + 1,
                stage: stage.to_string(),
                json,
                digest,
                saved_at: Utc::now(),
            },
            None => StoredCheckpoint {
                revision: 1,
                stage: stage.to_string(),
                json,
                digest,
                saved_at: Utc::now(),
            },
        };
        snapshots.insert(thread_id.0.clone(), stored.clone());

        Ok(CheckpointRecord {
            thread_id: thread_id.clone(),
            revision: stored.revision,
            stage: stored.stage,
            state: state.clone(),
            state_digest: stored.digest,
            saved_at: stored.saved_at,
        })
    }

    async fn load(&self, thread_id: &ThreadId) -> StorageResult<Option<CheckpointRecord>> {
        let stored = {
            let snapshots = self.snapshots.lock().unwrap();
            match snapshots.get(thread_id.as_str()) {
                Some(s) => s.clone(),
                None => return Ok(None),
            }
        };

        let (state, state_digest) = decode_state(thread_id, &stored.json, stored.digest.as_str())?;
        Ok(Some(CheckpointRecord {
            thread_id: thread_id.clone(),
            revision: stored.revision,
            stage: stored.stage,
            state,
            state_digest,
            saved_at: stored.saved_at,
        }))
    }

    async fn clear(&self, thread_id: &ThreadId) -> StorageResult<()> {
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.remove(thread_id.as_str());
        Ok(())
    }

    async fn list_threads(&self) -> StorageResult<Vec<ThreadId>> {
        let snapshots = self.snapshots.lock().unwrap();
        let mut threads: Vec<ThreadId> = snapshots.keys().map(|k| ThreadId(k.clone())).collect();
        threads.sort();
        Ok(threads)
    }
}

// ---------------------------------------------------------------------------
// MemoryTaskRegistry
// ---------------------------------------------------------------------------

/// In-memory task registry backed by a `HashMap<task_id, TaskRecord>`.
#[derive(Debug, Default)]
pub struct MemoryTaskRegistry {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRegistry for MemoryTaskRegistry {
    async fn put(&self, record: &TaskRecord) -> StorageResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str, now: DateTime<Utc>) -> StorageResult<Option<TaskRecord>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .get(task_id)
            .filter(|r| !r.is_expired_at(now))
            .cloned())
    }

    async fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StorageResult<TaskRecord> {
        let mut tasks = self.tasks.lock().unwrap();
        let record = tasks
            .get_mut(task_id)
            .filter(|r| !r.is_expired_at(now))
            .ok_or_else(|| StorageError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        record.status = status;
        record.result = result;
        record.error = error;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, r| !r.is_expired_at(now));
        Ok(before - tasks.len())
    }
}
