//! SurrealDB-backed CheckpointStore and TaskRegistry implementations
//!
//! Uses `schema::CheckpointRow` and `schema::TaskRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::connection;
use crate::error::StorageError;
use crate::schema::{CheckpointRow, TaskRow, ThreadRow};
use crate::storage_traits::{
    decode_state, encode_state, CheckpointRecord, CheckpointStore, StorageResult, TaskRecord,
    TaskRegistry, TaskStatus, ThreadId,
};

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

// ---------------------------------------------------------------------------
// SurrealCheckpointStore
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`CheckpointStore`].
#[derive(Clone)]
pub struct SurrealCheckpointStore {
    db: Surreal<Any>,
}

impl SurrealCheckpointStore {
    /// Wrap an already-migrated connection.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(connection::connect("mem://").await?))
    }

    async fn fetch(&self, thread_id: &ThreadId) -> StorageResult<Option<CheckpointRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM checkpoints WHERE thread_id = $tid")
            .bind(("tid", thread_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<CheckpointRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl CheckpointStore for SurrealCheckpointStore {
    async fn save(
        &self,
        thread_id: &ThreadId,
        stage: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord> {
        let (json, digest) = encode_state(state)?;
        let existing = self.fetch(thread_id).await?;

        if let Some(row) = existing.as_ref().filter(|r| r.state_digest == digest.as_str()) {
            return Ok(CheckpointRecord {
                thread_id: thread_id.clone(),
                revision: row.revision,
                stage: row.stage.clone(),
                state: state.clone(),
                state_digest: digest,
                saved_at: row.saved_at,
            });
        }

        let row = CheckpointRow {
            id: None,
            thread_id: thread_id.0.clone(),
            revision: existing.as_ref().map(|r| r.revision + 1).unwrap_or(1),
            stage: stage.to_string(),
            state_json: json,
            state_digest: digest.as_str().to_string(),
            saved_at: Utc::now(),
        };

        debug!(thread_id = %thread_id, revision = row.revision, stage, "saving checkpoint");

        if existing.is_some() {
            self.db
                .query("UPDATE checkpoints CONTENT $row WHERE thread_id = $tid")
                .bind(("row", row.clone()))
                .bind(("tid", thread_id.0.clone()))
                .await
                .map_err(backend)?
                .check()
                .map_err(backend)?;
        } else {
            let _created: Option<CheckpointRow> = self
                .db
                .create("checkpoints")
                .content(row.clone())
                .await
                .map_err(backend)?;
        }

        Ok(CheckpointRecord {
            thread_id: thread_id.clone(),
            revision: row.revision,
            stage: row.stage,
            state: state.clone(),
            state_digest: digest,
            saved_at: row.saved_at,
        })
    }

    async fn load(&self, thread_id: &ThreadId) -> StorageResult<Option<CheckpointRecord>> {
        let Some(row) = self.fetch(thread_id).await? else {
            return Ok(None);
        };

        let (state, state_digest) = decode_state(thread_id, &row.state_json, &row.state_digest)?;
        Ok(Some(CheckpointRecord {
            thread_id: thread_id.clone(),
            revision: row.revision,
            stage: row.stage,
            state,
            state_digest,
            saved_at: row.saved_at,
        }))
    }

    async fn clear(&self, thread_id: &ThreadId) -> StorageResult<()> {
        self.db
            .query("DELETE checkpoints WHERE thread_id = $tid")
            .bind(("tid", thread_id.0.clone()))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn list_threads(&self) -> StorageResult<Vec<ThreadId>> {
        let mut res = self
            .db
            .query("SELECT thread_id FROM checkpoints ORDER BY thread_id ASC")
            .await
            .map_err(backend)?;
        let rows: Vec<ThreadRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(|r| ThreadId(r.thread_id)).collect())
    }
}

// ---------------------------------------------------------------------------
// SurrealTaskRegistry
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`TaskRegistry`].
#[derive(Clone)]
pub struct SurrealTaskRegistry {
    db: Surreal<Any>,
}

impl SurrealTaskRegistry {
    /// Wrap an already-migrated connection.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(connection::connect("mem://").await?))
    }

    async fn fetch(&self, task_id: &str) -> StorageResult<Option<TaskRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM tasks WHERE task_id = $tid")
            .bind(("tid", task_id.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<TaskRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    fn row_to_record(row: TaskRow) -> StorageResult<TaskRecord> {
        Ok(TaskRecord {
            task_id: row.task_id,
            thread_id: ThreadId(row.thread_id),
            message: row.message,
            status: row.status.parse()?,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            ttl_secs: row.ttl_secs,
        })
    }

    fn record_to_row(record: &TaskRecord) -> TaskRow {
        TaskRow {
            id: None,
            task_id: record.task_id.clone(),
            thread_id: record.thread_id.0.clone(),
            message: record.message.clone(),
            status: record.status.as_str().to_string(),
            result: record.result.clone(),
            error: record.error.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            ttl_secs: record.ttl_secs,
        }
    }

    async fn write(&self, record: &TaskRecord, exists: bool) -> StorageResult<()> {
        let row = Self::record_to_row(record);
        if exists {
            self.db
                .query("UPDATE tasks CONTENT $row WHERE task_id = $tid")
                .bind(("row", row))
                .bind(("tid", record.task_id.clone()))
                .await
                .map_err(backend)?
                .check()
                .map_err(backend)?;
        } else {
            let _created: Option<TaskRow> = self
                .db
                .create("tasks")
                .content(row)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRegistry for SurrealTaskRegistry {
    async fn put(&self, record: &TaskRecord) -> StorageResult<()> {
        let exists = self.fetch(&record.task_id).await?.is_some();
        self.write(record, exists).await
    }

    async fn get(&self, task_id: &str, now: DateTime<Utc>) -> StorageResult<Option<TaskRecord>> {
        match self.fetch(task_id).await? {
            Some(row) => {
                let record = Self::row_to_record(row)?;
                Ok((!record.is_expired_at(now)).then_some(record))
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StorageResult<TaskRecord> {
        let mut record = self
            .get(task_id, now)
            .await?
            .ok_or_else(|| StorageError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        record.status = status;
        record.result = result;
        record.error = error;
        record.updated_at = now;
        self.write(&record, true).await?;
        Ok(record)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut res = self
            .db
            .query("SELECT * FROM tasks")
            .await
            .map_err(backend)?;
        let rows: Vec<TaskRow> = res.take(0).map_err(backend)?;

        let expired: Vec<String> = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<StorageResult<Vec<_>>>()?
            .into_iter()
            .filter(|r| r.is_expired_at(now))
            .map(|r| r.task_id)
            .collect();

        if !expired.is_empty() {
            self.db
                .query("DELETE tasks WHERE task_id IN $ids")
                .bind(("ids", expired.clone()))
                .await
                .map_err(backend)?
                .check()
                .map_err(backend)?;
        }
        Ok(expired.len())
    }
}
