//! SurrealDB row types
//!
//! Rows mirror `storage_traits` records and are converted at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// One stored workflow snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub thread_id: String,
    pub revision: u64,
    pub stage: String,
    /// Serialized snapshot, byte-for-byte what `state_digest` covers
    pub state_json: String,
    pub state_digest: String,
    #[serde(with = "surreal_datetime")]
    pub saved_at: DateTime<Utc>,
}

/// Projection used when listing threads.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadRow {
    pub thread_id: String,
}

/// One task status record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub task_id: String,
    pub thread_id: String,
    pub message: String,
    /// "pending" | "processing" | "completed" | "failed"
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    pub ttl_secs: u64,
}
