//! SurrealDB schema migrations and initialization
//!
//! Defines the `checkpoints` and `tasks` tables with their indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all deepresearch tables in SurrealDB.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing deepresearch SurrealDB schema");

    init_checkpoints_table(db).await?;
    init_tasks_table(db).await?;

    info!("deepresearch schema initialization complete");
    Ok(())
}

/// Initialize `checkpoints` table
///
/// Schema:
/// ```text
/// TABLE checkpoints {
///   thread_id:     STRING (unique)
///   revision:      INT
///   stage:         STRING
///   state_json:    STRING (exact bytes that were hashed)
///   state_digest:  STRING (SHA-256 hex of state_json)
///   saved_at:      DATETIME
/// }
/// ```
///
/// One row per thread; saves overwrite the row in place.
async fn init_checkpoints_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing checkpoints table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS checkpoints SCHEMALESS;

        -- One snapshot per thread
        DEFINE INDEX IF NOT EXISTS idx_thread_id ON TABLE checkpoints COLUMNS thread_id UNIQUE;

        -- Listing by stage (e.g. find suspended threads)
        DEFINE INDEX IF NOT EXISTS idx_stage ON TABLE checkpoints COLUMNS stage;
    "#;

    db.query(sql)
        .await?
        .check()
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?;
    debug!("checkpoints table initialized");
    Ok(())
}

/// Initialize `tasks` table
///
/// Schema:
/// ```text
/// TABLE tasks {
///   task_id:     STRING (unique)
///   thread_id:   STRING (indexed)
///   message:     STRING
///   status:      STRING (pending | processing | completed | failed)
///   result:      STRING?
///   error:       STRING?
///   created_at:  DATETIME
///   updated_at:  DATETIME
///   ttl_secs:    INT
/// }
/// ```
///
/// Expiry is evaluated against `updated_at + ttl_secs` at read time.
async fn init_tasks_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing tasks table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tasks SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_task_id ON TABLE tasks COLUMNS task_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_task_thread ON TABLE tasks COLUMNS thread_id;
    "#;

    db.query(sql)
        .await?
        .check()
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?;
    debug!("tasks table initialized");
    Ok(())
}
