//! Asynchronous submission service.
//!
//! The transport-facing contract: `submit` and `resume` record a task and
//! return at once; the workflow runs on a background task bounded by a
//! semaphore; `status` reports progress until the record expires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deepresearch_state::{StorageError, TaskRecord, TaskRegistry, TaskStatus, ThreadId};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::config::ServiceSettings;
use crate::domain::{Decision, Outcome};
use crate::interrupt::ResumeRequest;
use crate::obs;
use crate::orchestrator::Orchestrator;
use crate::prompts;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("task {task_id} not found or expired")]
    TaskNotFound { task_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// A new research message. Without a thread id a fresh thread is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

impl SubmitRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thread_id: None,
        }
    }

    pub fn on_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

/// Returned immediately by `submit` and `resume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub thread_id: ThreadId,
    pub status: TaskStatus,
}

/// What a caller sees when polling a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub thread_id: ThreadId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        Self {
            result: record
                .result
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok()),
            task_id: record.task_id,
            thread_id: record.thread_id,
            status: record.status,
            error: record.error,
        }
    }
}

#[derive(Debug, Clone)]
enum Job {
    Submit { thread_id: ThreadId, message: String },
    Resume(ResumeRequest),
}

pub struct ResearchService {
    orchestrator: Arc<Orchestrator>,
    tasks: Arc<dyn TaskRegistry>,
    permits: Arc<Semaphore>,
    ttl_secs: u64,
}

impl ResearchService {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        tasks: Arc<dyn TaskRegistry>,
        settings: &ServiceSettings,
    ) -> Self {
        Self {
            orchestrator,
            tasks,
            permits: Arc::new(Semaphore::new(settings.max_inflight.max(1))),
            ttl_secs: settings.task_ttl_secs,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Record a pending task for `request` and start processing it.
    pub async fn submit(&self, request: SubmitRequest) -> ServiceResult<TaskHandle> {
        let thread_id = request
            .thread_id
            .unwrap_or_else(|| ThreadId::new(Uuid::new_v4().to_string()));
        let handle = self.record(&thread_id, &request.message).await?;
        self.spawn(
            &handle,
            Job::Submit {
                thread_id,
                message: request.message,
            },
        );
        Ok(handle)
    }

    /// Record a pending task for a resume decision and start processing it.
    pub async fn resume(&self, request: ResumeRequest) -> ServiceResult<TaskHandle> {
        let message = match request.decision {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        };
        let handle = self.record(&request.thread_id, message).await?;
        self.spawn(&handle, Job::Resume(request));
        Ok(handle)
    }

    /// Current view of a live task.
    pub async fn status(&self, task_id: &str) -> ServiceResult<TaskView> {
        self.tasks
            .get(task_id, Utc::now())
            .await?
            .map(TaskView::from)
            .ok_or_else(|| ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Poll until the task finishes or `max_wait` elapses, returning the last
    /// view either way.
    pub async fn wait_for(
        &self,
        task_id: &str,
        poll: Duration,
        max_wait: Duration,
    ) -> ServiceResult<TaskView> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let view = self.status(task_id).await?;
            if view.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(view);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Drop expired task records.
    pub async fn purge_expired(&self) -> ServiceResult<usize> {
        Ok(self.tasks.purge_expired(Utc::now()).await?)
    }

    async fn record(&self, thread_id: &ThreadId, message: &str) -> ServiceResult<TaskHandle> {
        let record = TaskRecord::pending(
            Uuid::new_v4().to_string(),
            thread_id.clone(),
            message,
            self.ttl_secs,
            Utc::now(),
        );
        self.tasks.put(&record).await?;
        Ok(TaskHandle {
            task_id: record.task_id,
            thread_id: record.thread_id,
            status: record.status,
        })
    }

    fn spawn(&self, handle: &TaskHandle, job: Job) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let tasks = Arc::clone(&self.tasks);
        let permits = Arc::clone(&self.permits);
        let task_id = handle.task_id.clone();
        let span = obs::task_span(&handle.task_id, handle.thread_id.as_str());

        tokio::spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if let Err(e) = tasks
                    .update(&task_id, TaskStatus::Processing, None, None, Utc::now())
                    .await
                {
                    obs::emit_task_failed(&task_id, &e);
                    return;
                }

                let outcome = match &job {
                    Job::Submit { thread_id, message } => {
                        orchestrator.submit(thread_id, message).await
                    }
                    Job::Resume(request) => orchestrator.resume(request).await,
                };

                let (status, result, error) = match outcome {
                    Ok(outcome) => match serde_json::to_string(&outcome) {
                        Ok(json) => (TaskStatus::Completed, Some(json), None),
                        Err(e) => {
                            obs::emit_task_failed(&task_id, &e);
                            (
                                TaskStatus::Failed,
                                None,
                                Some(prompts::PROCESSING_FAILED.to_string()),
                            )
                        }
                    },
                    Err(e) if e.is_user_facing() => {
                        debug!(error = %e, "task rejected");
                        (TaskStatus::Failed, None, Some(e.to_string()))
                    }
                    Err(e) => {
                        obs::emit_task_failed(&task_id, &e);
                        (
                            TaskStatus::Failed,
                            None,
                            Some(prompts::PROCESSING_FAILED.to_string()),
                        )
                    }
                };

                if let Err(e) = tasks
                    .update(&task_id, status, result, error, Utc::now())
                    .await
                {
                    obs::emit_task_failed(&task_id, &e);
                }
            }
            .instrument(span),
        );
    }
}
