//! Human-in-the-loop interrupts.
//!
//! An interrupt is a stored record, not a parked task: raising one writes an
//! [`InterruptToken`] into the workflow snapshot, and resolving it validates a
//! decision against that token. Validation never mutates state; the
//! orchestrator applies the returned [`Resolution`] and saves once.

use chrono::{DateTime, Duration, Utc};
use deepresearch_state::ThreadId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Classification, Decision, InterruptToken, Proposal, Stage, WorkflowState};
use crate::prompts;

/// Misuse of the resume operation. Never mutates stored state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterruptError {
    #[error("thread {thread_id} has no pending interrupt")]
    NoPendingInterrupt { thread_id: String },

    #[error("interrupt token {token_id} is stale or already consumed")]
    StaleToken { token_id: String },
}

/// Result type for interrupt operations.
pub type InterruptResult<T> = std::result::Result<T, InterruptError>;

/// A caller's answer to an outstanding interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub thread_id: ThreadId,
    pub decision: Decision,
    /// When given, must match the outstanding token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl ResumeRequest {
    pub fn new(thread_id: ThreadId, decision: Decision) -> Self {
        Self {
            thread_id,
            decision,
            token_id: None,
        }
    }

    pub fn with_token(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }
}

/// What the orchestrator should do with a validated resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Continue at `stage` with these sub-questions.
    Approved {
        stage: Stage,
        sub_questions: Vec<String>,
    },
    Rejected,
    /// The proposal expired before the decision; treated as a rejection.
    Expired,
}

/// Issues and validates interrupt tokens.
#[derive(Debug, Clone, Default)]
pub struct InterruptController {
    ttl: Option<Duration>,
}

impl InterruptController {
    pub fn new(ttl_secs: Option<u64>) -> Self {
        Self {
            ttl: ttl_secs.map(|s| Duration::seconds(s as i64)),
        }
    }

    /// Build a token proposing `sub_questions` for `classification`.
    pub fn raise(
        &self,
        thread_id: &ThreadId,
        classification: &Classification,
        sub_questions: Vec<String>,
        now: DateTime<Utc>,
    ) -> InterruptToken {
        let mut proposal = Proposal {
            canonical_request: classification.canonical_request.clone(),
            category: classification.category,
            rationale: classification.rationale.clone(),
            sub_questions,
            prompt: String::new(),
        };
        proposal.prompt = prompts::render_interrupt_prompt(&proposal);

        InterruptToken {
            token_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.clone(),
            stage_to_resume: Stage::Planned,
            proposal,
            issued_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
        }
    }

    /// Validate `request` against the workflow's outstanding token.
    pub fn resolve(
        &self,
        state: Option<&WorkflowState>,
        request: &ResumeRequest,
        now: DateTime<Utc>,
    ) -> InterruptResult<Resolution> {
        let pending = state
            .filter(|s| s.stage == Stage::Interrupted)
            .and_then(|s| s.interrupt_token.as_ref());

        let token = match (pending, &request.token_id) {
            (Some(token), Some(given)) if &token.token_id != given => {
                return Err(InterruptError::StaleToken {
                    token_id: given.clone(),
                })
            }
            (Some(token), _) => token,
            (None, Some(given)) => {
                return Err(InterruptError::StaleToken {
                    token_id: given.clone(),
                })
            }
            (None, None) => {
                return Err(InterruptError::NoPendingInterrupt {
                    thread_id: request.thread_id.to_string(),
                })
            }
        };

        if token.is_expired_at(now) {
            return Ok(Resolution::Expired);
        }

        Ok(match request.decision {
            Decision::Approve => Resolution::Approved {
                stage: token.stage_to_resume,
                sub_questions: token.proposal.sub_questions.clone(),
            },
            Decision::Reject => Resolution::Rejected,
        })
    }
}
