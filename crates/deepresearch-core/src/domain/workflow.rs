//! The checkpointed workflow snapshot and its outcomes.

use chrono::{DateTime, Utc};
use deepresearch_state::ThreadId;
use serde::{Deserialize, Serialize};

use super::citation::MergedReport;
use super::classification::{Category, Classification};
use super::request::{Request, Turn};
use super::unit::{ResearchUnit, UnitResult};

/// The last completed transition of a workflow.
///
/// Re-entering a saved workflow runs the step that follows its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request recorded.
    Intake,
    /// Input guards passed.
    PreGuard,
    /// Classification recorded.
    Classified,
    /// Waiting on a human decision.
    Interrupted,
    /// Research units created.
    Planned,
    /// Delegation finished; results recorded.
    Delegating,
    /// Report merged.
    Merging,
    /// Output guards passed.
    PostGuard,
    Delivered,
    Blocked,
    Refused,
    Declined,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::PreGuard => "pre_guard",
            Stage::Classified => "classified",
            Stage::Interrupted => "interrupted",
            Stage::Planned => "planned",
            Stage::Delegating => "delegating",
            Stage::Merging => "merging",
            Stage::PostGuard => "post_guard",
            Stage::Delivered => "delivered",
            Stage::Blocked => "blocked",
            Stage::Refused => "refused",
            Stage::Declined => "declined",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Delivered | Stage::Blocked | Stage::Refused | Stage::Declined
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human's answer to an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" => Ok(Decision::Approve),
            "reject" | "rejected" | "no" => Ok(Decision::Reject),
            other => Err(format!("decision must be approve or reject, got {other:?}")),
        }
    }
}

/// What an interrupt asks the human to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub canonical_request: String,
    pub category: Category,
    pub rationale: String,
    pub sub_questions: Vec<String>,
    /// Human-readable rendering shown to the user.
    pub prompt: String,
}

/// An outstanding request for a human decision. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptToken {
    pub token_id: String,
    pub thread_id: ThreadId,
    /// Stage the workflow enters when the proposal is approved.
    pub stage_to_resume: Stage,
    pub proposal: Proposal,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl InterruptToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// How a workflow call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Delivered { report: MergedReport },
    Blocked { message: String },
    Refused { message: String },
    Declined { message: String },
    Suspended { token_id: String, prompt: String },
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Delivered { .. } => "delivered",
            Outcome::Blocked { .. } => "blocked",
            Outcome::Refused { .. } => "refused",
            Outcome::Declined { .. } => "declined",
            Outcome::Suspended { .. } => "suspended",
        }
    }

    /// The text a user would see.
    pub fn message(&self) -> &str {
        match self {
            Outcome::Delivered { report } => &report.text,
            Outcome::Blocked { message }
            | Outcome::Refused { message }
            | Outcome::Declined { message } => message,
            Outcome::Suspended { prompt, .. } => prompt,
        }
    }
}

/// Full snapshot of one workflow; the unit of checkpointing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: ThreadId,
    pub request: Request,
    /// Prior turns of the thread, oldest first.
    #[serde(default)]
    pub history: Vec<Turn>,
    pub stage: Stage,
    /// Delegation rounds completed.
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub units: Vec<ResearchUnit>,
    #[serde(default)]
    pub results: Vec<UnitResult>,
    #[serde(default)]
    pub report: Option<MergedReport>,
    #[serde(default)]
    pub interrupt_token: Option<InterruptToken>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub consumed_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// A fresh workflow at `Intake`.
    pub fn new(request: Request, history: Vec<Turn>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: request.thread_id.clone(),
            request,
            history,
            stage: Stage::Intake,
            round: 0,
            classification: None,
            units: Vec::new(),
            results: Vec::new(),
            report: None,
            interrupt_token: None,
            outcome: None,
            consumed_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `stage`, stamping the update time.
    pub fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Enter a terminal stage with its outcome.
    pub fn finish(&mut self, stage: Stage, outcome: Outcome) {
        debug_assert!(stage.is_terminal());
        self.outcome = Some(outcome);
        self.advance(stage);
    }

    /// History for the next workflow on this thread, capped at `limit` turns.
    pub fn next_history(&self, limit: usize) -> Vec<Turn> {
        let mut turns = self.history.clone();
        turns.push(Turn::user(self.request.text.clone()));
        if let Some(outcome) = &self.outcome {
            turns.push(Turn::assistant(outcome.message()));
        }
        let skip = turns.len().saturating_sub(limit);
        turns.split_off(skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> WorkflowState {
        WorkflowState::new(Request::new(ThreadId::new("t-1"), 1, "what is rust"), Vec::new())
    }

    #[test]
    fn test_new_state_starts_at_intake() {
        let state = sample_state();
        assert_eq!(state.stage, Stage::Intake);
        assert!(!state.stage.is_terminal());
        assert!(state.outcome.is_none());
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = sample_state();
        state.finish(
            Stage::Refused,
            Outcome::Refused {
                message: "no".into(),
            },
        );
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["stage"], "refused");
        assert_eq!(value["outcome"]["kind"], "refused");
        let back: WorkflowState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_next_history_is_capped() {
        let mut state = sample_state();
        state.history = (0..5).map(|i| Turn::user(format!("q{i}"))).collect();
        state.finish(
            Stage::Declined,
            Outcome::Declined {
                message: "declined".into(),
            },
        );
        let next = state.next_history(3);
        assert_eq!(next.len(), 3);
        assert_eq!(next[1], Turn::user("what is rust"));
        assert_eq!(next[2], Turn::assistant("declined"));
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!("APPROVE".parse::<Decision>().unwrap(), Decision::Approve);
        assert_eq!("reject".parse::<Decision>().unwrap(), Decision::Reject);
        assert!("maybe".parse::<Decision>().is_err());
    }
}
