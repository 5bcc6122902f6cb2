//! The top-level workflow state machine.
//!
//! ```text
//! Intake → PreGuard → Classified → (Interrupted) → Planned → Delegating
//!        → Merging → PostGuard → Delivered
//! ```
//!
//! with absorbing `Blocked` (any guard stage), `Refused` (rubbish requests)
//! and `Declined` (from `Interrupted` only). Each step returns a
//! [`StageResult`] which the orchestrator applies and checkpoints before the
//! next step runs, so a crash between two transitions resumes from the last
//! saved stage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use deepresearch_state::fakes::MemoryCheckpointStore;
use deepresearch_state::{CheckpointStore, StorageError, ThreadId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, instrument};

use crate::classify::{classify_with_fallback, Classifier};
use crate::config::{ConfigError, EngineConfig};
use crate::domain::{
    user_window, Category, Classification, InterruptToken, Outcome, Request, ResearchUnit, Role,
    Stage, UnitStatus, WorkflowState,
};
use crate::guard::{DenylistOracle, GuardOracle, GuardStage, StageVerdict};
use crate::interrupt::{InterruptController, InterruptError, Resolution, ResumeRequest};
use crate::merge::merge;
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::{plan_with_fallback, Planner, TopicPlanner};
use crate::prompts;
use crate::scheduler::{Scheduler, SchedulerLimits};
use crate::worker::ResearchWorker;

/// Errors returned by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("thread {thread_id} is waiting for a decision on interrupt {token_id}")]
    AwaitingDecision { thread_id: String, token_id: String },

    #[error("thread {thread_id} has an unfinished workflow at stage {stage}; recover it first")]
    WorkflowInFlight { thread_id: String, stage: Stage },

    #[error("checkpoint for thread {thread_id} was unreadable and has been reset")]
    CheckpointCorrupted { thread_id: String },

    #[error("no workflow stored for thread {thread_id}")]
    NotFound { thread_id: String },

    #[error(transparent)]
    Interrupt(#[from] InterruptError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Whether the error text is safe and useful to show an end user.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::Storage(_) | OrchestratorError::Serialization(_)
        )
    }
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// What a single step asks the orchestrator to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// The step advanced the state; save and run the next step.
    Continue,
    /// Park the workflow on this token.
    Suspend(InterruptToken),
    /// A guard blocked; end with this refusal.
    Block(String),
    /// End in a terminal stage.
    Terminal(Stage, Outcome),
    /// Nothing to run; the stage is already settled.
    Settled,
}

/// Per-thread mutual exclusion.
#[derive(Default)]
struct ThreadLocks {
    inner: Mutex<HashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl ThreadLocks {
    async fn acquire(&self, thread_id: &ThreadId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(map.entry(thread_id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Sequences guards, classification, interrupts, delegation and merging for
/// each conversation thread.
pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<dyn CheckpointStore>,
    classifier: Arc<dyn Classifier>,
    planner: Arc<dyn Planner>,
    scheduler: Scheduler,
    pre_guard: GuardStage,
    final_guard: GuardStage,
    interrupts: InterruptController,
    locks: ThreadLocks,
}

impl Orchestrator {
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new workflow on `thread_id`.
    ///
    /// Fails with `AwaitingDecision` while an interrupt is outstanding and
    /// with `WorkflowInFlight` if an earlier workflow stopped mid-way.
    #[instrument(skip(self, thread_id, text), fields(thread_id = %thread_id))]
    pub async fn submit(&self, thread_id: &ThreadId, text: &str) -> OrchestratorResult<Outcome> {
        let _lock = self.locks.acquire(thread_id).await;

        let (seq, history) = match self.load(thread_id).await? {
            Some(prev) if prev.stage == Stage::Interrupted => {
                return Err(OrchestratorError::AwaitingDecision {
                    thread_id: thread_id.to_string(),
                    token_id: prev
                        .interrupt_token
                        .map(|t| t.token_id)
                        .unwrap_or_default(),
                });
            }
            Some(prev) if !prev.stage.is_terminal() => {
                return Err(OrchestratorError::WorkflowInFlight {
                    thread_id: thread_id.to_string(),
                    stage: prev.stage,
                });
            }
            Some(prev) => (
                prev.request.seq + 1,
                prev.next_history(self.config.history_limit),
            ),
            None => (1, Vec::new()),
        };

        let state = WorkflowState::new(Request::new(thread_id.clone(), seq, text), history);
        METRICS.inc_workflows_started();
        obs::emit_workflow_started(thread_id.as_str(), seq);
        self.save(&state).await?;
        self.drive(state).await
    }

    /// Apply a human decision to the thread's outstanding interrupt.
    ///
    /// Consuming the token and the forward transition are one save.
    #[instrument(skip(self, request), fields(thread_id = %request.thread_id, decision = ?request.decision))]
    pub async fn resume(&self, request: &ResumeRequest) -> OrchestratorResult<Outcome> {
        let _lock = self.locks.acquire(&request.thread_id).await;

        let state = self.load(&request.thread_id).await?;
        let resolution = self
            .interrupts
            .resolve(state.as_ref(), request, Utc::now())?;
        let Some(mut state) = state else {
            return Err(InterruptError::NoPendingInterrupt {
                thread_id: request.thread_id.to_string(),
            }
            .into());
        };

        let from = state.stage;
        state.interrupt_token = None;
        match resolution {
            Resolution::Approved {
                stage,
                sub_questions,
            } => {
                let questions = if sub_questions.is_empty() {
                    vec![self.canonical_request(&state)]
                } else {
                    sub_questions
                };
                state.units = ResearchUnit::batch(0, 0, questions);
                state.advance(stage);
            }
            Resolution::Rejected => state.finish(
                Stage::Declined,
                Outcome::Declined {
                    message: prompts::DECLINED_MESSAGE.to_string(),
                },
            ),
            Resolution::Expired => state.finish(
                Stage::Declined,
                Outcome::Declined {
                    message: prompts::EXPIRED_MESSAGE.to_string(),
                },
            ),
        }

        obs::emit_transition(state.thread_id.as_str(), from, state.stage);
        self.save(&state).await?;
        if state.stage.is_terminal() {
            obs::emit_workflow_finished(state.thread_id.as_str(), state.stage);
        }
        self.drive(state).await
    }

    /// Re-enter a thread's stored workflow at its saved stage.
    ///
    /// Finished and suspended workflows return their stored outcome.
    #[instrument(skip(self, thread_id), fields(thread_id = %thread_id))]
    pub async fn recover(&self, thread_id: &ThreadId) -> OrchestratorResult<Outcome> {
        let _lock = self.locks.acquire(thread_id).await;
        match self.load(thread_id).await? {
            Some(state) => self.drive(state).await,
            None => Err(OrchestratorError::NotFound {
                thread_id: thread_id.to_string(),
            }),
        }
    }

    /// The thread's stored workflow, if any.
    pub async fn snapshot(&self, thread_id: &ThreadId) -> OrchestratorResult<Option<WorkflowState>> {
        self.load(thread_id).await
    }

    /// Threads with a stored workflow.
    pub async fn threads(&self) -> OrchestratorResult<Vec<ThreadId>> {
        Ok(self.store.list_threads().await?)
    }

    async fn load(&self, thread_id: &ThreadId) -> OrchestratorResult<Option<WorkflowState>> {
        let record = match self.store.load(thread_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e @ StorageError::DigestMismatch { .. })
            | Err(e @ StorageError::Serialization(_)) => {
                return Err(self.reset_corrupted(thread_id, &e).await?);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_value::<WorkflowState>(record.state) {
            Ok(state) => Ok(Some(state)),
            Err(e) => Err(self.reset_corrupted(thread_id, &e).await?),
        }
    }

    async fn reset_corrupted(
        &self,
        thread_id: &ThreadId,
        cause: &(dyn std::fmt::Display + Sync),
    ) -> OrchestratorResult<OrchestratorError> {
        error!(thread_id = %thread_id, error = %cause, "checkpoint unreadable; resetting thread");
        self.store.clear(thread_id).await?;
        Ok(OrchestratorError::CheckpointCorrupted {
            thread_id: thread_id.to_string(),
        })
    }

    async fn save(&self, state: &WorkflowState) -> OrchestratorResult<()> {
        let value = serde_json::to_value(state)?;
        self.store
            .save(&state.thread_id, state.stage.as_str(), &value)
            .await?;
        Ok(())
    }

    fn canonical_request(&self, state: &WorkflowState) -> String {
        state
            .classification
            .as_ref()
            .map(|c| c.canonical_request.clone())
            .unwrap_or_else(|| state.request.text.clone())
    }

    /// The outcome of a workflow that cannot advance without outside input.
    ///
    /// A settled stage missing its outcome or token is unreadable and resets
    /// the thread.
    async fn settled(&self, state: &WorkflowState) -> OrchestratorResult<Option<Outcome>> {
        let settled = match state.stage {
            stage if stage.is_terminal() => state.outcome.clone(),
            Stage::Interrupted => state.interrupt_token.as_ref().map(|token| Outcome::Suspended {
                token_id: token.token_id.clone(),
                prompt: token.proposal.prompt.clone(),
            }),
            _ => return Ok(None),
        };
        match settled {
            Some(outcome) => Ok(Some(outcome)),
            None => {
                let cause = format!("stage {} stored without its outcome", state.stage.as_str());
                Err(self.reset_corrupted(&state.thread_id, &cause).await?)
            }
        }
    }

    /// Run steps until the workflow settles, saving after every transition.
    async fn drive(&self, mut state: WorkflowState) -> OrchestratorResult<Outcome> {
        loop {
            if let Some(outcome) = self.settled(&state).await? {
                return Ok(outcome);
            }

            let from = state.stage;
            match self.step(&mut state).await {
                StageResult::Continue => {}
                StageResult::Suspend(token) => {
                    METRICS.inc_interrupts_raised();
                    obs::emit_interrupt_raised(state.thread_id.as_str(), &token.token_id);
                    state.interrupt_token = Some(token);
                    state.advance(Stage::Interrupted);
                }
                StageResult::Block(message) => {
                    state.finish(Stage::Blocked, Outcome::Blocked { message });
                }
                StageResult::Terminal(stage, outcome) => state.finish(stage, outcome),
                StageResult::Settled => continue,
            }

            obs::emit_transition(state.thread_id.as_str(), from, state.stage);
            self.save(&state).await?;
            if state.stage.is_terminal() {
                obs::emit_workflow_finished(state.thread_id.as_str(), state.stage);
            }
        }
    }

    /// Execute the step that follows `state.stage`.
    async fn step(&self, state: &mut WorkflowState) -> StageResult {
        match state.stage {
            Stage::Intake => {
                let input = user_window(
                    &state.history,
                    &state.request.text,
                    self.config.guards.history_window,
                );
                match self.pre_guard.evaluate(&input, Role::User).await {
                    StageVerdict::Pass { .. } => {
                        state.advance(Stage::PreGuard);
                        StageResult::Continue
                    }
                    StageVerdict::Block { message, .. } => StageResult::Block(message),
                }
            }

            Stage::PreGuard => {
                let classification = classify_with_fallback(
                    self.classifier.as_ref(),
                    &state.request,
                    &state.history,
                    self.config.classifier_timeout(),
                )
                .await;
                state.classification = Some(classification);
                state.advance(Stage::Classified);
                StageResult::Continue
            }

            Stage::Classified => {
                let classification = state
                    .classification
                    .clone()
                    .unwrap_or_else(|| Classification::fallback(&state.request.text));
                if classification.category == Category::Rubbish {
                    return StageResult::Terminal(
                        Stage::Refused,
                        Outcome::Refused {
                            message: prompts::RUBBISH_REFUSAL.to_string(),
                        },
                    );
                }

                let questions = plan_with_fallback(
                    self.planner.as_ref(),
                    &classification,
                    self.config.planner_timeout(),
                )
                .await;

                if classification.requires_interrupt() {
                    return StageResult::Suspend(self.interrupts.raise(
                        &state.thread_id,
                        &classification,
                        questions,
                        Utc::now(),
                    ));
                }

                state.units = ResearchUnit::batch(0, 0, questions);
                state.advance(Stage::Planned);
                StageResult::Continue
            }

            Stage::Planned => {
                let classification = state
                    .classification
                    .clone()
                    .unwrap_or_else(|| Classification::fallback(&state.request.text));
                let mut units: Vec<ResearchUnit> = state
                    .units
                    .iter()
                    .filter(|u| u.round == 0)
                    .cloned()
                    .collect();
                for unit in &mut units {
                    unit.status = UnitStatus::Running;
                    unit.failure = None;
                }

                let delegation = self.scheduler.delegate(&classification, units).await;
                state.consumed_tokens += delegation
                    .results
                    .iter()
                    .map(|r| r.tokens_used)
                    .sum::<u64>();
                state.units = delegation.units;
                state.results = delegation.results;
                state.round = delegation.rounds;
                state.advance(Stage::Delegating);
                StageResult::Continue
            }

            Stage::Delegating => {
                let report = merge(&state.units, &state.results);
                METRICS.add_citations_merged(report.citations.len() as u64);
                state.report = Some(report);
                state.advance(Stage::Merging);
                StageResult::Continue
            }

            Stage::Merging => {
                let text = state
                    .report
                    .as_ref()
                    .map(|r| r.text.clone())
                    .unwrap_or_default();
                match self.final_guard.evaluate(&text, Role::Assistant).await {
                    StageVerdict::Pass { .. } => {
                        state.advance(Stage::PostGuard);
                        StageResult::Continue
                    }
                    StageVerdict::Block { message, .. } => StageResult::Block(message),
                }
            }

            Stage::PostGuard => match state.report.clone() {
                Some(report) => StageResult::Terminal(Stage::Delivered, Outcome::Delivered { report }),
                None => {
                    // Merged report lost; merge again.
                    state.advance(Stage::Delegating);
                    StageResult::Continue
                }
            },

            Stage::Interrupted
            | Stage::Delivered
            | Stage::Blocked
            | Stage::Refused
            | Stage::Declined => StageResult::Settled,
        }
    }
}

/// Assembles an [`Orchestrator`] from its collaborators.
pub struct OrchestratorBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn CheckpointStore>>,
    classifier: Option<Arc<dyn Classifier>>,
    planner: Option<Arc<dyn Planner>>,
    worker: Option<Arc<dyn ResearchWorker>>,
    input_guards: Vec<Arc<dyn GuardOracle>>,
    output_guards: Vec<Arc<dyn GuardOracle>>,
}

impl OrchestratorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            classifier: None,
            planner: None,
            worker: None,
            input_guards: Vec::new(),
            output_guards: Vec::new(),
        }
    }

    /// Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Defaults to [`TopicPlanner`].
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn worker(mut self, worker: Arc<dyn ResearchWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Guard applied to user input before classification.
    pub fn input_guard(mut self, guard: Arc<dyn GuardOracle>) -> Self {
        self.input_guards.push(guard);
        self
    }

    /// Guard applied to each unit's findings and to the final report.
    pub fn output_guard(mut self, guard: Arc<dyn GuardOracle>) -> Self {
        self.output_guards.push(guard);
        self
    }

    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;
        let classifier = self
            .classifier
            .ok_or_else(|| ConfigError::Invalid("a classifier is required".into()))?;
        let worker = self
            .worker
            .ok_or_else(|| ConfigError::Invalid("a research worker is required".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));
        let planner = self.planner.unwrap_or_else(|| Arc::new(TopicPlanner::new()));

        let mut input_guards = self.input_guards;
        let mut output_guards = self.output_guards;
        if let Some(denylist) = DenylistOracle::from_settings(&self.config.guards)? {
            input_guards.push(Arc::clone(&denylist));
            output_guards.push(denylist);
        }

        let timeout = self.config.guard_timeout();
        let pre_guard =
            GuardStage::new("input", prompts::INPUT_REFUSAL, timeout).with_guards(input_guards);
        let unit_guard = GuardStage::new("unit", prompts::OUTPUT_REFUSAL, timeout)
            .with_guards(output_guards.iter().cloned());
        let final_guard =
            GuardStage::new("output", prompts::OUTPUT_REFUSAL, timeout).with_guards(output_guards);

        let limits = SchedulerLimits::from_config(&self.config);
        let scheduler = Scheduler::new(worker, Arc::clone(&planner), Arc::new(unit_guard), limits);

        Ok(Orchestrator {
            interrupts: InterruptController::new(self.config.interrupt.ttl_secs),
            config: self.config,
            store,
            classifier,
            planner,
            scheduler,
            pre_guard,
            final_guard,
            locks: ThreadLocks::default(),
        })
    }
}
