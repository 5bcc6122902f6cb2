//! deepresearch core library
//!
//! The orchestration engine: guard stages, classification, planning,
//! bounded delegation, citation merging, interrupts and the checkpointed
//! workflow state machine. External collaborators (models, guard backends,
//! search, storage) are consumed through traits; concrete HTTP adapters live
//! in `deepresearch-providers` and storage backends in `deepresearch-state`.

pub mod classify;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod guard;
pub mod interrupt;
pub mod merge;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod reasoning;
pub mod scheduler;
pub mod search;
pub mod service;
pub mod telemetry;
pub mod worker;

pub use classify::{
    classify_with_fallback, decode_classification, Classifier, Decoded, ReasoningClassifier,
};

pub use config::{ConfigError, ConfigResult, EngineConfig, PlannerKind};

pub use domain::{
    Category, Citation, Classification, Decision, InterruptToken, MergedReport, Outcome, Proposal,
    Request, ResearchUnit, Role, SourceRef, Stage, Turn, UnitResult, UnitStatus, WorkflowState,
};

pub use guard::{
    DenylistOracle, GuardError, GuardOracle, GuardResult, GuardStage, GuardVerdict, StageVerdict,
};

pub use interrupt::{InterruptController, InterruptError, Resolution, ResumeRequest};

pub use merge::{citations_are_dense, merge};

pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorError, OrchestratorResult, StageResult,
};

pub use planner::{plan_with_fallback, Planner, ReasoningPlanner, TopicPlanner};

pub use reasoning::{
    ChatMessage, MessageRole, ReasoningError, ReasoningReply, ReasoningResult, ReasoningService,
    ToolCall, ToolSpec,
};

pub use scheduler::{Delegation, Scheduler, SchedulerLimits, UnitOutcome};

pub use search::{SearchError, SearchHit, SearchProvider, SearchResult, SearchTopic};

pub use service::{
    ResearchService, ServiceError, ServiceResult, SubmitRequest, TaskHandle, TaskView,
};

pub use telemetry::init_tracing;

pub use worker::{content_guard, AgentResearchWorker, ResearchWorker, WorkerError, WorkerResult};

pub use deepresearch_state::{CheckpointStore, StorageError, TaskRegistry, TaskStatus, ThreadId};

/// deepresearch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
