//! Domain model for deepresearch workflows.
//!
//! Every type here is serde-serialisable so a whole [`WorkflowState`] can be
//! checkpointed as JSON.

pub mod citation;
pub mod classification;
pub mod request;
pub mod unit;
pub mod workflow;

pub use citation::{Citation, MergedReport};
pub use classification::{Category, Classification};
pub use request::{user_window, Request, Role, Turn};
pub use unit::{ResearchUnit, SourceRef, UnitResult, UnitStatus};
pub use workflow::{Decision, InterruptToken, Outcome, Proposal, Stage, WorkflowState};
