//! Safety guards.
//!
//! A [`GuardOracle`] judges one piece of text. A [`GuardStage`] runs a group
//! of oracles concurrently and resolves to a single [`StageVerdict`].

pub mod builtin;
pub mod oracle;
pub mod stage;

pub use builtin::DenylistOracle;
pub use oracle::{GuardError, GuardOracle, GuardResult, GuardVerdict};
pub use stage::{GuardStage, StageVerdict};
