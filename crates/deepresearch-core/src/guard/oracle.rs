//! The guard capability and its verdicts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Role;

/// Errors raised by a guard backend. Always treated as a block.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("guard transport failed: {0}")]
    Transport(String),

    #[error("guard backend returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("guard response malformed: {0}")]
    Malformed(String),

    #[error("guard timed out after {elapsed:?}")]
    Timeout { elapsed: std::time::Duration },
}

/// Result type for guard checks.
pub type GuardResult<T> = std::result::Result<T, GuardError>;

/// One guard's opinion about one piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub guard_name: String,
    pub passed: bool,
    pub reason: String,
}

impl GuardVerdict {
    pub fn pass(guard_name: impl Into<String>) -> Self {
        Self {
            guard_name: guard_name.into(),
            passed: true,
            reason: String::new(),
        }
    }

    pub fn block(guard_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            guard_name: guard_name.into(),
            passed: false,
            reason: reason.into(),
        }
    }
}

/// A pluggable safety check.
#[async_trait]
pub trait GuardOracle: Send + Sync {
    /// Stable name used in verdicts and logs.
    fn name(&self) -> &str;

    async fn check(&self, text: &str, role: Role) -> GuardResult<GuardVerdict>;
}
