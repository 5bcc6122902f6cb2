//! Concurrent evaluation of a guard group.
//!
//! Every guard runs on its own task. The first block observed wins and the
//! remaining tasks are aborted. A pass is only returned once every guard has
//! completed with a pass. Errors, timeouts and panics count as blocks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::oracle::{GuardError, GuardOracle, GuardVerdict};
use crate::domain::Role;
use crate::metrics::METRICS;
use crate::obs;

/// Result of evaluating a [`GuardStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageVerdict {
    /// Every guard passed. Verdicts are in guard registration order.
    Pass { verdicts: Vec<GuardVerdict> },
    /// A guard blocked. `message` is the stage's fixed refusal; `reason` is
    /// for logs only.
    Block {
        message: String,
        reason: String,
        guard: String,
    },
}

impl StageVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, StageVerdict::Pass { .. })
    }
}

/// A named group of guards gating one pipeline phase.
pub struct GuardStage {
    name: String,
    guards: Vec<Arc<dyn GuardOracle>>,
    refusal: String,
    timeout: Duration,
}

impl GuardStage {
    pub fn new(name: impl Into<String>, refusal: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            guards: Vec::new(),
            refusal: refusal.into(),
            timeout,
        }
    }

    /// Add a guard to the group.
    pub fn with_guard(mut self, guard: Arc<dyn GuardOracle>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn with_guards(mut self, guards: impl IntoIterator<Item = Arc<dyn GuardOracle>>) -> Self {
        self.guards.extend(guards);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn refusal(&self) -> &str {
        &self.refusal
    }

    /// Run every guard against `input` and resolve to pass or the first block.
    #[instrument(skip(self, input), fields(stage = %self.name, guards = self.guards.len()))]
    pub async fn evaluate(&self, input: &str, role: Role) -> StageVerdict {
        let mut set = JoinSet::new();
        let input: Arc<str> = Arc::from(input);

        for (idx, guard) in self.guards.iter().enumerate() {
            let guard = Arc::clone(guard);
            let input = Arc::clone(&input);
            let timeout = self.timeout;
            set.spawn(async move {
                let name = guard.name().to_string();
                let checked = match tokio::time::timeout(timeout, guard.check(&input, role)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(GuardError::Timeout { elapsed: timeout }),
                };
                (idx, name, checked)
            });
        }

        let mut verdicts: Vec<(usize, GuardVerdict)> = Vec::with_capacity(self.guards.len());

        while let Some(joined) = set.join_next().await {
            let (guard, reason) = match joined {
                Ok((idx, _, Ok(verdict))) if verdict.passed => {
                    debug!(guard = %verdict.guard_name, "guard passed");
                    verdicts.push((idx, verdict));
                    continue;
                }
                Ok((_, name, Ok(verdict))) => (name, verdict.reason),
                Ok((_, name, Err(e))) => {
                    warn!(guard = %name, error = %e, "guard failed; treating as block");
                    (name, e.to_string())
                }
                Err(e) => {
                    warn!(error = %e, "guard task did not complete; treating as block");
                    ("unknown".to_string(), e.to_string())
                }
            };

            set.abort_all();
            METRICS.inc_guard_blocks();
            obs::emit_guard_blocked(&self.name, &guard, &reason);
            return StageVerdict::Block {
                message: self.refusal.clone(),
                reason,
                guard,
            };
        }

        verdicts.sort_by_key(|(idx, _)| *idx);
        StageVerdict::Pass {
            verdicts: verdicts.into_iter().map(|(_, v)| v).collect(),
        }
    }
}
