//! Bounded fan-out / fan-in of research units.
//!
//! Units of one round run concurrently, capped by a semaphore at
//! `max_concurrency`. Each unit is bounded by `unit_timeout` and its findings
//! must pass the post-unit guard stage before they are accepted. Outcomes are
//! always reported in unit creation order, whatever order units finish in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::domain::{Classification, ResearchUnit, Role, UnitResult, UnitStatus};
use crate::guard::{GuardStage, StageVerdict};
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::Planner;
use crate::worker::ResearchWorker;

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed(UnitResult),
    Failed { unit_id: String, reason: String },
}

impl UnitOutcome {
    pub fn unit_id(&self) -> &str {
        match self {
            UnitOutcome::Completed(r) => &r.unit_id,
            UnitOutcome::Failed { unit_id, .. } => unit_id,
        }
    }
}

/// Limits applied to one delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Units in flight at once (K).
    pub max_concurrency: usize,
    /// Rounds per delegation (R).
    pub max_rounds: u32,
    pub unit_timeout: Duration,
    /// Deadline for each follow-up planning call.
    pub planner_timeout: Duration,
}

impl SchedulerLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_concurrency: config.scheduler.max_concurrency.max(1),
            max_rounds: config.scheduler.max_rounds.max(1),
            unit_timeout: config.unit_timeout(),
            planner_timeout: config.planner_timeout(),
        }
    }
}

/// Units and accepted results of a finished delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delegation {
    /// Every unit dispatched, in creation order, with final statuses.
    pub units: Vec<ResearchUnit>,
    /// Accepted results, in unit creation order.
    pub results: Vec<UnitResult>,
    pub rounds: u32,
}

pub struct Scheduler {
    worker: Arc<dyn ResearchWorker>,
    planner: Arc<dyn Planner>,
    unit_guard: Arc<GuardStage>,
    limits: SchedulerLimits,
}

impl Scheduler {
    pub fn new(
        worker: Arc<dyn ResearchWorker>,
        planner: Arc<dyn Planner>,
        unit_guard: Arc<GuardStage>,
        limits: SchedulerLimits,
    ) -> Self {
        Self {
            worker,
            planner,
            unit_guard,
            limits,
        }
    }

    pub fn limits(&self) -> SchedulerLimits {
        self.limits
    }

    /// Run one round of units with at most `max_concurrency` in flight.
    #[instrument(skip_all, fields(units = units.len(), k = self.limits.max_concurrency))]
    pub async fn run_round(&self, units: &[ResearchUnit]) -> Vec<UnitOutcome> {
        let sem = Arc::new(Semaphore::new(self.limits.max_concurrency));
        let mut tasks = Vec::with_capacity(units.len());

        for unit in units {
            let unit = unit.clone();
            let sem = Arc::clone(&sem);
            let worker = Arc::clone(&self.worker);
            let guard = Arc::clone(&self.unit_guard);
            let timeout = self.limits.unit_timeout;

            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let started = Instant::now();
                let outcome = run_unit(worker.as_ref(), guard.as_ref(), &unit, timeout).await;
                let success = matches!(outcome, UnitOutcome::Completed(_));
                if !success {
                    METRICS.inc_units_failed();
                }
                obs::emit_unit_finished(&unit.id, started.elapsed().as_millis() as u64, success);
                outcome
            }));
        }

        join_all(tasks)
            .await
            .into_iter()
            .zip(units)
            .map(|(joined, unit)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(unit_id = %unit.id, error = %e, "unit task aborted");
                    METRICS.inc_units_failed();
                    UnitOutcome::Failed {
                        unit_id: unit.id.clone(),
                        reason: format!("unit task aborted: {e}"),
                    }
                }
            })
            .collect()
    }

    /// Run `initial` and up to `max_rounds - 1` planner follow-up rounds.
    #[instrument(skip_all, fields(initial = initial.len(), r = self.limits.max_rounds))]
    pub async fn delegate(
        &self,
        classification: &Classification,
        initial: Vec<ResearchUnit>,
    ) -> Delegation {
        let mut delegation = Delegation::default();
        let mut pending = initial;

        while !pending.is_empty() {
            let outcomes = self.run_round(&pending).await;
            for (mut unit, outcome) in pending.drain(..).zip(outcomes) {
                match outcome {
                    UnitOutcome::Completed(result) => {
                        unit.status = UnitStatus::Done;
                        delegation.results.push(result);
                    }
                    UnitOutcome::Failed { reason, .. } => {
                        unit.status = UnitStatus::Failed;
                        unit.failure = Some(reason);
                    }
                }
                delegation.units.push(unit);
            }
            delegation.rounds += 1;

            if delegation.rounds >= self.limits.max_rounds {
                info!(rounds = delegation.rounds, "round budget exhausted");
                break;
            }

            let follow_up = tokio::time::timeout(
                self.limits.planner_timeout,
                self.planner
                    .follow_up(classification, &delegation.results, delegation.rounds),
            )
            .await;
            let questions = match follow_up {
                Ok(Ok(questions)) => questions,
                Ok(Err(e)) => {
                    warn!(error = %e, "follow-up planning failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!("follow-up planning timed out");
                    Vec::new()
                }
            };
            pending = ResearchUnit::batch(delegation.rounds, delegation.units.len(), questions);
        }

        delegation
    }
}

async fn run_unit(
    worker: &dyn ResearchWorker,
    guard: &GuardStage,
    unit: &ResearchUnit,
    timeout: Duration,
) -> UnitOutcome {
    let failed = |reason: String| UnitOutcome::Failed {
        unit_id: unit.id.clone(),
        reason,
    };

    let result = match tokio::time::timeout(timeout, worker.research(unit)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(unit_id = %unit.id, error = %e, "unit failed");
            return failed(e.to_string());
        }
        Err(_) => {
            warn!(unit_id = %unit.id, timeout_ms = timeout.as_millis() as u64, "unit timed out");
            return failed(format!("timed out after {timeout:?}"));
        }
    };

    match guard.evaluate(&result.raw_findings, Role::Assistant).await {
        StageVerdict::Pass { .. } => UnitOutcome::Completed(result),
        StageVerdict::Block { guard, reason, .. } => {
            failed(format!("findings blocked by {guard}: {reason}"))
        }
    }
}
