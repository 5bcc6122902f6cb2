//! Structured observability hooks for workflow lifecycle events.
//!
//! Every event carries an `event` field so log pipelines can filter on it.
//! Events are emitted at `info!` level except guard blocks, which warn.
//! For JSON output pass `--json` to the CLI or set `DEEPRESEARCH_LOG_FORMAT=json`.

use tracing::{info, warn};

use crate::domain::Stage;

/// Span for a background service task. Attach with
/// [`tracing::Instrument::instrument`]; unlike an entered span it is `Send`.
pub fn task_span(task_id: &str, thread_id: &str) -> tracing::Span {
    tracing::info_span!("deepresearch.task", task_id = %task_id, thread_id = %thread_id)
}

/// Emit event: a new workflow was recorded on a thread.
pub fn emit_workflow_started(thread_id: &str, seq: u64) {
    info!(event = "workflow.started", thread_id = %thread_id, seq = seq);
}

/// Emit event: a workflow moved between stages and was checkpointed.
pub fn emit_transition(thread_id: &str, from: Stage, to: Stage) {
    info!(
        event = "workflow.transition",
        thread_id = %thread_id,
        from = %from,
        to = %to,
    );
}

/// Emit event: a workflow reached a terminal stage.
pub fn emit_workflow_finished(thread_id: &str, stage: Stage) {
    info!(event = "workflow.finished", thread_id = %thread_id, stage = %stage);
}

/// Emit event: a guard stage blocked. `reason` is never shown to users.
pub fn emit_guard_blocked(stage: &str, guard: &str, reason: &str) {
    warn!(
        event = "guard.blocked",
        stage = %stage,
        guard = %guard,
        reason = %reason,
    );
}

/// Emit event: an interrupt token was issued.
pub fn emit_interrupt_raised(thread_id: &str, token_id: &str) {
    info!(event = "interrupt.raised", thread_id = %thread_id, token_id = %token_id);
}

/// Emit event: one research unit finished, successfully or not.
pub fn emit_unit_finished(unit_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "unit.finished",
        unit_id = %unit_id,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: a background task failed outside the workflow.
pub fn emit_task_failed(task_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "task.failed", task_id = %task_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_without_subscriber() {
        emit_workflow_started("t-1", 1);
        emit_transition("t-1", Stage::Intake, Stage::PreGuard);
        emit_guard_blocked("input", "denylist", "matched term");
        emit_unit_finished("r0-u0", 12, true);
        emit_workflow_finished("t-1", Stage::Delivered);
    }

    #[test]
    fn test_task_span_create() {
        let span = task_span("task-1", "t-1");
        let _entered = span.enter();
    }
}
