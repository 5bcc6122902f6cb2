//! Bounded fan-out: concurrency cap, round limit and creation-order results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepresearch_core::fakes::ScriptedWorker;
use deepresearch_core::{
    Classification, GuardStage, Planner, ReasoningResult, ResearchUnit, Scheduler,
    SchedulerLimits, TopicPlanner, UnitOutcome, UnitResult, UnitStatus,
};

fn limits(k: usize, r: u32) -> SchedulerLimits {
    SchedulerLimits {
        max_concurrency: k,
        max_rounds: r,
        unit_timeout: Duration::from_secs(300),
        planner_timeout: Duration::from_secs(60),
    }
}

fn open_guard() -> Arc<GuardStage> {
    Arc::new(GuardStage::new("unit", "blocked", Duration::from_secs(30)))
}

/// Always asks for one more question.
struct EndlessPlanner;

#[async_trait]
impl Planner for EndlessPlanner {
    async fn plan(&self, c: &Classification) -> ReasoningResult<Vec<String>> {
        Ok(vec![c.canonical_request.clone()])
    }

    async fn follow_up(
        &self,
        _c: &Classification,
        _results: &[UnitResult],
        completed_rounds: u32,
    ) -> ReasoningResult<Vec<String>> {
        Ok(vec![format!("follow-up {completed_rounds}")])
    }
}

#[tokio::test(start_paused = true)]
async fn at_most_k_units_in_flight() {
    let questions: Vec<String> = (0..5).map(|i| format!("q{i}")).collect();
    let mut worker = ScriptedWorker::new();
    for q in &questions {
        worker = worker.with_delay_for(q, Duration::from_millis(100));
    }
    let worker = Arc::new(worker);
    let scheduler = Scheduler::new(
        worker.clone(),
        Arc::new(TopicPlanner),
        open_guard(),
        limits(2, 1),
    );

    let started = tokio::time::Instant::now();
    let outcomes = scheduler
        .run_round(&ResearchUnit::batch(0, 0, questions))
        .await;

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| matches!(o, UnitOutcome::Completed(_))));
    assert_eq!(worker.max_in_flight(), 2);
    // Five 100ms units, two at a time: three waves.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn results_keep_creation_order() {
    let worker = Arc::new(
        ScriptedWorker::new()
            .with_delay_for("a", Duration::from_millis(90))
            .with_delay_for("b", Duration::from_millis(10))
            .with_delay_for("c", Duration::from_millis(50)),
    );
    let scheduler = Scheduler::new(worker, Arc::new(TopicPlanner), open_guard(), limits(3, 1));
    let delegation = scheduler
        .delegate(
            &Classification::fallback("abc"),
            ResearchUnit::batch(0, 0, vec!["a".into(), "b".into(), "c".into()]),
        )
        .await;
    let ids: Vec<_> = delegation.results.iter().map(|r| r.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["r0-u0", "r0-u1", "r0-u2"]);
}

#[tokio::test]
async fn follow_up_rounds_stop_at_limit() {
    let scheduler = Scheduler::new(
        Arc::new(ScriptedWorker::new()),
        Arc::new(EndlessPlanner),
        open_guard(),
        limits(2, 3),
    );
    let delegation = scheduler
        .delegate(
            &Classification::fallback("tides"),
            ResearchUnit::batch(0, 0, vec!["tides".into()]),
        )
        .await;

    assert_eq!(delegation.rounds, 3);
    let ids: Vec<_> = delegation.units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["r0-u0", "r1-u1", "r2-u2"]);
    assert_eq!(delegation.units[2].sub_question, "follow-up 2");
}

#[tokio::test]
async fn failed_units_do_not_stop_the_round() {
    let worker = Arc::new(ScriptedWorker::new().with_failure_for("bad"));
    let scheduler = Scheduler::new(worker, Arc::new(TopicPlanner), open_guard(), limits(2, 1));
    let delegation = scheduler
        .delegate(
            &Classification::fallback("x"),
            ResearchUnit::batch(0, 0, vec!["bad".into(), "good".into()]),
        )
        .await;

    assert_eq!(delegation.units[0].status, UnitStatus::Failed);
    assert!(delegation.units[0].failure.is_some());
    assert_eq!(delegation.units[1].status, UnitStatus::Done);
    assert_eq!(delegation.results.len(), 1);
}
