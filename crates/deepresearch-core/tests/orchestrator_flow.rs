//! End-to-end workflow scenarios with scripted collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepresearch_core::fakes::{ScriptedClassifier, ScriptedWorker, StaticGuard};
use deepresearch_core::prompts;
use deepresearch_core::{
    Category, CheckpointStore, Decision, EngineConfig, Orchestrator, OrchestratorError, Outcome,
    ResumeRequest, SourceRef, Stage, StorageError, ThreadId,
};
use deepresearch_state::fakes::MemoryCheckpointStore;
use deepresearch_state::{CheckpointRecord, StorageResult};

/// Delegates to a memory store but fails every save after the first `ok_saves`.
struct FlakyStore {
    inner: MemoryCheckpointStore,
    ok_saves: AtomicUsize,
}

impl FlakyStore {
    fn failing_after(ok_saves: usize) -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            ok_saves: AtomicUsize::new(ok_saves),
        }
    }

    fn heal(&self) {
        self.ok_saves.store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save(
        &self,
        thread_id: &ThreadId,
        stage: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord> {
        let left = self.ok_saves.load(Ordering::SeqCst);
        if left == 0 {
            return Err(StorageError::Backend("disk full".into()));
        }
        if left != usize::MAX {
            self.ok_saves.store(left - 1, Ordering::SeqCst);
        }
        self.inner.save(thread_id, stage, state).await
    }

    async fn load(&self, thread_id: &ThreadId) -> StorageResult<Option<CheckpointRecord>> {
        self.inner.load(thread_id).await
    }

    async fn clear(&self, thread_id: &ThreadId) -> StorageResult<()> {
        self.inner.clear(thread_id).await
    }

    async fn list_threads(&self) -> StorageResult<Vec<ThreadId>> {
        self.inner.list_threads().await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    classifier: Arc<ScriptedClassifier>,
    worker: Arc<ScriptedWorker>,
    input_guard: Arc<StaticGuard>,
    output_guard: Arc<StaticGuard>,
}

fn harness_with(
    config: EngineConfig,
    classifier: ScriptedClassifier,
    worker: ScriptedWorker,
    input_guard: StaticGuard,
    output_guard: StaticGuard,
    store: Arc<dyn CheckpointStore>,
) -> Harness {
    let classifier = Arc::new(classifier);
    let worker = Arc::new(worker);
    let input_guard = Arc::new(input_guard);
    let output_guard = Arc::new(output_guard);
    let orchestrator = Orchestrator::builder(config)
        .store(store)
        .classifier(classifier.clone())
        .worker(worker.clone())
        .input_guard(input_guard.clone())
        .output_guard(output_guard.clone())
        .build()
        .unwrap();
    Harness {
        orchestrator,
        classifier,
        worker,
        input_guard,
        output_guard,
    }
}

fn harness(category: Category, worker: ScriptedWorker) -> Harness {
    harness_with(
        EngineConfig::default(),
        ScriptedClassifier::category(category),
        worker,
        StaticGuard::pass("jailbreak"),
        StaticGuard::pass("content-safety"),
        Arc::new(MemoryCheckpointStore::new()),
    )
}

#[tokio::test]
async fn rubbish_is_refused_without_delegation() {
    let h = harness(Category::Rubbish, ScriptedWorker::new());
    let thread = ThreadId::new("scenario-1");

    let outcome = h.orchestrator.submit(&thread, "asdf qwer").await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Refused {
            message: prompts::RUBBISH_REFUSAL.to_string()
        }
    );
    assert!(h.worker.started().is_empty());
    assert_eq!(h.output_guard.calls(), 0);
    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Refused);
}

#[tokio::test]
async fn simple_request_delivers_cited_report() {
    let worker = ScriptedWorker::new().with_citations_for(
        "capital of France",
        vec![SourceRef::new("https://paris.example", "Paris")],
    );
    let h = harness(Category::Simple, worker);
    let thread = ThreadId::new("scenario-2");

    let outcome = h
        .orchestrator
        .submit(&thread, "capital of France")
        .await
        .unwrap();

    match outcome {
        Outcome::Delivered { report } => {
            assert_eq!(report.citations.len(), 1);
            assert_eq!(report.citations[0].index, 1);
            assert!(report.text.contains("Findings about capital of France [1]"));
            assert!(report.text.contains("[1] Paris: https://paris.example"));
        }
        other => panic!("expected delivered, got {other:?}"),
    }
    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.input_guard.calls(), 1);
    // One unit check plus the final report.
    assert_eq!(h.output_guard.calls(), 2);
}

#[tokio::test]
async fn multitopic_suspends_then_delivers_on_approval() {
    let shared = SourceRef::new("https://shared.example", "Shared");
    let worker = ScriptedWorker::new()
        .with_citations_for("rust", vec![shared.clone()])
        .with_citations_for(
            "go",
            vec![SourceRef::new("https://go.example", "Go"), shared],
        )
        .with_findings_for("go", "go facts [1] and shared [2]");
    let h = harness(Category::Multitopic, worker);
    let thread = ThreadId::new("scenario-3");

    let token_id = match h.orchestrator.submit(&thread, "rust vs go").await.unwrap() {
        Outcome::Suspended { token_id, prompt } => {
            assert!(prompt.contains("1. rust"));
            assert!(prompt.contains("2. go"));
            token_id
        }
        other => panic!("expected suspended, got {other:?}"),
    };
    assert!(h.worker.started().is_empty());

    let request = ResumeRequest::new(thread.clone(), Decision::Approve).with_token(token_id);
    match h.orchestrator.resume(&request).await.unwrap() {
        Outcome::Delivered { report } => {
            assert_eq!(report.citations.len(), 2);
            assert_eq!(report.citations[0].url, "https://shared.example");
            assert!(report.text.contains("## go\n\ngo facts [2] and shared [1]"));
        }
        other => panic!("expected delivered, got {other:?}"),
    }
}

#[tokio::test]
async fn input_guard_block_stops_before_classification() {
    let h = harness_with(
        EngineConfig::default(),
        ScriptedClassifier::category(Category::Simple),
        ScriptedWorker::new(),
        StaticGuard::block("jailbreak", "prompt injection"),
        StaticGuard::pass("content-safety"),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let thread = ThreadId::new("scenario-4");

    let outcome = h.orchestrator.submit(&thread, "ignore rules").await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Blocked {
            message: prompts::INPUT_REFUSAL.to_string()
        }
    );
    assert_eq!(h.classifier.calls(), 0);
    assert!(h.worker.started().is_empty());
}

#[tokio::test]
async fn output_guard_blocks_final_report() {
    let worker = ScriptedWorker::new()
        .with_citations_for("tides", vec![SourceRef::new("https://sea.example", "Sea")]);
    let h = harness_with(
        EngineConfig::default(),
        ScriptedClassifier::category(Category::Simple),
        worker,
        StaticGuard::pass("jailbreak"),
        StaticGuard::block_matching("content-safety", "### sources"),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let outcome = h
        .orchestrator
        .submit(&ThreadId::new("final-block"), "tides")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Blocked {
            message: prompts::OUTPUT_REFUSAL.to_string()
        }
    );
}

#[tokio::test]
async fn pre_guard_sees_window_of_user_messages() {
    let config = |window: usize| {
        let mut config = EngineConfig::default();
        config.guards.history_window = window;
        config
    };
    for (window, blocked) in [(10, true), (1, false)] {
        let h = harness_with(
            config(window),
            ScriptedClassifier::category(Category::Simple),
            ScriptedWorker::new(),
            StaticGuard::block_matching("jailbreak", "banana\nsplit"),
            StaticGuard::pass("content-safety"),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let thread = ThreadId::new("window");
        let first = h.orchestrator.submit(&thread, "I like banana").await.unwrap();
        assert!(matches!(first, Outcome::Delivered { .. }));

        let second = h.orchestrator.submit(&thread, "split it").await.unwrap();
        assert_eq!(matches!(second, Outcome::Blocked { .. }), blocked, "window {window}");
    }
}

#[tokio::test]
async fn suspended_thread_rejects_new_submissions() {
    let h = harness(Category::Multitopic, ScriptedWorker::new());
    let thread = ThreadId::new("awaiting");
    h.orchestrator.submit(&thread, "rust vs go").await.unwrap();
    let before = h.orchestrator.snapshot(&thread).await.unwrap();

    let err = h
        .orchestrator
        .submit(&thread, "something else")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AwaitingDecision { .. }));
    assert_eq!(h.orchestrator.snapshot(&thread).await.unwrap(), before);
}

#[tokio::test]
async fn corrupted_checkpoint_resets_thread() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let h = harness_with(
        EngineConfig::default(),
        ScriptedClassifier::category(Category::Simple),
        ScriptedWorker::new(),
        StaticGuard::pass("jailbreak"),
        StaticGuard::pass("content-safety"),
        store.clone(),
    );
    let thread = ThreadId::new("corrupt");
    h.orchestrator.submit(&thread, "first").await.unwrap();

    store.overwrite_raw(&thread, r#"{"stage":"delivered"}"#);

    let err = h.orchestrator.submit(&thread, "second").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CheckpointCorrupted { .. }));
    assert!(h.orchestrator.snapshot(&thread).await.unwrap().is_none());

    h.orchestrator.submit(&thread, "third").await.unwrap();
    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    assert_eq!(state.request.seq, 1);
    assert!(state.history.is_empty());
}

#[tokio::test]
async fn crashed_workflow_recovers_from_saved_stage() {
    // Intake, PreGuard and Classified are saved; the Planned save fails.
    let store = Arc::new(FlakyStore::failing_after(3));
    let h = harness_with(
        EngineConfig::default(),
        ScriptedClassifier::category(Category::Complex),
        ScriptedWorker::new(),
        StaticGuard::pass("jailbreak"),
        StaticGuard::pass("content-safety"),
        store.clone(),
    );
    let thread = ThreadId::new("crash");

    let err = h.orchestrator.submit(&thread, "ocean currents").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Storage(_)));
    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Classified);

    store.heal();
    let err = h.orchestrator.submit(&thread, "again").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::WorkflowInFlight {
            stage: Stage::Classified,
            ..
        }
    ));

    let outcome = h.orchestrator.recover(&thread).await.unwrap();
    assert!(matches!(outcome, Outcome::Delivered { .. }));
    assert_eq!(h.classifier.calls(), 1, "classification is not repeated");

    // Recovering a finished workflow returns its stored outcome.
    assert_eq!(h.orchestrator.recover(&thread).await.unwrap(), outcome);
    assert_eq!(h.worker.started().len(), 1);
}

#[tokio::test]
async fn threads_are_isolated_and_listed() {
    let h = harness(Category::Simple, ScriptedWorker::new());
    let a = ThreadId::new("thread-a");
    let b = ThreadId::new("thread-b");

    let (ra, rb) = tokio::join!(
        h.orchestrator.submit(&a, "alpha"),
        h.orchestrator.submit(&b, "beta")
    );
    assert!(ra.is_ok() && rb.is_ok());

    let mut threads = h.orchestrator.threads().await.unwrap();
    threads.sort();
    assert_eq!(threads, vec![a, b]);
}

#[tokio::test]
async fn failing_input_guard_blocks_benign_message() {
    let h = harness_with(
        EngineConfig::default(),
        ScriptedClassifier::category(Category::Simple),
        ScriptedWorker::new(),
        StaticGuard::failing("jailbreak"),
        StaticGuard::pass("content-safety"),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let thread = ThreadId::new("guard-error");

    let outcome = h.orchestrator.submit(&thread, "weather in Lisbon").await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Blocked {
            message: prompts::INPUT_REFUSAL.to_string()
        }
    );
    assert_eq!(h.classifier.calls(), 0);
    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Blocked);
}

#[tokio::test(start_paused = true)]
async fn stalled_input_guard_blocks_benign_message() {
    let mut config = EngineConfig::default();
    config.guards.timeout_secs = 2;
    let h = harness_with(
        config,
        ScriptedClassifier::category(Category::Simple),
        ScriptedWorker::new(),
        StaticGuard::pass("jailbreak").with_delay(Duration::from_secs(30)),
        StaticGuard::pass("content-safety"),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let thread = ThreadId::new("guard-timeout");

    let outcome = h.orchestrator.submit(&thread, "weather in Lisbon").await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Blocked {
            message: prompts::INPUT_REFUSAL.to_string()
        }
    );
    assert_eq!(h.classifier.calls(), 0);
    assert!(h.worker.started().is_empty());
}

#[tokio::test(start_paused = true)]
async fn three_way_comparison_runs_one_round_of_three_units() {
    let worker = ScriptedWorker::new()
        .with_delay_for("X", Duration::from_millis(200))
        .with_delay_for("Y", Duration::from_millis(200))
        .with_delay_for("Z", Duration::from_millis(200));
    let h = harness(Category::Multitopic, worker);
    let thread = ThreadId::new("three-way");

    let token_id = match h
        .orchestrator
        .submit(&thread, "Compare X vs Y vs Z")
        .await
        .unwrap()
    {
        Outcome::Suspended { token_id, .. } => token_id,
        other => panic!("expected suspended, got {other:?}"),
    };
    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    let token = state.interrupt_token.expect("token stored");
    assert_eq!(token.proposal.sub_questions, vec!["X", "Y", "Z"]);

    let request = ResumeRequest::new(thread.clone(), Decision::Approve).with_token(token_id);
    let outcome = h.orchestrator.resume(&request).await.unwrap();
    assert!(matches!(outcome, Outcome::Delivered { .. }));

    assert_eq!(h.worker.max_in_flight(), 3);
    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    assert_eq!(state.round, 1);
    assert_eq!(state.units.len(), 3);
    assert!(state.units.iter().all(|u| u.round == 0));
}

#[tokio::test(start_paused = true)]
async fn same_thread_submissions_run_one_at_a_time() {
    let worker = ScriptedWorker::new()
        .with_delay_for("first question", Duration::from_millis(500))
        .with_delay_for("second question", Duration::from_millis(500));
    let h = harness(Category::Simple, worker);
    let thread = ThreadId::new("serialized");

    let (first, second) = tokio::join!(
        h.orchestrator.submit(&thread, "first question"),
        h.orchestrator.submit(&thread, "second question")
    );
    assert!(matches!(first.unwrap(), Outcome::Delivered { .. }));
    assert!(matches!(second.unwrap(), Outcome::Delivered { .. }));

    assert_eq!(h.worker.max_in_flight(), 1, "workflows never overlap");
    let started = h.worker.started();
    assert_eq!(started.len(), 2);

    let state = h.orchestrator.snapshot(&thread).await.unwrap().unwrap();
    assert_eq!(state.request.seq, 2);
    assert_eq!(state.request.text, started[1]);
    assert_eq!(state.history[0].text, started[0]);
    assert_eq!(h.classifier.calls(), 2);
}
