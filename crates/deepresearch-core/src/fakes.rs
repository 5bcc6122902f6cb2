//! Deterministic in-process fakes for the engine's capabilities.
//!
//! Used by unit and integration tests, and by the CLI's `--offline` mode.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::classify::{Classifier, Decoded};
use crate::domain::{Category, Classification, Request, ResearchUnit, Role, SourceRef, Turn, UnitResult};
use crate::guard::{GuardError, GuardOracle, GuardResult, GuardVerdict};
use crate::reasoning::{
    ChatMessage, ReasoningError, ReasoningReply, ReasoningResult, ReasoningService, ToolSpec,
};
use crate::search::{SearchHit, SearchProvider, SearchResult, SearchTopic};
use crate::worker::{ResearchWorker, WorkerError, WorkerResult};

// ---------------------------------------------------------------------------
// StaticGuard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum GuardBehaviour {
    Pass,
    Block(String),
    BlockMatching(String),
    Fail,
}

/// Guard with a fixed answer and optional latency.
#[derive(Debug)]
pub struct StaticGuard {
    name: String,
    behaviour: GuardBehaviour,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticGuard {
    fn with_behaviour(name: &str, behaviour: GuardBehaviour) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::with_behaviour(name, GuardBehaviour::Pass)
    }

    pub fn block(name: &str, reason: &str) -> Self {
        Self::with_behaviour(name, GuardBehaviour::Block(reason.to_string()))
    }

    /// Blocks text containing `needle` (case-insensitive), passes the rest.
    pub fn block_matching(name: &str, needle: &str) -> Self {
        Self::with_behaviour(name, GuardBehaviour::BlockMatching(needle.to_lowercase()))
    }

    /// Always returns a transport error.
    pub fn failing(name: &str) -> Self {
        Self::with_behaviour(name, GuardBehaviour::Fail)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of checks started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuardOracle for StaticGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, text: &str, _role: Role) -> GuardResult<GuardVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behaviour {
            GuardBehaviour::Pass => Ok(GuardVerdict::pass(&self.name)),
            GuardBehaviour::Block(reason) => Ok(GuardVerdict::block(&self.name, reason)),
            GuardBehaviour::BlockMatching(needle) if text.to_lowercase().contains(needle) => Ok(
                GuardVerdict::block(&self.name, format!("matched {needle:?}")),
            ),
            GuardBehaviour::BlockMatching(_) => Ok(GuardVerdict::pass(&self.name)),
            GuardBehaviour::Fail => Err(GuardError::Transport("scripted failure".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedClassifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ClassifierScript {
    Category(Category),
    Valid(Classification),
    Malformed(String),
    Fail,
}

/// Classifier with a fixed answer.
#[derive(Debug)]
pub struct ScriptedClassifier {
    script: ClassifierScript,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    fn scripted(script: ClassifierScript) -> Self {
        Self {
            script,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Classify every request as `category`, echoing its text as canonical.
    pub fn category(category: Category) -> Self {
        Self::scripted(ClassifierScript::Category(category))
    }

    pub fn valid(classification: Classification) -> Self {
        Self::scripted(ClassifierScript::Valid(classification))
    }

    pub fn malformed(raw: &str) -> Self {
        Self::scripted(ClassifierScript::Malformed(raw.to_string()))
    }

    pub fn failing() -> Self {
        Self::scripted(ClassifierScript::Fail)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, request: &Request, _history: &[Turn]) -> ReasoningResult<Decoded> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            ClassifierScript::Category(category) => Ok(Decoded::Valid(Classification {
                category: *category,
                canonical_request: request.text.trim().to_string(),
                needs_interrupt: false,
                rationale: format!("scripted {category}"),
                sub_questions: Vec::new(),
            })),
            ClassifierScript::Valid(c) => Ok(Decoded::Valid(c.clone())),
            ClassifierScript::Malformed(raw) => Ok(Decoded::Malformed(raw.clone())),
            ClassifierScript::Fail => Err(ReasoningError::Transport("scripted failure".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedReasoning
// ---------------------------------------------------------------------------

/// Reasoning service that replays a queue of replies, one per call.
#[derive(Debug, Default)]
pub struct ScriptedReasoning {
    replies: Mutex<VecDeque<ReasoningReply>>,
    calls: AtomicUsize,
    last_history: Mutex<Vec<ChatMessage>>,
}

impl ScriptedReasoning {
    pub fn new(replies: Vec<ReasoningReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages passed to the most recent call.
    pub fn last_history(&self) -> Vec<ChatMessage> {
        self.last_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn invoke(
        &self,
        _system_prompt: &str,
        history: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> ReasoningResult<ReasoningReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_history.lock().unwrap() = history.to_vec();
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ReasoningError::Malformed("script exhausted".into()))
    }
}

// ---------------------------------------------------------------------------
// StaticSearch
// ---------------------------------------------------------------------------

/// Search provider returning the same hits for every query.
#[derive(Debug, Default)]
pub struct StaticSearch {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _topic: SearchTopic,
    ) -> SearchResult<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedWorker
// ---------------------------------------------------------------------------

/// Decrements the in-flight gauge even when the unit future is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Research worker keyed by sub-question.
///
/// Default findings are `Findings about {question}`, with a `[1]` marker when
/// the question has scripted citations.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    delays: HashMap<String, Duration>,
    citations: HashMap<String, Vec<SourceRef>>,
    findings: HashMap<String, String>,
    failures: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_for(mut self, question: &str, delay: Duration) -> Self {
        self.delays.insert(question.to_string(), delay);
        self
    }

    pub fn with_citations_for(mut self, question: &str, sources: Vec<SourceRef>) -> Self {
        self.citations.insert(question.to_string(), sources);
        self
    }

    pub fn with_findings_for(mut self, question: &str, findings: &str) -> Self {
        self.findings.insert(question.to_string(), findings.to_string());
        self
    }

    pub fn with_failure_for(mut self, question: &str) -> Self {
        self.failures.insert(question.to_string());
        self
    }

    /// Highest number of units observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sub-questions in the order their units started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchWorker for ScriptedWorker {
    async fn research(&self, unit: &ResearchUnit) -> WorkerResult<UnitResult> {
        let question = unit.sub_question.as_str();
        self.started.lock().unwrap().push(question.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(delay) = self.delays.get(question) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(question) {
            return Err(WorkerError::Other(format!("scripted failure for {question}")));
        }

        let citations = self.citations.get(question).cloned().unwrap_or_default();
        let raw_findings = match self.findings.get(question) {
            Some(text) => text.clone(),
            None if citations.is_empty() => format!("Findings about {question}"),
            None => format!("Findings about {question} [1]"),
        };
        Ok(UnitResult {
            unit_id: unit.id.clone(),
            raw_findings,
            citations,
            tokens_used: 10,
        })
    }
}
