//! Sub-question planning.
//!
//! A [`Planner`] produces the first round of sub-questions and, after each
//! round, optionally a further round of follow-ups. Planning never aborts a
//! workflow: [`plan_with_fallback`] degrades to the canonical request.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Category, Classification, UnitResult};
use crate::prompts;
use crate::reasoning::{
    strip_code_fence, ChatMessage, ReasoningError, ReasoningResult, ReasoningService,
};

#[async_trait]
pub trait Planner: Send + Sync {
    /// Sub-questions for the first round.
    async fn plan(&self, classification: &Classification) -> ReasoningResult<Vec<String>>;

    /// Sub-questions for another round, or empty when research is complete.
    async fn follow_up(
        &self,
        classification: &Classification,
        results: &[UnitResult],
        completed_rounds: u32,
    ) -> ReasoningResult<Vec<String>>;
}

/// Plan with a deadline, falling back to one unit for the canonical request.
pub async fn plan_with_fallback(
    planner: &dyn Planner,
    classification: &Classification,
    timeout: Duration,
) -> Vec<String> {
    let planned = match tokio::time::timeout(timeout, planner.plan(classification)).await {
        Ok(Ok(questions)) => questions,
        Ok(Err(e)) => {
            warn!(error = %e, "planner failed; using canonical request");
            Vec::new()
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "planner timed out; using canonical request");
            Vec::new()
        }
    };
    let planned = clean(planned);
    if planned.is_empty() {
        vec![classification.canonical_request.clone()]
    } else {
        planned
    }
}

fn clean(questions: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(questions.len());
    for q in questions {
        let q = q.trim().to_string();
        if !q.is_empty() && !out.contains(&q) {
            out.push(q);
        }
    }
    out
}

static TOPIC_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:vs\.?|versus)\s+|\s*;\s*").expect("valid regex"));

static COMPARE_LEAD_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:compare|contrast)\s+").expect("valid regex"));

/// Deterministic planner.
///
/// Uses the classifier's sub-questions when present, splits multitopic
/// requests on `vs` / `versus` / `;`, and otherwise plans a single unit.
/// Never asks for follow-up rounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicPlanner;

impl TopicPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Split a multitopic request into its topics.
    pub fn split_topics(&self, request: &str) -> Vec<String> {
        let body = COMPARE_LEAD_IN.replace(request, "");
        clean(
            TOPIC_SEPARATOR
                .split(body.trim().trim_end_matches(['?', '.']))
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn plan_for(&self, classification: &Classification) -> Vec<String> {
        if !classification.sub_questions.is_empty() {
            return clean(classification.sub_questions.clone());
        }
        if classification.category == Category::Multitopic {
            let topics = self.split_topics(&classification.canonical_request);
            if topics.len() > 1 {
                return topics;
            }
        }
        vec![classification.canonical_request.clone()]
    }
}

#[async_trait]
impl Planner for TopicPlanner {
    async fn plan(&self, classification: &Classification) -> ReasoningResult<Vec<String>> {
        Ok(self.plan_for(classification))
    }

    async fn follow_up(
        &self,
        _classification: &Classification,
        _results: &[UnitResult],
        _completed_rounds: u32,
    ) -> ReasoningResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Planner that asks a [`ReasoningService`] for sub-questions.
///
/// Falls back to [`TopicPlanner`] when the model fails or answers with
/// something other than a JSON array of strings.
pub struct ReasoningPlanner {
    reasoning: Arc<dyn ReasoningService>,
    topics: TopicPlanner,
    /// Cap on sub-questions accepted per round.
    max_per_round: usize,
}

impl ReasoningPlanner {
    pub fn new(reasoning: Arc<dyn ReasoningService>, max_per_round: usize) -> Self {
        Self {
            reasoning,
            topics: TopicPlanner::new(),
            max_per_round: max_per_round.max(1),
        }
    }

    async fn ask(&self, prompt: &str, message: String) -> ReasoningResult<Vec<String>> {
        let reply = self
            .reasoning
            .invoke(prompt, &[ChatMessage::user(message)], &[])
            .await?;
        let text = reply.text_content().unwrap_or("[]");
        let value: Value = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| ReasoningError::Malformed(format!("planner reply not JSON: {e}")))?;
        let items = value
            .as_array()
            .ok_or_else(|| ReasoningError::Malformed("planner reply not an array".into()))?;
        let mut questions = clean(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        );
        questions.truncate(self.max_per_round);
        Ok(questions)
    }
}

#[async_trait]
impl Planner for ReasoningPlanner {
    async fn plan(&self, classification: &Classification) -> ReasoningResult<Vec<String>> {
        if !classification.sub_questions.is_empty() {
            return Ok(self.topics.plan_for(classification));
        }
        let message = format!(
            "Request: {}\nCategory: {}",
            classification.canonical_request, classification.category
        );
        match self.ask(prompts::PLANNER_PROMPT, message).await {
            Ok(questions) if !questions.is_empty() => Ok(questions),
            Ok(_) => Ok(self.topics.plan_for(classification)),
            Err(e) => {
                warn!(error = %e, "reasoning planner failed; using topic planner");
                Ok(self.topics.plan_for(classification))
            }
        }
    }

    async fn follow_up(
        &self,
        classification: &Classification,
        results: &[UnitResult],
        completed_rounds: u32,
    ) -> ReasoningResult<Vec<String>> {
        let mut message = format!(
            "Request: {}\nRounds completed: {completed_rounds}\n\nFindings so far:\n",
            classification.canonical_request
        );
        for result in results {
            message.push_str(&format!("- {}\n", result.raw_findings.trim()));
        }
        match self.ask(prompts::FOLLOW_UP_PROMPT, message).await {
            Ok(questions) => {
                debug!(count = questions.len(), "follow-up questions planned");
                Ok(questions)
            }
            Err(e) => {
                warn!(error = %e, "follow-up planning failed; stopping delegation");
                Ok(Vec::new())
            }
        }
    }
}
