//! Request classification.
//!
//! Model output is never trusted as-is: [`decode_classification`] turns raw
//! text into either a well-typed [`Classification`] or [`Decoded::Malformed`],
//! and [`classify_with_fallback`] maps every failure to the safe default.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::domain::{Category, Classification, Request, Role, Turn};
use crate::prompts;
use crate::reasoning::{strip_code_fence, ChatMessage, ReasoningResult, ReasoningService};

/// Outcome of decoding classifier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Valid(Classification),
    Malformed(String),
}

/// Produces a routing decision for a request.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &Request, history: &[Turn]) -> ReasoningResult<Decoded>;
}

fn field<'a>(obj: &'a serde_json::Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n))
}

/// Decode raw model text into a classification.
///
/// Accepts an optional markdown fence and the `type` / `rewritten_query` /
/// `reason` aliases. All four core fields are required.
pub fn decode_classification(raw: &str) -> Decoded {
    let body = strip_code_fence(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return Decoded::Malformed(format!("not JSON: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return Decoded::Malformed("expected a JSON object".to_string());
    };

    let category = match field(obj, &["category", "type"]).and_then(Value::as_str) {
        Some(s) => match s.parse::<Category>() {
            Ok(c) => c,
            Err(e) => return Decoded::Malformed(e),
        },
        None => return Decoded::Malformed("missing category".to_string()),
    };

    let canonical_request = match field(obj, &["canonical_request", "rewritten_query"])
        .and_then(Value::as_str)
    {
        Some(s) => s.trim().to_string(),
        None => return Decoded::Malformed("missing canonical_request".to_string()),
    };
    if canonical_request.is_empty() && category != Category::Rubbish {
        return Decoded::Malformed("empty canonical_request".to_string());
    }

    let Some(needs_interrupt) = field(obj, &["needs_interrupt"]).and_then(Value::as_bool) else {
        return Decoded::Malformed("missing needs_interrupt".to_string());
    };

    let rationale = match field(obj, &["rationale", "reason"]).and_then(Value::as_str) {
        Some(s) => s.trim().to_string(),
        None => return Decoded::Malformed("missing rationale".to_string()),
    };

    let sub_questions = field(obj, &["sub_questions"])
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Decoded::Valid(Classification {
        category,
        canonical_request,
        needs_interrupt,
        rationale,
        sub_questions,
    })
}

/// Classify with a deadline. Errors, timeouts and malformed output all yield
/// [`Classification::fallback`]; this never fails.
#[instrument(skip_all, fields(thread_id = %request.thread_id, seq = request.seq))]
pub async fn classify_with_fallback(
    classifier: &dyn Classifier,
    request: &Request,
    history: &[Turn],
    timeout: Duration,
) -> Classification {
    match tokio::time::timeout(timeout, classifier.classify(request, history)).await {
        Ok(Ok(Decoded::Valid(c))) => c,
        Ok(Ok(Decoded::Malformed(reason))) => {
            warn!(%reason, "classifier output malformed; using fallback");
            Classification::fallback(&request.text)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "classifier failed; using fallback");
            Classification::fallback(&request.text)
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "classifier timed out; using fallback");
            Classification::fallback(&request.text)
        }
    }
}

/// Classifier backed by a [`ReasoningService`].
pub struct ReasoningClassifier {
    reasoning: Arc<dyn ReasoningService>,
}

impl ReasoningClassifier {
    pub fn new(reasoning: Arc<dyn ReasoningService>) -> Self {
        Self { reasoning }
    }
}

#[async_trait]
impl Classifier for ReasoningClassifier {
    async fn classify(&self, request: &Request, history: &[Turn]) -> ReasoningResult<Decoded> {
        let mut transcript = String::new();
        for turn in history {
            let who = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            transcript.push_str(&format!("{who}: {}\n", turn.text));
        }
        let message = if transcript.is_empty() {
            format!("Latest message:\n{}", request.text)
        } else {
            format!(
                "Conversation so far:\n{transcript}\nLatest message:\n{}",
                request.text
            )
        };

        let reply = self
            .reasoning
            .invoke(prompts::CLASSIFIER_PROMPT, &[ChatMessage::user(message)], &[])
            .await?;

        Ok(match reply.text_content() {
            Some(text) => decode_classification(text),
            None => Decoded::Malformed("empty classifier reply".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedClassifier, ScriptedReasoning};
    use crate::reasoning::ReasoningReply;
    use deepresearch_state::ThreadId;

    fn request(text: &str) -> Request {
        Request::new(ThreadId::new("t"), 1, text)
    }

    #[test]
    fn test_decode_accepts_fenced_aliases() {
        let raw = r#"```json
        {"type": "multitopic", "rewritten_query": "fusion progress and AI startups",
         "needs_interrupt": true, "reason": "two topics"}
        ```"#;
        match decode_classification(raw) {
            Decoded::Valid(c) => {
                assert_eq!(c.category, Category::Multitopic);
                assert_eq!(c.canonical_request, "fusion progress and AI startups");
                assert!(c.needs_interrupt);
                assert_eq!(c.rationale, "two topics");
            }
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let raw = r#"{"category": "complex", "canonical_request": "x", "rationale": "y"}"#;
        assert_eq!(
            decode_classification(raw),
            Decoded::Malformed("missing needs_interrupt".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_unknown_category() {
        let raw = r#"{"category": "weird", "canonical_request": "x", "needs_interrupt": false, "rationale": "y"}"#;
        assert!(matches!(decode_classification(raw), Decoded::Malformed(_)));
    }

    #[test]
    fn test_decode_keeps_sub_questions() {
        let raw = r#"{"category": "multitopic", "canonical_request": "A vs B",
            "needs_interrupt": false, "rationale": "compare", "sub_questions": ["A", " B ", ""]}"#;
        match decode_classification(raw) {
            Decoded::Valid(c) => assert_eq!(c.sub_questions, vec!["A", "B"]),
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back_to_complex() {
        let classifier = ScriptedClassifier::malformed("garbage");
        let c = classify_with_fallback(
            &classifier,
            &request("tell me about tides"),
            &[],
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(c.category, Category::Complex);
        assert!(!c.needs_interrupt);
        assert_eq!(c.canonical_request, "tell me about tides");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_classifier_falls_back() {
        let classifier = ScriptedClassifier::category(Category::Rubbish)
            .with_delay(Duration::from_secs(120));
        let c = classify_with_fallback(&classifier, &request("hi"), &[], Duration::from_secs(60))
            .await;
        assert_eq!(c.category, Category::Complex);
    }

    #[tokio::test]
    async fn test_reasoning_classifier_decodes_reply() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![ReasoningReply::text(
            r#"{"category":"simple","canonical_request":"capital of France","needs_interrupt":false,"rationale":"fact"}"#,
        )]));
        let classifier = ReasoningClassifier::new(reasoning.clone());
        let decoded = classifier
            .classify(&request("capital of france?"), &[Turn::user("hello")])
            .await
            .unwrap();
        assert!(matches!(decoded, Decoded::Valid(c) if c.category == Category::Simple));
        assert_eq!(reasoning.calls(), 1);
    }
}
