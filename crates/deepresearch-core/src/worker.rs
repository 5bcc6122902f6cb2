//! Research workers: the code that answers one sub-question.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::config::{ConfigResult, EngineConfig, WorkerSettings};
use crate::domain::{ResearchUnit, Role, SourceRef, UnitResult};
use crate::guard::{DenylistOracle, GuardOracle, GuardStage};
use crate::prompts;
use crate::reasoning::{ChatMessage, ReasoningError, ReasoningService, ToolCall, ToolSpec};
use crate::search::{SearchHit, SearchProvider, SearchTopic};

/// Errors that fail a single research unit.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("reasoning failed: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("no findings after {iterations} iterations")]
    NoFindings { iterations: u32 },

    #[error("worker failed: {0}")]
    Other(String),
}

/// Result type for research workers.
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Answers one research unit.
#[async_trait]
pub trait ResearchWorker: Send + Sync {
    async fn research(&self, unit: &ResearchUnit) -> WorkerResult<UnitResult>;
}

/// The stage that screens fetched search content: `oracles` plus the
/// configured denylist. `None` when filtering is off or nothing would screen.
pub fn content_guard(
    config: &EngineConfig,
    oracles: &[Arc<dyn GuardOracle>],
) -> ConfigResult<Option<GuardStage>> {
    if !config.worker.filter_search_content {
        return Ok(None);
    }
    let mut guards = oracles.to_vec();
    guards.extend(DenylistOracle::from_settings(&config.guards)?);
    if guards.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        GuardStage::new("content", prompts::FILTERED_CONTENT, config.guard_timeout())
            .with_guards(guards),
    ))
}

const WEB_SEARCH: &str = "web_search";
const THINK: &str = "think";

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: WEB_SEARCH.to_string(),
            description: "Search the web. Returns numbered results with their content.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: THINK.to_string(),
            description: "Record a reflection on progress, gaps and next steps.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reflection": {"type": "string"}
                },
                "required": ["reflection"]
            }),
        },
    ]
}

/// Sources seen by one unit, numbered locally from 1 in first-seen order.
#[derive(Debug, Default)]
struct LocalSources {
    sources: Vec<SourceRef>,
}

impl LocalSources {
    fn register(&mut self, url: &str, title: &str) -> usize {
        let url = url.trim();
        if let Some(pos) = self.sources.iter().position(|s| s.url == url) {
            return pos + 1;
        }
        self.sources.push(SourceRef::new(url, title.trim()));
        self.sources.len()
    }
}

/// Worker that drives a [`ReasoningService`] through a bounded tool loop.
///
/// Tools: `web_search` (backed by a [`SearchProvider`]) and `think`.
/// Search content can be screened by a content [`GuardStage`]; blocked hits
/// are replaced by a notice and never cited.
pub struct AgentResearchWorker {
    reasoning: Arc<dyn ReasoningService>,
    search: Arc<dyn SearchProvider>,
    content_guard: Option<Arc<GuardStage>>,
    max_iterations: u32,
    reasoning_timeout: Duration,
    search_timeout: Duration,
    max_results: usize,
    topic: SearchTopic,
}

impl AgentResearchWorker {
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        search: Arc<dyn SearchProvider>,
        settings: &WorkerSettings,
    ) -> Self {
        Self {
            reasoning,
            search,
            content_guard: None,
            max_iterations: settings.max_iterations.max(1),
            reasoning_timeout: Duration::from_secs(settings.reasoning_timeout_secs),
            search_timeout: Duration::from_secs(settings.search_timeout_secs),
            max_results: settings.search_max_results,
            topic: settings.search_topic,
        }
    }

    /// Screen fetched content with `guard` before the model sees it.
    pub fn with_content_guard(mut self, guard: Arc<GuardStage>) -> Self {
        self.content_guard = Some(guard);
        self
    }

    async fn screen(&self, hit: &SearchHit) -> bool {
        match &self.content_guard {
            Some(guard) => guard.evaluate(&hit.content, Role::User).await.is_pass(),
            None => true,
        }
    }

    async fn run_search(&self, call: &ToolCall, sources: &mut LocalSources) -> String {
        let Some(query) = call.arguments.get("query").and_then(|q| q.as_str()) else {
            return "error: web_search requires a string `query` argument".to_string();
        };

        let hits = match tokio::time::timeout(
            self.search_timeout,
            self.search.search(query, self.max_results, self.topic),
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(query, error = %e, "search failed");
                return format!("error: search failed: {e}");
            }
            Err(_) => {
                warn!(query, "search timed out");
                return "error: search timed out".to_string();
            }
        };

        if hits.is_empty() {
            return "No results found.".to_string();
        }

        let mut out = String::new();
        for hit in &hits {
            if self.screen(hit).await {
                let k = sources.register(&hit.url, &hit.title);
                out.push_str(&format!(
                    "[{k}] {}\nURL: {}\n{}\n\n",
                    hit.title.trim(),
                    hit.url.trim(),
                    hit.content.trim()
                ));
            } else {
                debug!(url = %hit.url, "search content filtered");
                out.push_str(&format!("{}\n\n", prompts::FILTERED_CONTENT));
            }
        }
        out.trim_end().to_string()
    }
}

#[async_trait]
impl ResearchWorker for AgentResearchWorker {
    #[instrument(skip_all, fields(unit_id = %unit.id))]
    async fn research(&self, unit: &ResearchUnit) -> WorkerResult<UnitResult> {
        let tools = tool_specs();
        let mut messages = vec![ChatMessage::user(unit.sub_question.clone())];
        let mut sources = LocalSources::default();
        let mut last_text: Option<String> = None;
        let mut tokens_used = 0u64;

        for iteration in 0..self.max_iterations {
            let reply = tokio::time::timeout(
                self.reasoning_timeout,
                self.reasoning
                    .invoke(prompts::RESEARCHER_PROMPT, &messages, &tools),
            )
            .await
            .map_err(|_| ReasoningError::Timeout {
                elapsed: self.reasoning_timeout,
            })??;
            tokens_used += reply.tokens_used;

            if let Some(text) = reply.text_content() {
                last_text = Some(text.to_string());
            }

            if reply.is_terminal() {
                return match last_text {
                    Some(findings) => Ok(UnitResult {
                        unit_id: unit.id.clone(),
                        raw_findings: findings,
                        citations: sources.sources,
                        tokens_used,
                    }),
                    None => Err(WorkerError::NoFindings {
                        iterations: iteration + 1,
                    }),
                };
            }

            messages.push(ChatMessage::assistant(
                reply.content.clone().unwrap_or_default(),
                reply.tool_calls.clone(),
            ));

            for call in &reply.tool_calls {
                let output = match call.name.as_str() {
                    WEB_SEARCH => self.run_search(call, &mut sources).await,
                    THINK => {
                        if let Some(r) = call.arguments.get("reflection").and_then(|r| r.as_str())
                        {
                            debug!(reflection = r, "researcher reflection");
                        }
                        "Reflection recorded.".to_string()
                    }
                    other => format!("error: unknown tool {other}"),
                };
                messages.push(ChatMessage::tool(call.id.clone(), output));
            }
        }

        match last_text {
            Some(findings) => Ok(UnitResult {
                unit_id: unit.id.clone(),
                raw_findings: findings,
                citations: sources.sources,
                tokens_used,
            }),
            None => Err(WorkerError::NoFindings {
                iterations: self.max_iterations,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedReasoning, StaticGuard, StaticSearch};
    use crate::reasoning::ReasoningReply;

    fn search_call(id: &str, query: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: WEB_SEARCH.to_string(),
            arguments: json!({"query": query}),
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            search_max_results: 2,
            ..WorkerSettings::default()
        }
    }

    fn hits() -> Vec<SearchHit> {
        vec![
            SearchHit {
                url: "https://a.example/p".into(),
                title: "A".into(),
                content: "alpha facts".into(),
            },
            SearchHit {
                url: "https://b.example/q".into(),
                title: "B".into(),
                content: "beta facts".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_search_then_answer_collects_local_citations() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            ReasoningReply::tools(vec![search_call("c1", "alpha")]),
            ReasoningReply::tools(vec![search_call("c2", "alpha again")]),
            ReasoningReply::text("Alpha is real [1], beta too [2]."),
        ]));
        let search = Arc::new(StaticSearch::new(hits()));
        let worker = AgentResearchWorker::new(reasoning.clone(), search, &settings());

        let unit = ResearchUnit::new(0, 0, "what is alpha");
        let result = worker.research(&unit).await.unwrap();

        assert_eq!(result.unit_id, unit.id);
        assert_eq!(result.citations.len(), 2, "same URLs are registered once");
        assert_eq!(result.citations[0].url, "https://a.example/p");
        assert_eq!(reasoning.calls(), 3);
    }

    #[tokio::test]
    async fn test_blocked_content_is_not_cited() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            ReasoningReply::tools(vec![search_call("c1", "beta")]),
            ReasoningReply::text("Only alpha [1]."),
        ]));
        let search = Arc::new(StaticSearch::new(hits()));
        let guard = Arc::new(
            GuardStage::new("content", "blocked", Duration::from_secs(1)).with_guard(Arc::new(
                StaticGuard::block_matching("beta-filter", "beta"),
            )),
        );
        let worker = AgentResearchWorker::new(reasoning.clone(), search, &settings())
            .with_content_guard(guard);

        let result = worker
            .research(&ResearchUnit::new(0, 0, "beta"))
            .await
            .unwrap();
        assert_eq!(result.citations, vec![SourceRef::new("https://a.example/p", "A")]);

        let seen = reasoning.last_history();
        let tool_output = &seen.last().unwrap().content;
        assert!(tool_output.contains(prompts::FILTERED_CONTENT));
        assert!(!tool_output.contains("beta facts"));
    }

    #[tokio::test]
    async fn test_exhausted_loop_without_text_fails() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            ReasoningReply::tools(vec![search_call("c1", "x")]),
            ReasoningReply::tools(vec![search_call("c2", "y")]),
            ReasoningReply::tools(vec![search_call("c3", "z")]),
        ]));
        let worker = AgentResearchWorker::new(
            reasoning,
            Arc::new(StaticSearch::new(hits())),
            &settings(),
        );
        let err = worker
            .research(&ResearchUnit::new(0, 0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NoFindings { iterations: 3 }));
    }

    #[tokio::test]
    async fn test_reasoning_error_fails_unit() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![]));
        let worker = AgentResearchWorker::new(
            reasoning,
            Arc::new(StaticSearch::new(vec![])),
            &settings(),
        );
        let err = worker
            .research(&ResearchUnit::new(0, 0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Reasoning(_)));
    }

    #[tokio::test]
    async fn test_denylist_screens_search_content_without_backends() {
        let mut config = EngineConfig::default();
        config.guards.denylist = vec!["beta".into()];
        let guard = content_guard(&config, &[]).unwrap().expect("denylist alone screens");

        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            ReasoningReply::tools(vec![search_call("c1", "letters")]),
            ReasoningReply::text("Only alpha [1]."),
        ]));
        let worker = AgentResearchWorker::new(
            reasoning.clone(),
            Arc::new(StaticSearch::new(hits())),
            &settings(),
        )
        .with_content_guard(Arc::new(guard));

        let result = worker
            .research(&ResearchUnit::new(0, 0, "letters"))
            .await
            .unwrap();
        assert_eq!(result.citations, vec![SourceRef::new("https://a.example/p", "A")]);

        let seen = reasoning.last_history();
        let tool_output = &seen.last().unwrap().content;
        assert!(tool_output.contains(prompts::FILTERED_CONTENT));
        assert!(!tool_output.contains("beta facts"));
    }

    #[test]
    fn test_content_guard_absent_when_filtering_off_or_unconfigured() {
        let mut config = EngineConfig::default();
        assert!(content_guard(&config, &[]).unwrap().is_none());

        config.guards.denylist = vec!["beta".into()];
        config.worker.filter_search_content = false;
        assert!(content_guard(&config, &[]).unwrap().is_none());

        config.worker.filter_search_content = true;
        let oracles: Vec<Arc<dyn GuardOracle>> = vec![Arc::new(StaticGuard::pass("remote"))];
        assert_eq!(content_guard(&config, &oracles).unwrap().unwrap().len(), 2);
    }
}
