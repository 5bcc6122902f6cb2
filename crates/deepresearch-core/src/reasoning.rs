//! The language-model seam.
//!
//! The engine only needs a terminal text message or a set of tool calls back
//! from a [`ReasoningService`]; everything about the model lives behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors raised by a reasoning backend.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning transport failed: {0}")]
    Transport(String),

    #[error("reasoning backend returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("reasoning response malformed: {0}")]
    Malformed(String),

    #[error("reasoning call timed out after {elapsed:?}")]
    Timeout { elapsed: std::time::Duration },
}

/// Result type for reasoning calls.
pub type ReasoningResult<T> = std::result::Result<T, ReasoningError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message of a model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Set on `Tool` messages: which call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `Assistant` messages that requested tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// What the model returned for one invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReasoningReply {
    /// Text content, if any. Terminal when `tool_calls` is empty.
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tokens_used: u64,
}

impl ReasoningReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn tools(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }

    /// Trimmed text content, or `None` if absent or blank.
    pub fn text_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A language model that can follow a system prompt and call tools.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn invoke(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> ReasoningResult<ReasoningReply>;
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.find('\n') {
        Some(nl) if !rest[..nl].contains('{') && !rest[..nl].contains('[') => rest[nl + 1..].trim(),
        _ => rest.trim(),
    }
}
