//! OpenAI-compatible chat completions.
//!
//! Works against any `/chat/completions` endpoint that speaks the OpenAI
//! wire format, including tool calls.

use async_trait::async_trait;
use deepresearch_core::{
    ChatMessage, MessageRole, ReasoningReply, ReasoningResult, ReasoningService, ToolCall, ToolSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::config::ChatEndpoint;
use crate::error::{ProviderError, ProviderResult};
use crate::http;

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
}

impl WireMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

/// Arguments travel as a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: WireMessage,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

fn to_wire(message: &ChatMessage) -> WireMessage {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };
    WireMessage {
        role: role.to_string(),
        content: Some(message.content.clone()),
        tool_call_id: message.tool_call_id.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: function_kind(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
    }
}

fn from_wire_call(call: WireToolCall) -> ProviderResult<ToolCall> {
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(raw).map_err(|e| {
            ProviderError::Decode(format!(
                "tool call {} has invalid arguments: {e}",
                call.function.name
            ))
        })?
    };
    Ok(ToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    })
}

/// Client for one chat model.
pub struct ChatClient {
    endpoint: ChatEndpoint,
    http: reqwest::Client,
    temperature: Option<f64>,
}

impl ChatClient {
    pub fn new(endpoint: ChatEndpoint, http: reqwest::Client) -> Self {
        Self {
            endpoint,
            http,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    pub(crate) async fn complete(
        &self,
        messages: Vec<WireMessage>,
        tools: Vec<WireTool>,
    ) -> ProviderResult<ChatResponse> {
        let request = ChatRequest {
            model: &self.endpoint.model,
            messages,
            temperature: self.temperature,
            tools,
        };
        let url = http::join_url(&self.endpoint.base_url, "chat/completions");
        http::post_json(&self.http, &url, self.endpoint.api_key.as_deref(), &request).await
    }

    async fn invoke_inner(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> ProviderResult<ReasoningReply> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.trim().is_empty() {
            messages.push(WireMessage::new("system", system_prompt));
        }
        messages.extend(history.iter().map(to_wire));

        let tools = tools
            .iter()
            .map(|spec| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                },
            })
            .collect();

        let response = self.complete(messages, tools).await?;
        let usage = response.usage.unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("response has no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(from_wire_call)
            .collect::<ProviderResult<Vec<_>>>()?;

        Ok(ReasoningReply {
            content: choice.message.content,
            tool_calls,
            tokens_used: usage.prompt_tokens + usage.completion_tokens,
        })
    }
}

#[async_trait]
impl ReasoningService for ChatClient {
    #[instrument(skip_all, fields(model = %self.endpoint.model, history = history.len()))]
    async fn invoke(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> ReasoningResult<ReasoningReply> {
        Ok(self.invoke_inner(system_prompt, history, tools).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_arguments_decode() {
        let call = WireToolCall {
            id: "c1".into(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: "web_search".into(),
                arguments: r#"{"query":"tides"}"#.into(),
            },
        };
        let call = from_wire_call(call).unwrap();
        assert_eq!(call.arguments, json!({"query": "tides"}));
    }

    #[test]
    fn test_empty_arguments_become_object() {
        let call = WireToolCall {
            id: "c1".into(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: "think".into(),
                arguments: String::new(),
            },
        };
        assert_eq!(from_wire_call(call).unwrap().arguments, json!({}));
    }

    #[test]
    fn test_bad_arguments_are_decode_errors() {
        let call = WireToolCall {
            id: "c1".into(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: "think".into(),
                arguments: "{not json".into(),
            },
        };
        assert!(matches!(from_wire_call(call), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_tool_message_wire_shape() {
        let wire = to_wire(&ChatMessage::tool("c9", "result"));
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "c9");
        assert!(value.get("tool_calls").is_none());
    }
}
