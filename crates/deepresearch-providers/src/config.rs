//! Endpoint configuration, read from the environment.

use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";
pub const DEFAULT_CONTENT_SAFETY_MODEL: &str = "nvidia/llama-3.1-nemoguard-8b-content-safety";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// An OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// NVIDIA NeMo guardrail endpoints. Each is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NemoEndpoints {
    pub api_key: Option<String>,
    pub content_safety_url: Option<String>,
    pub content_safety_model: String,
    pub jailbreak_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TavilyEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Everything the HTTP adapters need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub llm: ChatEndpoint,
    pub nemo: NemoEndpoints,
    /// Run the LLM prompt-injection classifier as an input guard.
    pub prompt_injection: bool,
    /// `None` when `TAVILY_API_KEY` is unset.
    pub tavily: Option<TavilyEndpoint>,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> ProviderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let llm = ChatEndpoint {
            base_url: get("DEEPRESEARCH_LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            api_key: get("DEEPRESEARCH_LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            model: get("DEEPRESEARCH_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        };

        let nemo = NemoEndpoints {
            api_key: get("NVIDIA_NEMO_API"),
            content_safety_url: get("NVIDIA_NEMO_CONTENT_SAFETY_URL"),
            content_safety_model: get("NVIDIA_NEMO_CONTENT_SAFETY_MODEL")
                .unwrap_or_else(|| DEFAULT_CONTENT_SAFETY_MODEL.to_string()),
            jailbreak_url: get("NVIDIA_NEMO_JAILBREAK_URL"),
        };

        let prompt_injection = match get("DEEPRESEARCH_PROMPT_INJECTION") {
            None => false,
            Some(v) => parse_flag("DEEPRESEARCH_PROMPT_INJECTION", &v)?,
        };

        let tavily = get("TAVILY_API_KEY").map(|api_key| TavilyEndpoint {
            base_url: get("TAVILY_BASE_URL").unwrap_or_else(|| DEFAULT_TAVILY_BASE_URL.to_string()),
            api_key,
        });

        let timeout_secs = match get("DEEPRESEARCH_HTTP_TIMEOUT_SECS") {
            None => DEFAULT_TIMEOUT_SECS,
            Some(v) => v.parse().map_err(|_| ProviderError::InvalidEnv {
                key: "DEEPRESEARCH_HTTP_TIMEOUT_SECS".to_string(),
                value: v.clone(),
            })?,
        };

        Ok(Self {
            llm,
            nemo,
            prompt_injection,
            tavily,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// The Tavily endpoint, or `MissingEnv` if search is not configured.
    pub fn require_tavily(&self) -> ProviderResult<&TavilyEndpoint> {
        self.tavily.as_ref().ok_or_else(|| ProviderError::MissingEnv {
            key: "TAVILY_API_KEY".to_string(),
        })
    }
}

fn parse_flag(key: &str, value: &str) -> ProviderResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProviderError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
