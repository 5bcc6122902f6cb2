//! deepresearch providers
//!
//! HTTP adapters for the engine's collaborator traits: an OpenAI-compatible
//! chat model, NVIDIA NeMo and LLM-judged guard oracles, and Tavily search.

pub mod chat;
pub mod config;
pub mod error;
pub mod guards;
pub mod http;
pub mod tavily;

use std::sync::Arc;

use deepresearch_core::GuardOracle;

pub use chat::ChatClient;
pub use config::{ChatEndpoint, NemoEndpoints, ProviderConfig, TavilyEndpoint};
pub use error::{ProviderError, ProviderResult};
pub use guards::{ContentSafetyOracle, JailbreakOracle, PromptInjectionOracle};
pub use tavily::TavilySearch;

/// Concrete collaborators built from one [`ProviderConfig`].
pub struct Providers {
    pub chat: Arc<ChatClient>,
    /// Oracles for user text: content safety, jailbreak and prompt injection.
    pub input_guards: Vec<Arc<dyn GuardOracle>>,
    /// Oracles for generated text: content safety.
    pub output_guards: Vec<Arc<dyn GuardOracle>>,
    pub search: Option<Arc<TavilySearch>>,
}

impl Providers {
    /// Build every adapter whose endpoint is configured.
    pub fn from_config(config: &ProviderConfig) -> ProviderResult<Self> {
        let client = http::build_client(config.request_timeout)?;
        let chat = Arc::new(ChatClient::new(config.llm.clone(), client.clone()));

        let mut input_guards: Vec<Arc<dyn GuardOracle>> = Vec::new();
        let mut output_guards: Vec<Arc<dyn GuardOracle>> = Vec::new();

        if let Some(url) = &config.nemo.content_safety_url {
            let endpoint = ChatEndpoint {
                base_url: url.clone(),
                api_key: config.nemo.api_key.clone(),
                model: config.nemo.content_safety_model.clone(),
            };
            let oracle: Arc<dyn GuardOracle> =
                Arc::new(ContentSafetyOracle::new(endpoint, client.clone()));
            input_guards.push(Arc::clone(&oracle));
            output_guards.push(oracle);
        }
        if let Some(url) = &config.nemo.jailbreak_url {
            input_guards.push(Arc::new(JailbreakOracle::new(
                url.clone(),
                config.nemo.api_key.clone(),
                client.clone(),
            )));
        }
        if config.prompt_injection {
            input_guards.push(Arc::new(PromptInjectionOracle::new(ChatClient::new(
                config.llm.clone(),
                client.clone(),
            ))));
        }

        let search = config
            .tavily
            .clone()
            .map(|endpoint| Arc::new(TavilySearch::new(endpoint, client)));

        Ok(Self {
            chat,
            input_guards,
            output_guards,
            search,
        })
    }
}
