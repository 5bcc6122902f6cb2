//! The web search seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by a search backend.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search transport failed: {0}")]
    Transport(String),

    #[error("search backend returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("search response malformed: {0}")]
    Malformed(String),
}

/// Result type for search calls.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Search vertical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    #[default]
    General,
    News,
    Finance,
}

impl SearchTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
            SearchTopic::Finance => "finance",
        }
    }
}

impl std::str::FromStr for SearchTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(SearchTopic::General),
            "news" => Ok(SearchTopic::News),
            "finance" => Ok(SearchTopic::Finance),
            other => Err(format!("unknown search topic: {other}")),
        }
    }
}

/// One search result with its fetched content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        topic: SearchTopic,
    ) -> SearchResult<Vec<SearchHit>>;
}
