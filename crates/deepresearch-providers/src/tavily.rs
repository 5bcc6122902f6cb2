//! Tavily web search.
//!
//! Requests raw page content alongside the snippet so the worker sees the
//! full page without a second fetch. Results without raw content fall back
//! to the snippet.

use async_trait::async_trait;
use deepresearch_core::{SearchHit, SearchProvider, SearchResult, SearchTopic};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::TavilyEndpoint;
use crate::http;

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: &'static str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

impl From<TavilyResult> for SearchHit {
    fn from(result: TavilyResult) -> Self {
        let content = result
            .raw_content
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or(result.content);
        SearchHit {
            url: result.url,
            title: result.title,
            content,
        }
    }
}

pub struct TavilySearch {
    endpoint: TavilyEndpoint,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(endpoint: TavilyEndpoint, http: reqwest::Client) -> Self {
        Self { endpoint, http }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    #[instrument(skip(self, topic), fields(topic = topic.as_str()))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        topic: SearchTopic,
    ) -> SearchResult<Vec<SearchHit>> {
        let url = http::join_url(&self.endpoint.base_url, "search");
        let request = TavilyRequest {
            query,
            max_results,
            topic: topic.as_str(),
            include_raw_content: true,
        };
        let response: TavilyResponse =
            http::post_json(&self.http, &url, Some(&self.endpoint.api_key), &request).await?;

        let hits: Vec<SearchHit> = response
            .results
            .into_iter()
            .filter(|r| !r.url.trim().is_empty())
            .take(max_results)
            .map(SearchHit::from)
            .collect();
        debug!(hits = hits.len(), "search finished");
        Ok(hits)
    }
}
