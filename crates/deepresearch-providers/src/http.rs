//! Shared HTTP plumbing.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

const USER_AGENT: &str = concat!("deepresearch/", env!("CARGO_PKG_VERSION"));

/// Error bodies longer than this are cut before they reach logs or errors.
const MAX_ERROR_BODY: usize = 512;

pub fn build_client(timeout: Duration) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Client(e.to_string()))
}

/// POST `body` as JSON and decode a JSON reply. Non-2xx becomes `Api`.
pub async fn post_json<B, T>(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
) -> ProviderResult<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    debug!(url, status = status.as_u16(), bytes = text.len(), "POST completed");

    if !status.is_success() {
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body: truncate(&text, MAX_ERROR_BODY),
        });
    }
    Ok(serde_json::from_str(&text)?)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Join a base URL and a path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo", 2), "h...");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a/v1/", "/chat"), "http://a/v1/chat");
        assert_eq!(join_url("http://a", "search"), "http://a/search");
    }
}
