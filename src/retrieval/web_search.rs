//! Web search collaborator for the conditional expansion stage.
//! Grounded on `web_search.py`'s Tavily client call.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> EngineResult<Vec<WebSearchResult>>;
}

pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl TavilySearch {
    pub fn new(api_key: String) -> EngineResult<Self> {
        let client = reqwest::ClientBuilder::new()
            .build()
            .map_err(|e| EngineError::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }

    /// `None` when `TAVILY_API_KEY` is unset, mirroring the original's
    /// "skip rather than fail" behavior for an optional collaborator.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty())?;
        TavilySearch::new(api_key).ok()
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> EngineResult<Vec<WebSearchResult>> {
        let response = self
            .client
            .post("https://api.tavily.com/search")
            .json(&serde_json::json!({
                "api_key": self.api_key,
                "query": query,
                "search_depth": "basic",
                "max_results": max_results,
                "include_answer": false,
            }))
            .send()
            .await
            .map_err(|e| EngineError::Retrieval(format!("web search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Retrieval(format!(
                "web search API returned {}",
                response.status()
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Retrieval(format!("decoding web search response: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| WebSearchResult {
                title: r.title,
                url: r.url,
                content: r.content,
                score: r.score,
            })
            .collect())
    }
}

/// Stable short fingerprint for a URL, used as the vector store's
/// idempotency key for web results. Grounded on `provenance.rs`'s hashing
/// idiom, reused here for content-addressing rather than signing.
pub fn url_fingerprint(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_fingerprint_is_stable_and_short() {
        let a = url_fingerprint("https://example.com/react");
        let b = url_fingerprint("https://example.com/react");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn url_fingerprint_differs_for_different_urls() {
        assert_ne!(
            url_fingerprint("https://example.com/a"),
            url_fingerprint("https://example.com/b")
        );
    }
}
