//! Web-search executor (Brave-style web search API).
//!
//! The provider itself surfaces failures as [`Error::Search`]; the degrading
//! wrapper [`run_web_search`] is what request handling consumes: it races
//! the call against a 7s deadline and turns every failure mode into an
//! empty result list, so a slow or broken search API can never fail a chat
//! request.

use std::time::Duration;

use chatgate_core::{
    Error, Result, SearchResult, WebSearcher, MAX_RAW_SEARCH_RESULTS, MAX_SEARCH_RESULTS,
};
use serde::Deserialize;

use crate::env;

/// Deadline applied by callers around one search invocation.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(7);

const TITLE_PLACEHOLDER: &str = "Untitled";

fn search_api_key_from_env() -> Option<String> {
    env("CHATGATE_SEARCH_API_KEY").or_else(|| env("BRAVE_SEARCH_API_KEY"))
}

fn search_endpoint_from_env() -> Option<String> {
    env("CHATGATE_SEARCH_ENDPOINT")
}

#[derive(Debug, Clone)]
pub struct WebSearchProvider {
    client: reqwest::Client,
    api_key: String,
}

impl WebSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = search_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing CHATGATE_SEARCH_API_KEY (or BRAVE_SEARCH_API_KEY)".to_string(),
            )
        })?;
        Ok(Self { client, api_key })
    }

    fn endpoint() -> String {
        search_endpoint_from_env()
            .unwrap_or_else(|| "https://api.search.brave.com/res/v1/web/search".to_string())
    }

    async fn search_raw(&self, query: &str) -> Result<Vec<SearchResult>> {
        let resp = self
            .client
            .get(Self::endpoint())
            .header("X-Subscription-Token", &self.api_key)
            .query(&[
                ("q", query),
                ("count", &MAX_RAW_SEARCH_RESULTS.to_string()),
                ("search_lang", "en"),
            ])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("web search HTTP {status}")));
        }

        let parsed: WebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let mut out = Vec::new();
        if let Some(results) = parsed.web.and_then(|w| w.results) {
            for r in results.into_iter().take(MAX_RAW_SEARCH_RESULTS) {
                out.push(SearchResult {
                    title: r.title.unwrap_or_else(|| TITLE_PLACEHOLDER.to_string()),
                    url: r.url.unwrap_or_default(),
                    snippet: r.description.unwrap_or_default(),
                });
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl WebSearcher for WebSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let mut results = self.search_raw(query).await?;
        results.truncate(MAX_SEARCH_RESULTS);
        Ok(results)
    }
}

/// Stand-in when no search API is configured: every query resolves to
/// nothing, so augmentation quietly degrades instead of erroring.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearcher;

#[async_trait::async_trait]
impl WebSearcher for DisabledSearcher {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

/// Degrading search entry point: deadline-bounded, never fails.
pub async fn run_web_search(searcher: &dyn WebSearcher, query: &str) -> Vec<SearchResult> {
    match tokio::time::timeout(SEARCH_TIMEOUT, searcher.search(query)).await {
        Ok(Ok(results)) => results,
        Ok(Err(_)) | Err(_) => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchResponse {
    web: Option<WebSection>,
}

#[derive(Debug, Deserialize)]
struct WebSection {
    results: Option<Vec<RawResult>>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
}
