use std::time::Duration;

use chatgate_core::{Error, Result};

pub mod anthropic;
pub mod decide;
pub mod fetch;
pub mod google;
pub mod krutrim;
pub mod openai;
pub mod openrouter;
pub mod search;
pub mod xai;

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn env_bool(key: &str) -> bool {
    matches!(
        std::env::var(key)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Shared HTTP client for all upstream calls.
///
/// Safety defaults: avoid "hang forever" on DNS/TLS/body stalls. Individual
/// call sites still apply their own per-request timeouts (5s URL fetch,
/// 7s search, 30s Krutrim).
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("chatgate/0.1")
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}
