//! Linked-URL augmentation.
//!
//! Extracts URLs from the user turn, fetches the ones not already attached,
//! and turns the bodies into synthetic attachments. The fan-out settles per
//! slot: a slow or failing URL degrades to nothing and can never fail the
//! batch or the request.

use std::sync::OnceLock;
use std::time::Duration;

use chatgate_core::Attachment;
use futures_util::future::join_all;
use regex::Regex;

/// Deadline per individual URL fetch.
pub const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// At most this many new URLs are fetched per request.
pub const MAX_URLS_PER_REQUEST: usize = 3;

/// Fetched bodies are cut here before becoming attachments.
pub const URL_BODY_MAX_BYTES: usize = 10_000;

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid regex"))
}

/// Extract URLs from message text, deduped in first-seen order.
/// Trailing sentence punctuation is trimmed and non-parsing candidates
/// are dropped.
pub fn extract_urls(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in url_re().find_iter(content) {
        let u = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if u.is_empty() || out.iter().any(|seen| seen == u) {
            continue;
        }
        if url::Url::parse(u).is_err() {
            continue;
        }
        out.push(u.to_string());
    }
    out
}

/// URLs not already represented by a `"URL: <u>"` attachment.
pub fn new_urls(urls: &[String], attachments: &[Attachment]) -> Vec<String> {
    urls.iter()
        .filter(|u| !attachments.iter().any(|a| a.is_for_url(u)))
        .cloned()
        .collect()
}

/// Fetch up to [`MAX_URLS_PER_REQUEST`] URLs concurrently, each raced
/// against [`URL_FETCH_TIMEOUT`]. Failed or timed-out slots are dropped.
pub async fn fetch_url_attachments(client: &reqwest::Client, urls: &[String]) -> Vec<Attachment> {
    let futures = urls
        .iter()
        .take(MAX_URLS_PER_REQUEST)
        .map(|u| fetch_one(client, u));
    join_all(futures).await.into_iter().flatten().collect()
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Option<Attachment> {
    let attempt = async {
        let resp = client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.text().await.ok()
    };
    let body = tokio::time::timeout(URL_FETCH_TIMEOUT, attempt).await.ok()??;
    let body = truncate_bytes(tidy_body(&body), URL_BODY_MAX_BYTES);
    Some(Attachment::from_url(url, body))
}

/// Collapse runs of blank lines and trim edges; page bodies are noisy and
/// the byte cap should spend itself on content.
fn tidy_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut blank_run = 0usize;
    for line in body.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn truncate_bytes(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s
}
