//! System-prompt synthesis, the TTL prompt cache, and process metrics.
//!
//! The cache and metrics are the only state outliving a request. Both are
//! injected through server state rather than living in globals; entries are
//! keyed independently and eviction tolerates interleaving, so a plain
//! mutex-guarded map is enough.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chatgate_core::ChatMessage;
use serde::Serialize;

/// Cached prompts older than this are misses.
pub const PROMPT_CACHE_TTL: Duration = Duration::from_secs(180);

/// Expired entries are swept lazily every Nth request.
const SWEEP_EVERY: u64 = 10;

const FINGERPRINT_MESSAGES: usize = 3;
const FINGERPRINT_CHARS: usize = 40;

const BASE_PROMPT: &str = "You are a helpful assistant. Answer clearly and accurately.";

#[derive(Debug, Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    total_processing_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump and return the running request count.
    pub fn record_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_processing_ms(&self, ms: u64) {
        self.total_processing_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            total_processing_ms: self.total_processing_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub total_processing_ms: u64,
}

struct CacheEntry {
    prompt: String,
    created: Instant,
}

pub struct PromptCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl PromptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cache key: last three messages, role plus the first 40 chars of each.
    pub fn fingerprint(messages: &[ChatMessage]) -> String {
        let start = messages.len().saturating_sub(FINGERPRINT_MESSAGES);
        messages[start..]
            .iter()
            .map(|m| {
                let head: String = m.content.chars().take(FINGERPRINT_CHARS).collect();
                format!("{}:{}", m.role, head)
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        if entry.created.elapsed() > self.ttl {
            return None;
        }
        Some(entry.prompt.clone())
    }

    pub fn insert(&self, key: String, prompt: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                prompt,
                created: Instant::now(),
            },
        );
    }

    /// Drop everything past TTL.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, e| e.created.elapsed() <= ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Derive the system prompt from conversation topics and user preferences.
pub fn synthesize_system_prompt(messages: &[ChatMessage]) -> String {
    let all_text = messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let user_text = messages
        .iter()
        .filter(|m| m.role == "user")
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let mut topics: Vec<&str> = Vec::new();
    if all_text.contains("code") || all_text.contains("programming") {
        topics.push("software development");
    }
    if all_text.contains("explain") || all_text.contains("how to") {
        topics.push("explanations");
    }
    if all_text.contains("data") || all_text.contains("analysis") {
        topics.push("data analysis");
    }

    let mut preferences: Vec<&str> = Vec::new();
    if user_text.contains("short") || user_text.contains("brief") || user_text.contains("concise")
    {
        preferences.push("concise responses");
    }
    if user_text.contains("detail") || user_text.contains("explain more") {
        preferences.push("detailed responses");
    }

    let mut out = BASE_PROMPT.to_string();
    if !topics.is_empty() {
        out.push_str(&format!(" The conversation involves: {}.", topics.join(", ")));
    }
    if !preferences.is_empty() {
        out.push_str(&format!(" The user prefers: {}.", preferences.join(", ")));
    }
    out
}

/// Cache-aware prompt lookup. `request_count` drives the lazy sweep.
pub fn system_prompt_for(
    cache: &PromptCache,
    metrics: &Metrics,
    request_count: u64,
    messages: &[ChatMessage],
) -> String {
    if request_count % SWEEP_EVERY == 0 {
        cache.sweep();
    }
    let key = PromptCache::fingerprint(messages);
    if let Some(prompt) = cache.get(&key) {
        metrics.record_cache_hit();
        return prompt;
    }
    let prompt = synthesize_system_prompt(messages);
    cache.insert(key, prompt.clone());
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn fingerprint_uses_last_three_messages_and_forty_chars() {
        let long = "a".repeat(100);
        let msgs = vec![
            msg("user", "one"),
            msg("assistant", "two"),
            msg("user", "three"),
            msg("assistant", &long),
        ];
        let fp = PromptCache::fingerprint(&msgs);
        assert!(!fp.contains("one"));
        assert!(fp.contains("two"));
        assert!(fp.starts_with("assistant:two|user:three|assistant:"));
        // 40-char head of the long message, not all 100.
        assert!(fp.ends_with(&"a".repeat(40)));
        assert!(!fp.ends_with(&"a".repeat(41)));
    }

    #[test]
    fn identical_tails_share_a_fingerprint() {
        let a = vec![msg("user", "old"), msg("user", "x"), msg("assistant", "y"), msg("user", "z")];
        let b = vec![msg("user", "different"), msg("user", "x"), msg("assistant", "y"), msg("user", "z")];
        assert_eq!(PromptCache::fingerprint(&a), PromptCache::fingerprint(&b));
    }

    #[test]
    fn cache_hit_within_ttl_increments_counter() {
        let cache = PromptCache::new(PROMPT_CACHE_TTL);
        let metrics = Metrics::new();
        let msgs = vec![msg("user", "hello there")];

        let first = system_prompt_for(&cache, &metrics, 1, &msgs);
        let second = system_prompt_for(&cache, &metrics, 2, &msgs);
        assert_eq!(first, second);
        assert_eq!(metrics.snapshot().cache_hits, 1);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = PromptCache::new(Duration::ZERO);
        cache.insert("k".into(), "v".into());
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn sweep_runs_on_every_tenth_request() {
        let cache = PromptCache::new(Duration::ZERO);
        cache.insert("stale".into(), "v".into());
        let metrics = Metrics::new();
        system_prompt_for(&cache, &metrics, 9, &[msg("user", "q")]);
        assert!(cache.len() >= 2);
        system_prompt_for(&cache, &metrics, 10, &[msg("user", "q2")]);
        // The tenth request sweeps everything expired before inserting.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn synthesizer_detects_topics_and_preferences() {
        let msgs = vec![
            msg("user", "Can you explain this code to me?"),
            msg("assistant", "Sure, the code does data analysis."),
            msg("user", "Keep it brief please."),
        ];
        let p = synthesize_system_prompt(&msgs);
        assert!(p.starts_with(BASE_PROMPT));
        assert!(p.contains("software development"));
        assert!(p.contains("explanations"));
        assert!(p.contains("data analysis"));
        assert!(p.contains("concise responses"));
        assert!(!p.contains("detailed responses"));
    }

    #[test]
    fn assistant_preferences_do_not_count() {
        let msgs = vec![
            msg("assistant", "I will keep this brief."),
            msg("user", "what is the weather like"),
        ];
        let p = synthesize_system_prompt(&msgs);
        assert!(!p.contains("concise responses"));
    }
}
