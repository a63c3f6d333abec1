//! Anthropic Messages API adapter.
//!
//! The wire format requires strictly alternating user/assistant messages
//! and takes the system prompt through a dedicated field, never as a
//! message. Images ride as `image` content blocks with URL sources.

use chatgate_core::{
    estimate_tokens, AdapterRequest, Error, ProviderAdapter, ResponseEnvelope, Result, TokenUsage,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::env;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u64 = 4096;

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl AnthropicAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env("CHATGATE_ANTHROPIC_API_KEY").or_else(|| env("ANTHROPIC_API_KEY")),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured(
                "missing CHATGATE_ANTHROPIC_API_KEY (or ANTHROPIC_API_KEY)".to_string(),
            )
        })
    }

    fn endpoint() -> String {
        env("CHATGATE_ANTHROPIC_ENDPOINT")
            .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string())
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let key = self.key()?;
        let messages = build_messages(req);
        let body = json!({
            "model": req.model_id,
            "max_tokens": MAX_TOKENS,
            "system": req.system_with_search_context(),
            "messages": messages,
        });

        let resp = self
            .client
            .post(Self::endpoint())
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("anthropic messages: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("anthropic messages HTTP {status}")));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| Error::ResponseShape(format!("anthropic messages: {e}")))?;

        let content: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        let input = parsed
            .usage
            .as_ref()
            .and_then(|u| u.input_tokens)
            .unwrap_or_else(|| estimate_tokens(&flatten_for_estimate(&messages)));
        let output = parsed
            .usage
            .as_ref()
            .and_then(|u| u.output_tokens)
            .unwrap_or_else(|| estimate_tokens(&content));

        Ok(ResponseEnvelope {
            content,
            model: req.model_id.clone(),
            provider: "anthropic".to_string(),
            tokens: TokenUsage {
                input,
                output,
                reasoning: None,
            },
            web_search_results: req.search_results.clone(),
            file_search_results: Vec::new(),
            reasoning_content: None,
        })
    }
}

/// Build the alternating message list: consecutive same-role turns are
/// merged, the list must open with a user turn, and the current user turn
/// (with spliced attachments and image blocks) closes it.
fn build_messages(req: &AdapterRequest) -> Vec<Value> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for m in &req.messages {
        let role = if m.role == "assistant" { "assistant" } else { "user" };
        match merged.last_mut() {
            Some((last_role, text)) if last_role == role => {
                text.push('\n');
                text.push_str(&m.content);
            }
            _ => merged.push((role.to_string(), m.content.clone())),
        }
    }
    if merged.first().is_some_and(|(r, _)| r == "assistant") {
        merged.insert(0, ("user".to_string(), "(continued conversation)".to_string()));
    }

    let user_text = req.user_content();
    match merged.last_mut() {
        Some((role, text)) if role == "user" => {
            text.push('\n');
            text.push_str(&user_text);
        }
        _ => merged.push(("user".to_string(), user_text)),
    }

    let mut out: Vec<Value> = Vec::with_capacity(merged.len());
    let last = merged.len() - 1;
    for (i, (role, text)) in merged.into_iter().enumerate() {
        if i == last && !req.images.is_empty() {
            let mut blocks = vec![json!({"type": "text", "text": text})];
            for img in &req.images {
                blocks.push(json!({
                    "type": "image",
                    "source": {"type": "url", "url": img}
                }));
            }
            out.push(json!({"role": role, "content": blocks}));
        } else {
            out.push(json!({"role": role, "content": text}));
        }
    }
    out
}

fn flatten_for_estimate(messages: &[Value]) -> String {
    messages
        .iter()
        .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}
