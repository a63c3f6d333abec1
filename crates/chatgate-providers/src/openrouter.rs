//! OpenRouter aggregator adapter.
//!
//! Fronts every vendor under OpenRouter's own model namespace. Internal
//! model ids go through a mapping table first; unmapped ids fall back to a
//! prefix-based best guess. Reasoning-capable and `:thinking` variants get
//! extra request parameters, and `max_tokens` comes from a four-tier model
//! lookup.

use chatgate_core::{
    estimate_tokens, AdapterRequest, Error, ProviderAdapter, ResponseEnvelope, Result, TokenUsage,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::env;
use crate::openai::is_reasoning_model;

pub struct OpenRouterAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenRouterAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env("CHATGATE_OPENROUTER_API_KEY").or_else(|| env("OPENROUTER_API_KEY")),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured(
                "missing CHATGATE_OPENROUTER_API_KEY (or OPENROUTER_API_KEY)".to_string(),
            )
        })
    }

    fn endpoint() -> String {
        env("CHATGATE_OPENROUTER_ENDPOINT")
            .unwrap_or_else(|| "https://openrouter.ai/api/v1/chat/completions".to_string())
    }
}

/// Internal model id -> OpenRouter model id.
pub fn map_model(model_id: &str) -> String {
    match model_id {
        "gpt-4o" => "openai/gpt-4o".to_string(),
        "gpt-4o-mini" => "openai/gpt-4o-mini".to_string(),
        "o1" => "openai/o1".to_string(),
        "o3-mini" => "openai/o3-mini".to_string(),
        "claude-3-5-sonnet" => "anthropic/claude-3.5-sonnet".to_string(),
        "claude-3-5-haiku" => "anthropic/claude-3.5-haiku".to_string(),
        "claude-3-opus" => "anthropic/claude-3-opus".to_string(),
        "gemini-flash" => "google/gemini-2.0-flash-001".to_string(),
        "gemini-pro" => "google/gemini-pro-1.5".to_string(),
        "grok" | "grok-2" => "x-ai/grok-2-1212".to_string(),
        "deepseek-r1" => "deepseek/deepseek-r1".to_string(),
        other if other.contains('/') => other.to_string(),
        other => best_guess(other),
    }
}

/// Prefix-based best guess for ids missing from the table.
fn best_guess(model_id: &str) -> String {
    let vendor = if model_id.starts_with("gpt") || is_reasoning_model(model_id) {
        "openai"
    } else if model_id.starts_with("claude") {
        "anthropic"
    } else if model_id.starts_with("gemini") {
        "google"
    } else if model_id.starts_with("grok") {
        "x-ai"
    } else if model_id.starts_with("llama") {
        "meta-llama"
    } else if model_id.starts_with("deepseek") {
        "deepseek"
    } else if model_id.starts_with("mistral") || model_id.starts_with("mixtral") {
        "mistralai"
    } else {
        return model_id.to_string();
    };
    format!("{vendor}/{model_id}")
}

/// `max_tokens` ceiling by model tier.
pub fn max_tokens_for(model_id: &str) -> u64 {
    let id = model_id.to_ascii_lowercase();
    // High: frontier reasoning/opus-class. Efficiency: mini/flash/haiku
    // class (checked before medium so "gpt-4o-mini" lands here). Medium:
    // mainstream chat. Everything else: default.
    if is_reasoning_model(&id) || id.contains("opus") || id.contains("deepseek-r1") {
        8192
    } else if id.contains("mini") || id.contains("flash") || id.contains("haiku") || id.contains("lite")
    {
        2048
    } else if id.contains("gpt-4") || id.contains("sonnet") || id.contains("gemini-pro") || id.contains("grok")
    {
        4096
    } else {
        1024
    }
}

fn wants_reasoning_params(model_id: &str) -> bool {
    is_reasoning_model(model_id) || model_id.contains("deepseek-r1")
}

fn is_thinking_variant(model_id: &str) -> bool {
    model_id.ends_with(":thinking") || model_id.contains("thinking")
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let key = self.key()?;
        let mapped = map_model(&req.model_id);

        let mut messages = vec![json!({
            "role": "system",
            "content": req.system_with_search_context(),
        })];
        for m in &req.messages {
            messages.push(json!({"role": m.role, "content": m.content}));
        }
        let user_text = req.user_content();
        if req.images.is_empty() {
            messages.push(json!({"role": "user", "content": user_text}));
        } else {
            let mut parts = vec![json!({"type": "text", "text": user_text})];
            for img in &req.images {
                parts.push(json!({"type": "image_url", "image_url": {"url": img}}));
            }
            messages.push(json!({"role": "user", "content": parts}));
        }

        let mut body = json!({
            "model": mapped,
            "messages": messages,
            "max_tokens": max_tokens_for(&req.model_id),
        });
        if wants_reasoning_params(&req.model_id) {
            body["reasoning"] = json!({"effort": "medium"});
        }
        if is_thinking_variant(&req.model_id) {
            body["include_reasoning"] = Value::Bool(true);
        }

        let resp = self
            .client
            .post(Self::endpoint())
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("openrouter chat.completions: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("openrouter chat.completions HTTP {status}")));
        }

        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| Error::ResponseShape(format!("openrouter chat.completions: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ResponseShape("openrouter chat.completions: no choices".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let reasoning_content = choice.message.reasoning.filter(|r| !r.is_empty());

        let input = parsed
            .usage
            .as_ref()
            .and_then(|u| u.prompt_tokens)
            .unwrap_or_else(|| estimate_tokens(&user_text));
        let output = parsed
            .usage
            .as_ref()
            .and_then(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&content));
        let reasoning_tokens = parsed
            .usage
            .as_ref()
            .and_then(|u| u.completion_tokens_details.as_ref())
            .and_then(|d| d.reasoning_tokens);

        Ok(ResponseEnvelope {
            content,
            model: req.model_id.clone(),
            provider: "openrouter".to_string(),
            tokens: TokenUsage {
                input,
                output,
                reasoning: reasoning_tokens,
            },
            web_search_results: req.search_results.clone(),
            file_search_results: Vec::new(),
            reasoning_content,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    /// Present for reasoning-capable models; distinct from `content`.
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_ids_and_guesses_by_prefix() {
        assert_eq!(map_model("gpt-4o"), "openai/gpt-4o");
        assert_eq!(map_model("claude-3-5-sonnet"), "anthropic/claude-3.5-sonnet");
        assert_eq!(map_model("grok"), "x-ai/grok-2-1212");
        // Unmapped ids: guessed by prefix.
        assert_eq!(map_model("gpt-5-preview"), "openai/gpt-5-preview");
        assert_eq!(map_model("claude-4-sonnet"), "anthropic/claude-4-sonnet");
        assert_eq!(map_model("llama-3.3-70b"), "meta-llama/llama-3.3-70b");
        // Already-namespaced ids pass through.
        assert_eq!(map_model("qwen/qwen-2.5-72b"), "qwen/qwen-2.5-72b");
        // No recognizable prefix: pass through untouched.
        assert_eq!(map_model("mystery-model"), "mystery-model");
    }

    #[test]
    fn max_tokens_tiers() {
        assert_eq!(max_tokens_for("o1"), 8192);
        assert_eq!(max_tokens_for("claude-3-opus"), 8192);
        assert_eq!(max_tokens_for("gpt-4o"), 4096);
        assert_eq!(max_tokens_for("claude-3-5-sonnet"), 4096);
        assert_eq!(max_tokens_for("gemini-flash"), 2048);
        assert_eq!(max_tokens_for("gpt-4o-mini"), 2048);
        assert_eq!(max_tokens_for("mystery-model"), 1024);
    }

    #[test]
    fn thinking_and_reasoning_variants_are_detected() {
        assert!(wants_reasoning_params("o1"));
        assert!(wants_reasoning_params("deepseek-r1"));
        assert!(!wants_reasoning_params("gpt-4o"));
        assert!(is_thinking_variant("claude-3-7-sonnet:thinking"));
        assert!(!is_thinking_variant("claude-3-5-sonnet"));
    }

    #[test]
    fn parses_reasoning_response_shape() {
        let js = r#"
        {
          "choices": [{"message": {"content": "final", "reasoning": "chain of thought"}}],
          "usage": {
            "prompt_tokens": 11,
            "completion_tokens": 7,
            "completion_tokens_details": {"reasoning_tokens": 5}
          }
        }
        "#;
        let parsed: ChatCompletionsResponse = serde_json::from_str(js).unwrap();
        assert_eq!(parsed.choices[0].message.reasoning.as_deref(), Some("chain of thought"));
        assert_eq!(
            parsed
                .usage
                .unwrap()
                .completion_tokens_details
                .unwrap()
                .reasoning_tokens,
            Some(5)
        );
    }
}
