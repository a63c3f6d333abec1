//! Krutrim adapter.
//!
//! One hardcoded upstream model behind an OpenAI-compatible endpoint.
//! Krutrim's smaller context gets its own attachment budget (50 KB,
//! re-clamped independently of the global cap) and a 30 s request timeout.

use std::time::Duration;

use chatgate_core::{
    clamp_attachments, estimate_tokens, AdapterRequest, Error, ProviderAdapter, ResponseEnvelope,
    Result, TokenUsage,
};
use serde::Deserialize;
use serde_json::json;

use crate::env;

const UPSTREAM_MODEL: &str = "Krutrim-spectre-v2";
const ATTACHMENT_BUDGET_BYTES: usize = 50_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KrutrimAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl KrutrimAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env("CHATGATE_KRUTRIM_API_KEY").or_else(|| env("KRUTRIM_API_KEY")),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured("missing CHATGATE_KRUTRIM_API_KEY (or KRUTRIM_API_KEY)".to_string())
        })
    }

    fn endpoint() -> String {
        env("CHATGATE_KRUTRIM_ENDPOINT")
            .unwrap_or_else(|| "https://cloud.olakrutrim.com/v1/chat/completions".to_string())
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for KrutrimAdapter {
    fn name(&self) -> &'static str {
        "krutrim"
    }

    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let key = self.key()?;

        let attachments = clamp_attachments(req.attachments.clone(), ATTACHMENT_BUDGET_BYTES);
        let user_text = req.user_content_with(&attachments);

        let mut messages = vec![json!({
            "role": "system",
            "content": req.system_with_search_context(),
        })];
        for m in &req.messages {
            messages.push(json!({"role": m.role, "content": m.content}));
        }
        messages.push(json!({"role": "user", "content": user_text}));

        let body = json!({"model": UPSTREAM_MODEL, "messages": messages});

        let resp = self
            .client
            .post(Self::endpoint())
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("krutrim chat.completions: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("krutrim chat.completions HTTP {status}")));
        }

        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| Error::ResponseShape(format!("krutrim chat.completions: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

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

        Ok(ResponseEnvelope {
            content,
            model: req.model_id.clone(),
            provider: "krutrim".to_string(),
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
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}
