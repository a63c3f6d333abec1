//! xAI (Grok) adapter.
//!
//! OpenAI-compatible request shape, but the error path is not: the API can
//! answer non-2xx with a non-JSON body, or with a `{code, msg}` pair whose
//! text is not necessarily English. The body is therefore read as text
//! first and JSON-parsed second, on both the error and success paths.

use chatgate_core::{
    estimate_tokens, AdapterRequest, Error, ProviderAdapter, ResponseEnvelope, Result, TokenUsage,
};
use serde::Deserialize;
use serde_json::json;

use crate::env;

const CANONICAL_MODEL: &str = "grok-2-latest";

pub struct XaiAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl XaiAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env("CHATGATE_XAI_API_KEY").or_else(|| env("XAI_API_KEY")),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured("missing CHATGATE_XAI_API_KEY (or XAI_API_KEY)".to_string())
        })
    }

    fn endpoint() -> String {
        env("CHATGATE_XAI_ENDPOINT")
            .unwrap_or_else(|| "https://api.x.ai/v1/chat/completions".to_string())
    }
}

/// Internal alias -> vendor model name, defaulting to the canonical model.
fn remap_model(model_id: &str) -> &str {
    match model_id {
        "grok" | "grok-2" => CANONICAL_MODEL,
        "grok-vision" => "grok-2-vision-latest",
        "grok-mini" => "grok-3-mini",
        other if other.starts_with("grok-") => other,
        _ => CANONICAL_MODEL,
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for XaiAdapter {
    fn name(&self) -> &'static str {
        "xai"
    }

    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let key = self.key()?;
        let mut messages = vec![json!({
            "role": "system",
            "content": req.system_with_search_context(),
        })];
        for m in &req.messages {
            messages.push(json!({"role": m.role, "content": m.content}));
        }
        let user_text = req.user_content();
        messages.push(json!({"role": "user", "content": user_text}));

        let body = json!({
            "model": remap_model(&req.model_id),
            "messages": messages,
        });

        let resp = self
            .client
            .post(Self::endpoint())
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("xai chat.completions: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Upstream(format!("xai chat.completions: {e}")))?;

        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "xai chat.completions HTTP {status}: {}",
                error_detail(&text)
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&text)
            .map_err(|e| Error::ResponseShape(format!("xai chat.completions: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ResponseShape("xai chat.completions: no choices".into()))?;
        let content = choice.message.content.unwrap_or_default();

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
            provider: "xai".to_string(),
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

/// Pull the `{code, msg}` pair out of an error body when it is JSON;
/// otherwise hand back the raw (trimmed) text.
fn error_detail(body: &str) -> String {
    if let Ok(e) = serde_json::from_str::<ApiError>(body) {
        match (e.code, e.msg) {
            (Some(code), Some(msg)) => return format!("{code}: {msg}"),
            (None, Some(msg)) => return msg,
            (Some(code), None) => return code,
            (None, None) => {}
        }
    }
    let trimmed = body.trim();
    let mut cut = trimmed.len().min(200);
    while cut > 0 && !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    msg: Option<String>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_default_to_canonical_model() {
        assert_eq!(remap_model("grok"), "grok-2-latest");
        assert_eq!(remap_model("grok-vision"), "grok-2-vision-latest");
        assert_eq!(remap_model("grok-3-fast"), "grok-3-fast");
        assert_eq!(remap_model("something-else"), "grok-2-latest");
    }

    #[test]
    fn parses_minimal_completions_shape() {
        let js = r#"
        {
          "choices": [{"message": {"content": "hello"}}],
          "usage": {"prompt_tokens": 4, "completion_tokens": 1}
        }
        "#;
        let parsed: ChatCompletionsResponse = serde_json::from_str(js).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
    }

    #[test]
    fn error_detail_handles_localized_code_msg_pairs() {
        let detail = error_detail(r#"{"code":"RESOURCE_EXHAUSTED","msg":"触发限流"}"#);
        assert_eq!(detail, "RESOURCE_EXHAUSTED: 触发限流");
    }

    #[test]
    fn error_detail_passes_non_json_bodies_through() {
        assert_eq!(error_detail("<html>502 Bad Gateway</html>"), "<html>502 Bad Gateway</html>");
    }
}
