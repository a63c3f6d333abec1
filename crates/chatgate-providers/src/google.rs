//! Google Gemini adapter (`generateContent`).
//!
//! Keeps the key-in-query convention most Gemini samples use; a base URL
//! override exists for tests and proxies. Internal model aliases remap to
//! real API model names, and images ship as inline base64 with any
//! `data:...;base64,` prefix stripped.

use chatgate_core::{
    estimate_tokens, AdapterRequest, Error, ProviderAdapter, ResponseEnvelope, Result, TokenUsage,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::env;

pub struct GoogleAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl GoogleAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env("CHATGATE_GEMINI_API_KEY")
                .or_else(|| env("GEMINI_API_KEY"))
                .or_else(|| env("GOOGLE_API_KEY")),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured(
                "missing CHATGATE_GEMINI_API_KEY (or GEMINI_API_KEY / GOOGLE_API_KEY)".to_string(),
            )
        })
    }

    fn base_url() -> String {
        env("CHATGATE_GEMINI_BASE_URL")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string())
    }
}

/// Internal alias -> Generative Language API model name.
fn remap_model(model_id: &str) -> &str {
    match model_id {
        "gemini-flash" => "gemini-2.0-flash",
        "gemini-flash-lite" => "gemini-2.0-flash-lite",
        "gemini-pro" => "gemini-1.5-pro",
        "gemini-thinking" => "gemini-2.0-flash-thinking-exp",
        other => other,
    }
}

/// Inline image data must be bare base64; browsers hand us data URLs.
fn strip_data_prefix(image: &str) -> (&str, String) {
    if let Some(rest) = image.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(";base64,") {
            let mime = if meta.is_empty() { "image/jpeg" } else { meta };
            return (data, mime.to_string());
        }
    }
    (image, "image/jpeg".to_string())
}

#[async_trait::async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let key = self.key()?;
        let model = remap_model(&req.model_id);
        let url = format!(
            "{base}/v1beta/models/{model}:generateContent?key={key}",
            base = Self::base_url().trim_end_matches('/')
        );

        let contents = build_contents(req);
        let body = json!({
            "system_instruction": {"parts": [{"text": req.system_with_search_context()}]},
            "contents": contents,
        });

        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("google generateContent: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("google generateContent HTTP {status}")));
        }

        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| Error::ResponseShape(format!("google generateContent: {e}")))?;

        let content: String = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let meta = parsed.usage_metadata.as_ref();
        let input = meta
            .and_then(|m| m.prompt_token_count)
            .unwrap_or_else(|| estimate_tokens(&flatten_contents(&contents)));
        let output = meta
            .and_then(|m| m.candidates_token_count)
            .unwrap_or_else(|| estimate_tokens(&content));

        Ok(ResponseEnvelope {
            content,
            model: req.model_id.clone(),
            provider: "google".to_string(),
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

fn build_contents(req: &AdapterRequest) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for m in &req.messages {
        let role = if m.role == "assistant" { "model" } else { "user" };
        out.push(json!({"role": role, "parts": [{"text": m.content}]}));
    }
    let mut parts = vec![json!({"text": req.user_content()})];
    for img in &req.images {
        let (data, mime) = strip_data_prefix(img);
        parts.push(json!({"inline_data": {"mime_type": mime, "data": data}}));
    }
    out.push(json!({"role": "user", "parts": parts}));
    out
}

fn flatten_contents(contents: &[Value]) -> String {
    let mut out = String::new();
    for c in contents {
        if let Some(parts) = c.get("parts").and_then(|p| p.as_array()) {
            for p in parts {
                if let Some(t) = p.get("text").and_then(|t| t.as_str()) {
                    out.push_str(t);
                    out.push('\n');
                }
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}
