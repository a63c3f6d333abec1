//! OpenAI adapters: standard chat completions and the o-series reasoning
//! endpoint.
//!
//! Both paths offer `web_search`/`file_search` function tools. When the
//! model requests a web search and no pre-fetched results exist, the search
//! runs and exactly one follow-up completion is issued with the results
//! injected as a function-role message; usage is summed across both calls.
//! Note the follow-up fires even when a proactive pre-search ran and found
//! nothing, so that case performs a second search.

use std::sync::Arc;

use chatgate_core::{
    estimate_tokens, AdapterRequest, Error, ProviderAdapter, ResponseEnvelope, Result,
    SearchResult, TokenUsage, WebSearcher,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::search::run_web_search;
use crate::env;

/// Shown when the reasoning endpoint returns no recognizable output shape.
const PLEASE_WAIT_PLACEHOLDER: &str =
    "Your response is still being prepared. Please wait a moment and try again.";

/// o-series model ids (`o1`, `o3-mini`, ...) route to the reasoning
/// endpoint instead of chat completions.
pub fn is_reasoning_model(model_id: &str) -> bool {
    let bytes = model_id.as_bytes();
    bytes.len() >= 2
        && bytes[0] == b'o'
        && bytes[1].is_ascii_digit()
        && (bytes.len() == 2 || bytes[2] == b'-')
}

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    searcher: Arc<dyn WebSearcher>,
}

impl OpenAiAdapter {
    /// Keys resolve lazily: a missing credential surfaces per call as
    /// `NotConfigured`, so dispatch can take its fallback hop instead of
    /// the gateway refusing to start.
    pub fn from_env(client: reqwest::Client, searcher: Arc<dyn WebSearcher>) -> Self {
        Self {
            client,
            api_key: env("CHATGATE_OPENAI_API_KEY").or_else(|| env("OPENAI_API_KEY")),
            searcher,
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::NotConfigured("missing CHATGATE_OPENAI_API_KEY (or OPENAI_API_KEY)".to_string())
        })
    }

    fn endpoint_chat_completions() -> String {
        env("CHATGATE_OPENAI_ENDPOINT")
            .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string())
    }

    fn endpoint_responses() -> String {
        env("CHATGATE_OPENAI_RESPONSES_ENDPOINT")
            .unwrap_or_else(|| "https://api.openai.com/v1/responses".to_string())
    }

    async fn post(&self, endpoint: String, what: &str, body: &Value) -> Result<Value> {
        let key = self.key()?;
        let resp = self
            .client
            .post(endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("openai {what}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("openai {what} HTTP {status}")));
        }
        resp.json()
            .await
            .map_err(|e| Error::ResponseShape(format!("openai {what}: {e}")))
    }

    // -----------------------------------------------------------------
    // Standard chat completions
    // -----------------------------------------------------------------

    async fn complete_chat(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let mut messages = build_messages(req);
        let first_body = json!({
            "model": req.model_id,
            "messages": messages,
            "tools": tool_definitions(),
        });
        let first_raw = self
            .post(Self::endpoint_chat_completions(), "chat.completions", &first_body)
            .await?;
        let first: ChatCompletionsResponse = parse_chat(&first_raw)?;
        let choice = first
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ResponseShape("openai chat.completions: no choices".into()))?;

        let prompt_text = flatten_messages_text(&messages);
        let mut input = usage_input(&first.usage, &prompt_text);
        let mut output = usage_output(&first.usage, choice.message.content.as_deref());

        let wants_web = tool_call(&choice, "web_search");
        let wants_files = tool_call(&choice, "file_search");

        let mut web_results = req.search_results.clone();
        let mut file_results: Vec<String> = Vec::new();

        if wants_web.is_none() && wants_files.is_none() {
            return Ok(ResponseEnvelope {
                content: choice.message.content.unwrap_or_default(),
                model: req.model_id.clone(),
                provider: "openai".to_string(),
                tokens: TokenUsage {
                    input,
                    output,
                    reasoning: None,
                },
                web_search_results: web_results,
                file_search_results: file_results,
                reasoning_content: None,
            });
        }

        if let Some(call) = wants_web {
            if web_results.is_empty() {
                let query = query_from_arguments(&call.function.arguments)
                    .unwrap_or_else(|| req.content.clone());
                web_results = run_web_search(&*self.searcher, &query).await;
            }
            messages.push(function_message("web_search", &results_payload(&web_results)));
        }
        if wants_files.is_some() {
            file_results = req.attachments.iter().map(|a| a.name.clone()).collect();
            let payload = req
                .attachments_block()
                .unwrap_or_else(|| "No files attached.".to_string());
            messages.push(function_message("file_search", &payload));
        }

        // Exactly one follow-up; no tools offered the second time.
        let followup_body = json!({"model": req.model_id, "messages": messages});
        let followup_raw = self
            .post(Self::endpoint_chat_completions(), "chat.completions", &followup_body)
            .await?;
        let followup: ChatCompletionsResponse = parse_chat(&followup_raw)?;
        let fchoice = followup
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ResponseShape("openai chat.completions: no choices".into()))?;

        input += usage_input(&followup.usage, &flatten_messages_text(&messages));
        output += usage_output(&followup.usage, fchoice.message.content.as_deref());

        Ok(ResponseEnvelope {
            content: fchoice.message.content.unwrap_or_default(),
            model: req.model_id.clone(),
            provider: "openai".to_string(),
            tokens: TokenUsage {
                input,
                output,
                reasoning: None,
            },
            web_search_results: web_results,
            file_search_results: file_results,
            reasoning_content: None,
        })
    }

    // -----------------------------------------------------------------
    // o-series reasoning endpoint
    // -----------------------------------------------------------------

    async fn complete_responses(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        let mut input_items = build_input_items(req);
        let effort = env("CHATGATE_OPENAI_REASONING_EFFORT").unwrap_or_else(|| "medium".to_string());
        let first_body = json!({
            "model": req.model_id,
            "input": input_items,
            "reasoning": {"effort": effort},
            "tools": responses_tool_definitions(),
        });
        let first = self
            .post(Self::endpoint_responses(), "responses", &first_body)
            .await?;

        let mut usage = responses_usage(&first);
        let mut web_results = req.search_results.clone();

        let final_response = match responses_function_call(&first, "web_search") {
            Some(call) => {
                if web_results.is_empty() {
                    let query = call
                        .get("arguments")
                        .and_then(|a| a.as_str())
                        .and_then(query_from_arguments)
                        .unwrap_or_else(|| req.content.clone());
                    web_results = run_web_search(&*self.searcher, &query).await;
                }
                input_items.push(call.clone());
                input_items.push(json!({
                    "type": "function_call_output",
                    "call_id": call.get("call_id").and_then(|c| c.as_str()).unwrap_or_default(),
                    "output": results_payload(&web_results),
                }));
                let followup_body = json!({
                    "model": req.model_id,
                    "input": input_items,
                    "reasoning": {"effort": effort},
                });
                let followup = self
                    .post(Self::endpoint_responses(), "responses", &followup_body)
                    .await?;
                let fu = responses_usage(&followup);
                usage.input += fu.input;
                usage.output += fu.output;
                usage.reasoning = match (usage.reasoning, fu.reasoning) {
                    (None, None) => None,
                    (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
                };
                followup
            }
            None => first,
        };

        let content = extract_output_text(&final_response)
            .unwrap_or_else(|| PLEASE_WAIT_PLACEHOLDER.to_string());
        if usage.input == 0 {
            usage.input = estimate_tokens(&flatten_messages_text(
                &input_items,
            ));
        }
        if usage.output == 0 {
            usage.output = estimate_tokens(&content);
        }

        Ok(ResponseEnvelope {
            content,
            model: req.model_id.clone(),
            provider: "openai".to_string(),
            tokens: usage,
            web_search_results: web_results,
            file_search_results: Vec::new(),
            reasoning_content: extract_reasoning_summary(&final_response),
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope> {
        if is_reasoning_model(&req.model_id) {
            self.complete_responses(req).await
        } else {
            self.complete_chat(req).await
        }
    }
}

// ---------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------

fn build_messages(req: &AdapterRequest) -> Vec<Value> {
    let mut out = vec![json!({"role": "system", "content": req.system_prompt})];
    for m in &req.messages {
        out.push(json!({"role": m.role, "content": m.content}));
    }
    let user_text = req.user_content();
    if req.images.is_empty() {
        out.push(json!({"role": "user", "content": user_text}));
    } else {
        let mut parts = vec![json!({"type": "text", "text": user_text})];
        for img in &req.images {
            parts.push(json!({"type": "image_url", "image_url": {"url": img}}));
        }
        out.push(json!({"role": "user", "content": parts}));
    }
    out
}

fn build_input_items(req: &AdapterRequest) -> Vec<Value> {
    let mut out = vec![json!({"role": "system", "content": req.system_prompt})];
    for m in &req.messages {
        out.push(json!({"role": m.role, "content": m.content}));
    }
    let user_text = req.user_content();
    if req.images.is_empty() {
        out.push(json!({"role": "user", "content": user_text}));
    } else {
        let mut parts = vec![json!({"type": "input_text", "text": user_text})];
        for img in &req.images {
            parts.push(json!({"type": "input_image", "image_url": img}));
        }
        out.push(json!({"role": "user", "content": parts}));
    }
    out
}

fn tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "web_search",
                "description": "Search the web for current information.",
                "parameters": {
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "file_search",
                "description": "Search the user's attached files.",
                "parameters": {
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }
            }
        }
    ])
}

fn responses_tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "name": "web_search",
            "description": "Search the web for current information.",
            "parameters": {
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }
        }
    ])
}

fn function_message(name: &str, content: &str) -> Value {
    json!({"role": "function", "name": name, "content": content})
}

fn results_payload(results: &[SearchResult]) -> String {
    serde_json::to_string(results).unwrap_or_else(|_| "[]".to_string())
}

fn query_from_arguments(arguments: &str) -> Option<String> {
    serde_json::from_str::<Value>(arguments)
        .ok()?
        .get("query")?
        .as_str()
        .map(str::to_string)
}

fn tool_call<'a>(choice: &'a Choice, name: &str) -> Option<&'a ToolCall> {
    choice
        .message
        .tool_calls
        .iter()
        .find(|t| t.function.name == name)
}

fn parse_chat(v: &Value) -> Result<ChatCompletionsResponse> {
    serde_json::from_value(v.clone())
        .map_err(|e| Error::ResponseShape(format!("openai chat.completions: {e}")))
}

fn flatten_messages_text(messages: &[Value]) -> String {
    let mut out = String::new();
    for m in messages {
        if let Some(s) = m.get("content").and_then(|c| c.as_str()) {
            out.push_str(s);
            out.push('\n');
        }
    }
    out
}

fn usage_input(usage: &Option<Usage>, prompt_text: &str) -> u64 {
    usage
        .as_ref()
        .and_then(|u| u.prompt_tokens)
        .unwrap_or_else(|| estimate_tokens(prompt_text))
}

fn usage_output(usage: &Option<Usage>, completion: Option<&str>) -> u64 {
    usage
        .as_ref()
        .and_then(|u| u.completion_tokens)
        .unwrap_or_else(|| estimate_tokens(completion.unwrap_or_default()))
}

/// Content extraction for the responses endpoint, most-structured shape
/// first: `output[].content[].text`, then `output_text`, then a raw string
/// body. `None` means the caller substitutes a placeholder.
fn extract_output_text(v: &Value) -> Option<String> {
    if let Some(items) = v.get("output").and_then(|o| o.as_array()) {
        let mut out = String::new();
        for item in items {
            if item.get("type").and_then(|t| t.as_str()) != Some("message") {
                continue;
            }
            let Some(parts) = item.get("content").and_then(|c| c.as_array()) else {
                continue;
            };
            for p in parts {
                if let Some(t) = p.get("text").and_then(|t| t.as_str()) {
                    out.push_str(t);
                }
            }
        }
        if !out.is_empty() {
            return Some(out);
        }
    }
    if let Some(t) = v.get("output_text").and_then(|t| t.as_str()) {
        if !t.is_empty() {
            return Some(t.to_string());
        }
    }
    v.as_str().map(str::to_string)
}

fn extract_reasoning_summary(v: &Value) -> Option<String> {
    let items = v.get("output")?.as_array()?;
    let mut out = String::new();
    for item in items {
        if item.get("type").and_then(|t| t.as_str()) != Some("reasoning") {
            continue;
        }
        if let Some(parts) = item.get("summary").and_then(|s| s.as_array()) {
            for p in parts {
                if let Some(t) = p.get("text").and_then(|t| t.as_str()) {
                    out.push_str(t);
                }
            }
        }
    }
    (!out.is_empty()).then_some(out)
}

fn responses_function_call<'a>(v: &'a Value, name: &str) -> Option<&'a Value> {
    v.get("output")?.as_array()?.iter().find(|item| {
        item.get("type").and_then(|t| t.as_str()) == Some("function_call")
            && item.get("name").and_then(|n| n.as_str()) == Some(name)
    })
}

fn responses_usage(v: &Value) -> TokenUsage {
    let usage = v.get("usage");
    TokenUsage {
        input: usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0),
        output: usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0),
        reasoning: usage
            .and_then(|u| u.get("output_tokens_details"))
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|t| t.as_u64()),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
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
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}
