use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("unexpected response shape: {0}")]
    ResponseShape(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("provider not supported: {0}")]
    UnsupportedProvider(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Global ceiling on attachment bytes spliced into a prompt.
pub const ATTACHMENT_BUDGET_BYTES: usize = 250_000;

/// Marker appended to an attachment that was cut at the byte budget.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Search results kept after retrieval (per request).
pub const MAX_SEARCH_RESULTS: usize = 3;

/// Results requested from the search API per raw query.
pub const MAX_RAW_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// The inbound gateway request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    pub model: ModelRef,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub images: Vec<String>,
    /// Legacy wire convention: each entry is `"File: <name>\nContent: <body>"`.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<u64>,
}

/// The uniform response shape every adapter must produce.
///
/// This is the single invariant of the dispatch layer: regardless of which
/// vendor answered (or failed), the caller sees exactly this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub tokens: TokenUsage,
    pub web_search_results: Vec<SearchResult>,
    pub file_search_results: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ResponseEnvelope {
    /// Degraded envelope for a failed dispatch. The boundary never returns a
    /// transport-level failure for model-call errors; it answers 200 with an
    /// `"Error: ..."` body, keeping any search results already gathered.
    pub fn error(
        model: impl Into<String>,
        provider: impl Into<String>,
        message: &str,
        web_search_results: Vec<SearchResult>,
    ) -> Self {
        Self {
            content: format!("Error: {message}"),
            model: model.into(),
            provider: provider.into(),
            tokens: TokenUsage::default(),
            web_search_results,
            file_search_results: Vec::new(),
            reasoning_content: None,
        }
    }
}

/// Estimate token count from text length.
///
/// Rule of thumb: 1 token ~= 4 characters. Explicitly approximate; used only
/// when a vendor response omits usage accounting.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Prefix a pre-extracted PDF collaborator uses to wrap its payload.
const PDF_EXTRACTION_PREFIX: &str = "PDF_EXTRACTION:";

/// Name prefix for attachments synthesized from fetched URLs.
pub const URL_ATTACHMENT_PREFIX: &str = "URL: ";

/// A structured attachment record.
///
/// The legacy `"File: <name>\nContent: <body>"` string convention survives
/// only at the wire boundary: parsed once here on intake, rendered once by
/// [`Attachment::prompt_block`]. Adapters never split strings themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: Option<String>,
    pub content: String,
}

impl Attachment {
    /// Parse one wire-format file entry.
    ///
    /// Tolerates malformed entries: a missing header degrades to an unnamed
    /// attachment carrying the whole string, never an error.
    pub fn parse_wire(entry: &str) -> Self {
        let (name, body) = match entry.split_once('\n') {
            Some((first, rest)) => {
                let name = first.strip_prefix("File: ").unwrap_or(first).trim();
                let body = rest.strip_prefix("Content: ").unwrap_or(rest);
                (
                    if name.is_empty() { "attachment" } else { name }.to_string(),
                    body.to_string(),
                )
            }
            None => ("attachment".to_string(), entry.to_string()),
        };
        Self::unwrap_pdf(name, body)
    }

    /// Unwrap the PDF-extraction collaborator contract: bodies shaped
    /// `PDF_EXTRACTION:{"text":..,"pages":..,"filename":..,"images":..}`
    /// are replaced by their extracted text. A body that fails to parse is
    /// kept verbatim.
    fn unwrap_pdf(name: String, body: String) -> Self {
        let Some(raw) = body.strip_prefix(PDF_EXTRACTION_PREFIX) else {
            return Self {
                name,
                mime_type: None,
                content: body,
            };
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v) => {
                let text = v
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = v
                    .get("filename")
                    .and_then(|f| f.as_str())
                    .map(str::to_string)
                    .unwrap_or(name);
                Self {
                    name,
                    mime_type: Some("application/pdf".to_string()),
                    content: text,
                }
            }
            Err(_) => Self {
                name,
                mime_type: None,
                content: body,
            },
        }
    }

    /// Synthetic attachment for a fetched URL body.
    pub fn from_url(url: &str, body: String) -> Self {
        Self {
            name: format!("{URL_ATTACHMENT_PREFIX}{url}"),
            mime_type: Some("text/html".to_string()),
            content: body,
        }
    }

    /// Whether this attachment already represents the given URL.
    pub fn is_for_url(&self, url: &str) -> bool {
        self.name
            .strip_prefix(URL_ATTACHMENT_PREFIX)
            .is_some_and(|u| u == url)
    }

    /// Render the per-file header block adapters splice into prompts.
    pub fn prompt_block(&self) -> String {
        format!("File: {}\nContent: {}", self.name, self.content)
    }

    fn byte_len(&self) -> usize {
        self.content.len()
    }
}

/// Enforce the global attachment byte budget.
///
/// Earlier attachments take priority. The attachment that crosses the
/// ceiling is truncated (at a char boundary) with [`TRUNCATION_MARKER`]
/// appended; everything after it is dropped.
pub fn clamp_attachments(attachments: Vec<Attachment>, max_bytes: usize) -> Vec<Attachment> {
    let mut spent = 0usize;
    let mut out = Vec::with_capacity(attachments.len());
    for mut a in attachments {
        let len = a.byte_len();
        if spent + len <= max_bytes {
            spent += len;
            out.push(a);
            continue;
        }
        let remaining = max_bytes.saturating_sub(spent);
        if remaining > 0 {
            let mut cut = remaining;
            while cut > 0 && !a.content.is_char_boundary(cut) {
                cut -= 1;
            }
            a.content.truncate(cut);
            a.content.push_str(TRUNCATION_MARKER);
            out.push(a);
        }
        break;
    }
    out
}

// ---------------------------------------------------------------------------
// Adapter seam
// ---------------------------------------------------------------------------

/// The normalized input every provider adapter receives.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub messages: Vec<ChatMessage>,
    pub content: String,
    pub model_id: String,
    pub system_prompt: String,
    pub images: Vec<String>,
    pub search_results: Vec<SearchResult>,
    pub attachments: Vec<Attachment>,
}

impl AdapterRequest {
    /// Concatenated per-file blocks, or `None` when nothing is attached.
    pub fn attachments_block(&self) -> Option<String> {
        self.attachments_block_for(&self.attachments)
    }

    fn attachments_block_for(&self, attachments: &[Attachment]) -> Option<String> {
        if attachments.is_empty() {
            return None;
        }
        Some(
            attachments
                .iter()
                .map(Attachment::prompt_block)
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }

    /// The user turn with attached file text spliced in.
    pub fn user_content(&self) -> String {
        self.user_content_with(&self.attachments)
    }

    /// Same as [`AdapterRequest::user_content`] but over a re-clamped
    /// attachment slice (adapters with a smaller budget pass their own).
    pub fn user_content_with(&self, attachments: &[Attachment]) -> String {
        match self.attachments_block_for(attachments) {
            Some(block) => format!("{}\n\nAttached files:\n{}", self.content, block),
            None => self.content.clone(),
        }
    }

    /// System prompt with pre-fetched web results appended, for vendors
    /// without a tool-calling channel to deliver them through.
    pub fn system_with_search_context(&self) -> String {
        if self.search_results.is_empty() {
            return self.system_prompt.clone();
        }
        let mut out = self.system_prompt.clone();
        out.push_str("\n\nWeb search results:\n");
        for (i, r) in self.search_results.iter().enumerate() {
            out.push_str(&format!("{}. {} ({})\n{}\n", i + 1, r.title, r.url, r.snippet));
        }
        out
    }
}

/// One upstream vendor (or the aggregator), normalized behind a single seam.
/// Adding a vendor means adding one implementation and one registry entry.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, req: &AdapterRequest) -> Result<ResponseEnvelope>;
}

/// External web-search capability, consumed by the augmentation stage and by
/// adapters that honor model-requested searches.
#[async_trait::async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}
