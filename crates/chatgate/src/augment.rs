//! Per-request augmentation: uploaded files, linked URLs, web search.
//!
//! Everything here degrades instead of failing. A dead link, a slow search
//! API, or an over-budget file set can shrink the context sent upstream,
//! never the request itself.

use chatgate_core::{
    clamp_attachments, Attachment, ChatRequest, SearchResult, WebSearcher,
    ATTACHMENT_BUDGET_BYTES,
};
use chatgate_providers::decide::should_search;
use chatgate_providers::fetch::{extract_urls, fetch_url_attachments, new_urls};
use chatgate_providers::search::run_web_search;

pub struct Augmentation {
    pub attachments: Vec<Attachment>,
    pub search_results: Vec<SearchResult>,
}

pub async fn augment(
    client: &reqwest::Client,
    searcher: &dyn WebSearcher,
    req: &ChatRequest,
) -> Augmentation {
    let mut attachments: Vec<Attachment> =
        req.files.iter().map(|f| Attachment::parse_wire(f)).collect();

    let urls = extract_urls(&req.content);
    let fresh = new_urls(&urls, &attachments);
    if !fresh.is_empty() {
        // Uploaded files were appended first, so under budget pressure the
        // clamp below favors them over fetched web content.
        attachments.extend(fetch_url_attachments(client, &fresh).await);
    }
    let attachments = clamp_attachments(attachments, ATTACHMENT_BUDGET_BYTES);

    let search_results = if should_search(&req.content) {
        run_web_search(searcher, &req.content).await
    } else {
        Vec::new()
    };

    Augmentation {
        attachments,
        search_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use chatgate_core::{ChatMessage, ModelRef, Result};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubSearcher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl WebSearcher for StubSearcher {
        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SearchResult {
                title: "T".into(),
                url: "https://t.example".into(),
                snippet: "S".into(),
            }])
        }
    }

    fn chat_request(content: &str, files: Vec<String>) -> ChatRequest {
        ChatRequest {
            content: content.to_string(),
            model: ModelRef {
                id: "gpt-4o".into(),
                provider: "openai".into(),
                capabilities: Vec::new(),
            },
            messages: vec![ChatMessage {
                role: "user".into(),
                content: content.to_string(),
            }],
            images: Vec::new(),
            files,
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn two_new_urls_become_synthetic_attachments() {
        let app = Router::new()
            .route("/a", get(|| async { "alpha page" }))
            .route("/b", get(|| async { "beta page" }));
        let addr = serve(app).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let searcher = StubSearcher {
            calls: Arc::clone(&calls),
        };
        let content = format!("compare http://{addr}/a and http://{addr}/b please");
        let req = chat_request(&content, Vec::new());

        let out = augment(&reqwest::Client::new(), &searcher, &req).await;
        assert_eq!(out.attachments.len(), 2);
        assert!(out.attachments[0].is_for_url(&format!("http://{addr}/a")));
        assert_eq!(out.attachments[0].content, "alpha page");
        assert_eq!(out.attachments[1].content, "beta page");
    }

    #[tokio::test]
    async fn already_attached_urls_are_not_refetched() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let app = Router::new().route(
            "/a",
            get(move || {
                hits2.fetch_add(1, Ordering::SeqCst);
                async { "fresh body" }
            }),
        );
        let addr = serve(app).await;

        let url = format!("http://{addr}/a");
        let file = format!("File: URL: {url}\nContent: cached body");
        let req = chat_request(&format!("look at {url}"), vec![file]);

        let searcher = StubSearcher {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let out = augment(&reqwest::Client::new(), &searcher, &req).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(out.attachments.len(), 1);
        assert_eq!(out.attachments[0].content, "cached body");
    }

    #[tokio::test]
    async fn uploaded_files_outrank_web_content_under_budget_pressure() {
        let app = Router::new().route("/page", get(|| async { "web body" }));
        let addr = serve(app).await;

        // One upload already consumes the whole budget.
        let big = format!("File: big.txt\nContent: {}", "x".repeat(ATTACHMENT_BUDGET_BYTES));
        let req = chat_request(&format!("see http://{addr}/page"), vec![big]);

        let searcher = StubSearcher {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let out = augment(&reqwest::Client::new(), &searcher, &req).await;
        assert_eq!(out.attachments.len(), 1);
        assert_eq!(out.attachments[0].name, "big.txt");
    }

    #[tokio::test]
    async fn search_runs_only_when_the_heuristic_says_so() {
        let calls = Arc::new(AtomicUsize::new(0));
        let searcher = StubSearcher {
            calls: Arc::clone(&calls),
        };
        let client = reqwest::Client::new();

        let searchy = chat_request("What is the latest news about the stock market today?", Vec::new());
        let out = augment(&client, &searcher, &searchy).await;
        assert_eq!(out.search_results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let quiet = chat_request("What is the capital of France?", Vec::new());
        let out = augment(&client, &searcher, &quiet).await;
        assert!(out.search_results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
