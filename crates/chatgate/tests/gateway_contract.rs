//! End-to-end gateway contracts, driven through the real router against
//! axum fixture upstreams. Endpoint-override env vars point every adapter
//! at the fixture; env is process-global, so each test holds ENV_LOCK for
//! its whole body.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chatgate::server::{build_state, router};

static ENV_LOCK: Mutex<()> = Mutex::new(());

struct EnvGuard {
    k: &'static str,
    prev: Option<String>,
}

impl EnvGuard {
    fn set(k: &'static str, v: &str) -> Self {
        let prev = std::env::var(k).ok();
        std::env::set_var(k, v);
        Self { k, prev }
    }

    fn unset(k: &'static str) -> Self {
        let prev = std::env::var(k).ok();
        std::env::remove_var(k);
        Self { k, prev }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Some(v) = self.prev.take() {
            std::env::set_var(self.k, v);
        } else {
            std::env::remove_var(self.k);
        }
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

/// Baseline env: keys present, search disabled, no forced aggregator.
fn base_env() -> Vec<EnvGuard> {
    vec![
        EnvGuard::set("CHATGATE_OPENAI_API_KEY", "test-key"),
        EnvGuard::set("CHATGATE_OPENROUTER_API_KEY", "test-key"),
        EnvGuard::unset("CHATGATE_SEARCH_API_KEY"),
        EnvGuard::unset("BRAVE_SEARCH_API_KEY"),
        EnvGuard::unset("CHATGATE_FORCE_OPENROUTER"),
        EnvGuard::unset("CHATGATE_DISABLE_FALLBACK"),
    ]
}

async fn start_gateway() -> SocketAddr {
    let state = build_state().unwrap();
    serve(router(state)).await
}

fn chat_body(provider: &str, model_id: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "content": content,
        "model": {"id": model_id, "provider": provider, "capabilities": []},
        "messages": [{"role": "user", "content": content}],
    })
}

#[tokio::test]
#[allow(clippy::await_holding_lock)]
async fn vendor_failure_still_answers_200_with_error_envelope() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _env = base_env();

    let upstream = Router::new()
        .route("/chat", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/agg", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let up = serve(upstream).await;
    let _e1 = EnvGuard::set("CHATGATE_OPENAI_ENDPOINT", &format!("http://{up}/chat"));
    let _e2 = EnvGuard::set("CHATGATE_OPENROUTER_ENDPOINT", &format!("http://{up}/agg"));

    let gw = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{gw}/api/chat"))
        .json(&chat_body("openai", "gpt-4o", "hello there friend"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let v: serde_json::Value = resp.json().await.unwrap();
    assert!(v["content"].as_str().unwrap().starts_with("Error:"));
    assert_eq!(v["provider"], "openai");
    assert!(v["webSearchResults"].as_array().unwrap().is_empty());
}

#[tokio::test]
#[allow(clippy::await_holding_lock)]
async fn forced_aggregator_runs_exactly_once_and_wins() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _env = base_env();
    let _force = EnvGuard::set("CHATGATE_FORCE_OPENROUTER", "1");

    let native_hits = Arc::new(AtomicUsize::new(0));
    let agg_hits = Arc::new(AtomicUsize::new(0));
    let nh = Arc::clone(&native_hits);
    let ah = Arc::clone(&agg_hits);

    let upstream = Router::new()
        .route(
            "/chat",
            post(move || {
                nh.fetch_add(1, Ordering::SeqCst);
                async {
                    Json(serde_json::json!({
                        "choices": [{"message": {"content": "from native"}}]
                    }))
                }
            }),
        )
        .route(
            "/agg",
            post(move || {
                ah.fetch_add(1, Ordering::SeqCst);
                async {
                    Json(serde_json::json!({
                        "choices": [{"message": {"content": "from aggregator"}}],
                        "usage": {"prompt_tokens": 6, "completion_tokens": 2}
                    }))
                }
            }),
        );
    let up = serve(upstream).await;
    let _e1 = EnvGuard::set("CHATGATE_OPENAI_ENDPOINT", &format!("http://{up}/chat"));
    let _e2 = EnvGuard::set("CHATGATE_OPENROUTER_ENDPOINT", &format!("http://{up}/agg"));

    let gw = start_gateway().await;
    let v: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{gw}/api/chat"))
        .json(&chat_body("openai", "gpt-4o", "hello there friend"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(v["content"], "from aggregator");
    assert_eq!(v["provider"], "openrouter");
    assert_eq!(v["tokens"]["input"], 6);
    assert_eq!(agg_hits.load(Ordering::SeqCst), 1);
    assert_eq!(native_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[allow(clippy::await_holding_lock)]
async fn o_series_model_uses_the_reasoning_endpoint() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _env = base_env();

    let chat_hits = Arc::new(AtomicUsize::new(0));
    let responses_hits = Arc::new(AtomicUsize::new(0));
    let ch = Arc::clone(&chat_hits);
    let rh = Arc::clone(&responses_hits);

    let upstream = Router::new()
        .route(
            "/chat",
            post(move || {
                ch.fetch_add(1, Ordering::SeqCst);
                async { Json(serde_json::json!({"choices": []})) }
            }),
        )
        .route(
            "/responses",
            post(move || {
                rh.fetch_add(1, Ordering::SeqCst);
                async {
                    Json(serde_json::json!({
                        "output": [
                            {"type": "reasoning", "summary": [{"text": "thinking hard"}]},
                            {"type": "message", "content": [{"type": "output_text", "text": "deep answer"}]}
                        ],
                        "usage": {
                            "input_tokens": 9,
                            "output_tokens": 4,
                            "output_tokens_details": {"reasoning_tokens": 2}
                        }
                    }))
                }
            }),
        );
    let up = serve(upstream).await;
    let _e1 = EnvGuard::set("CHATGATE_OPENAI_ENDPOINT", &format!("http://{up}/chat"));
    let _e2 = EnvGuard::set(
        "CHATGATE_OPENAI_RESPONSES_ENDPOINT",
        &format!("http://{up}/responses"),
    );

    let gw = start_gateway().await;
    let v: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{gw}/api/chat"))
        .json(&chat_body("openai", "o1", "hello there friend"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(v["content"], "deep answer");
    assert_eq!(v["reasoningContent"], "thinking hard");
    assert_eq!(v["tokens"]["reasoning"], 2);
    assert_eq!(responses_hits.load(Ordering::SeqCst), 1);
    assert_eq!(chat_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[allow(clippy::await_holding_lock)]
async fn malformed_body_gets_an_error_envelope_not_a_4xx() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _env = base_env();

    let gw = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{gw}/api/chat"))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{not json at all")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let v: serde_json::Value = resp.json().await.unwrap();
    assert!(v["content"]
        .as_str()
        .unwrap()
        .starts_with("Error: invalid request body"));
    assert_eq!(v["provider"], "unknown");
}

#[tokio::test]
#[allow(clippy::await_holding_lock)]
async fn linked_urls_are_fetched_and_spliced_into_the_upstream_prompt() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _env = base_env();

    let captured: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
    let cap = Arc::clone(&captured);

    let upstream = Router::new()
        .route("/page-a", get(|| async { "alpha page body" }))
        .route("/page-b", get(|| async { "beta page body" }))
        .route(
            "/chat",
            post(move |Json(body): Json<serde_json::Value>| {
                *cap.lock().unwrap() = Some(body);
                async {
                    Json(serde_json::json!({
                        "choices": [{"message": {"content": "read both pages"}}]
                    }))
                }
            }),
        );
    let up = serve(upstream).await;
    let _e1 = EnvGuard::set("CHATGATE_OPENAI_ENDPOINT", &format!("http://{up}/chat"));

    let gw = start_gateway().await;
    let content = format!("compare http://{up}/page-a and http://{up}/page-b for me");
    let v: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{gw}/api/chat"))
        .json(&chat_body("openai", "gpt-4o", &content))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(v["content"], "read both pages");
    let sent = captured.lock().unwrap().clone().unwrap();
    let sent_text = sent["messages"].to_string();
    assert!(sent_text.contains("alpha page body"));
    assert!(sent_text.contains("beta page body"));
    assert!(sent_text.contains(&format!("URL: http://{up}/page-a")));
}

#[tokio::test]
#[allow(clippy::await_holding_lock)]
async fn preflight_and_health_endpoints_answer() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _env = base_env();

    let gw = start_gateway().await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("http://{gw}/api/chat"))
        .header("Origin", "https://app.example")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert!(preflight.status().is_success());
    assert!(preflight
        .headers()
        .contains_key("access-control-allow-origin"));

    let health: serde_json::Value = client
        .get(format!("http://{gw}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let metrics: serde_json::Value = client
        .get(format!("http://{gw}/api/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(metrics["totalRequests"].is_u64());
}
