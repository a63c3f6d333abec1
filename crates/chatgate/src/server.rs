//! HTTP gateway surface.
//!
//! One POST endpoint does the whole lifecycle: intake, augmentation, prompt
//! synthesis, dispatch, envelope. The boundary answers HTTP 200 on every
//! path: vendor failures degrade to an `"Error: ..."` envelope and even a
//! malformed body gets an envelope rather than a 4xx/5xx. The request body
//! is taken as raw bytes (not an extractor) so intake errors stay inside
//! that contract.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chatgate_core::{AdapterRequest, ChatRequest, ResponseEnvelope, WebSearcher};
use chatgate_providers::anthropic::AnthropicAdapter;
use chatgate_providers::google::GoogleAdapter;
use chatgate_providers::krutrim::KrutrimAdapter;
use chatgate_providers::openai::OpenAiAdapter;
use chatgate_providers::openrouter::OpenRouterAdapter;
use chatgate_providers::search::{DisabledSearcher, WebSearchProvider};
use chatgate_providers::xai::XaiAdapter;
use tower_http::cors::CorsLayer;

use crate::augment::augment;
use crate::dispatch::{DispatchPolicy, ProviderRegistry};
use crate::prompt::{system_prompt_for, Metrics, PromptCache, PROMPT_CACHE_TTL};

pub struct AppState {
    pub registry: ProviderRegistry,
    pub policy: DispatchPolicy,
    pub prompt_cache: PromptCache,
    pub metrics: Metrics,
    pub client: reqwest::Client,
    pub searcher: Arc<dyn WebSearcher>,
}

/// Wire up adapters and shared state from the environment.
pub fn build_state() -> anyhow::Result<Arc<AppState>> {
    let client = chatgate_providers::default_client()?;

    let searcher: Arc<dyn WebSearcher> = match WebSearchProvider::from_env(client.clone()) {
        Ok(provider) => Arc::new(provider),
        Err(err) => {
            tracing::warn!(%err, "web search disabled");
            Arc::new(DisabledSearcher)
        }
    };

    let mut registry = ProviderRegistry::new(Arc::new(OpenRouterAdapter::from_env(client.clone())));
    registry.register(Arc::new(OpenAiAdapter::from_env(
        client.clone(),
        Arc::clone(&searcher),
    )));
    registry.register(Arc::new(AnthropicAdapter::from_env(client.clone())));
    registry.register(Arc::new(GoogleAdapter::from_env(client.clone())));
    registry.register(Arc::new(XaiAdapter::from_env(client.clone())));
    registry.register(Arc::new(KrutrimAdapter::from_env(client.clone())));

    Ok(Arc::new(AppState {
        registry,
        policy: DispatchPolicy::from_env(),
        prompt_cache: PromptCache::new(PROMPT_CACHE_TTL),
        metrics: Metrics::new(),
        client,
        searcher,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .route("/api/metrics", get(metrics))
        // Permissive CORS also answers OPTIONS preflight with no body.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Json<ResponseEnvelope> {
    let started = Instant::now();
    let count = state.metrics.record_request();

    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(err) => {
            // The only failure class that skips dispatch entirely.
            let envelope = ResponseEnvelope::error(
                "unknown",
                "unknown",
                &format!("invalid request body: {err}"),
                Vec::new(),
            );
            state
                .metrics
                .add_processing_ms(started.elapsed().as_millis() as u64);
            return Json(envelope);
        }
    };

    let augmentation = augment(&state.client, &*state.searcher, &req).await;
    let system_prompt = system_prompt_for(&state.prompt_cache, &state.metrics, count, &req.messages);

    let adapter_req = AdapterRequest {
        messages: req.messages.clone(),
        content: req.content.clone(),
        model_id: req.model.id.clone(),
        system_prompt,
        images: req.images.clone(),
        search_results: augmentation.search_results.clone(),
        attachments: augmentation.attachments,
    };

    let envelope = match state
        .registry
        .dispatch(&state.policy, &req.model.provider, &adapter_req)
        .await
    {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::error!(provider = %req.model.provider, error = %err, "dispatch failed");
            ResponseEnvelope::error(
                &req.model.id,
                &req.model.provider,
                &err.to_string(),
                augmentation.search_results,
            )
        }
    };

    state
        .metrics
        .add_processing_ms(started.elapsed().as_millis() as u64);
    Json(envelope)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<crate::prompt::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
