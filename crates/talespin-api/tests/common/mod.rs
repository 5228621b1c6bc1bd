//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use talespin_event_store::memory_event_repository::{
    InMemoryEventRepository, InMemoryProjectionRepository,
};
use talespin_llm::{BackendKind, LlmConfig, LlmPort, StructuredLlm};
use talespin_narrative::Orchestrator;
use talespin_test_support::{FixedClock, UnreachableLlm};
use tower::ServiceExt;

use talespin_api::state::AppState;

/// Build the full app router over the in-memory store, with an LLM backend
/// that never answers. Uses the same routes as `main.rs`.
pub fn build_test_app() -> Router {
    build_test_app_with_llm(Arc::new(UnreachableLlm::new()))
}

/// Build the full app router with a custom LLM backend.
pub fn build_test_app_with_llm(backend: Arc<dyn LlmPort>) -> Router {
    let llm = StructuredLlm::new(
        backend,
        Arc::new(LlmConfig::uniform(BackendKind::OpenAiCompatible)),
    );
    let orchestrator = Orchestrator::builder(
        Arc::new(InMemoryEventRepository::new()),
        Arc::new(InMemoryProjectionRepository::new()),
        llm,
    )
    .clock(Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    )))
    .build()
    .unwrap();

    talespin_api::app(AppState::new(Arc::new(orchestrator)))
}

/// A campaign with a player and a guard on the docks.
pub fn campaign_body() -> serde_json::Value {
    serde_json::json!({
        "title": "Fog over the Docks",
        "time_period": "gaslight",
        "characters": [
            {
                "name": "Ada",
                "role": "player",
                "location_id": "docks",
                "stats": { "strength": 14, "charisma": 12 },
                "credits": 5
            },
            { "name": "Guard", "role": "npc", "location_id": "docks" }
        ]
    })
}

/// Creates the standard campaign and returns `(campaign_id, player_id)`.
pub async fn create_campaign(app: Router) -> (String, String) {
    let (status, json) = post_json(app, "/api/v1/campaigns", &campaign_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    (
        json["campaign_id"].as_str().unwrap().to_owned(),
        json["player_id"].as_str().unwrap().to_owned(),
    )
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json)
}
