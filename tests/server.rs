mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{researcher, ScriptedLoader, ScriptedModel, ScriptedSearch};
use deep_research::config::ResearchConfig;
use deep_research::error::LlmError;
use deep_research::models::{ErrorResponse, ResearchResponse};
use deep_research::server::{app, AppState};
use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceExt;

fn router(model: ScriptedModel, search: ScriptedSearch) -> axum::Router {
    let researcher = researcher(Arc::new(model), Arc::new(search), Arc::new(ScriptedLoader::new()));
    app(AppState {
        researcher: Arc::new(researcher),
        defaults: ResearchConfig {
            breadth: 1,
            depth: 1,
            ..ResearchConfig::default()
        },
    })
}

fn post_research(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/research")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_answers_ok() {
    let response = router(ScriptedModel::new(), ScriptedSearch::new())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn research_returns_learnings_and_report() {
    let model = ScriptedModel::new()
        .plan(&["caffeine half-life"])
        .page("https://a.example", &["Caffeine half-life is about 5 hours."], &[]);
    let search = ScriptedSearch::new().hits("caffeine half-life", &["https://a.example"]);

    let response = router(model, search)
        .oneshot(post_research(r#"{"query": "impact of caffeine on sleep"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: ResearchResponse = json_body(response).await;
    assert_eq!(body.query, "impact of caffeine on sleep");
    assert_eq!(body.iterations, 1);
    assert_eq!(body.visited_urls, vec!["https://a.example"]);
    assert_eq!(body.learnings.len(), 1);
    assert!(body.report.contains("## Sources\n\n1. https://a.example\n"));
    assert!(body.stage_times.contains_key("planning"));
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let response = router(ScriptedModel::new(), ScriptedSearch::new())
        .oneshot(post_research(r#"{"query": "   "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = json_body(response).await;
    assert!(body.error.contains("query must not be empty"), "{}", body.error);
}

#[tokio::test]
async fn zero_depth_is_a_bad_request() {
    let response = router(ScriptedModel::new(), ScriptedSearch::new())
        .oneshot(post_research(r#"{"query": "topic", "depth": 0}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn synthesis_failure_is_a_bad_gateway() {
    let model = ScriptedModel::new()
        .plan(&["q1"])
        .page("https://a.example", &["fact a"], &[])
        .synthesis(Err(LlmError::RateLimited {
            provider: "test".into(),
        }));
    let search = ScriptedSearch::new().hits("q1", &["https://a.example"]);

    let response = router(model, search)
        .oneshot(post_research(r#"{"query": "topic"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: ErrorResponse = json_body(response).await;
    assert_eq!(
        body.error,
        "report synthesis failed: rate limited by provider test"
    );
}
