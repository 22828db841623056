//! HTTP surface: `GET /health` and `POST /research`.

use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::models::{ErrorResponse, ResearchRequest, ResearchResponse};
use crate::session::ResearchSession;
use crate::tasks::DeepResearcher;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument};

#[derive(Clone)]
pub struct AppState {
    pub researcher: Arc<DeepResearcher>,
    /// Breadth and depth for requests that omit them.
    pub defaults: ResearchConfig,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/research", post(research))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: ResearchError) -> ApiError {
    let status = match &err {
        ResearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ResearchError::Synthesis(_) => StatusCode::BAD_GATEWAY,
        ResearchError::Planning(_) | ResearchError::Extraction(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error!("Research request failed: {}", err);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

#[instrument(skip(state))]
async fn research(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>, ApiError> {
    let start_time = Instant::now();
    let breadth = req.breadth.unwrap_or(state.defaults.breadth);
    let depth = req.depth.unwrap_or(state.defaults.depth);

    let mut session = ResearchSession::new(&req.query, breadth, depth).map_err(api_error)?;
    info!("Starting research session {}", session.id);

    state.researcher.run(&mut session).await;
    let report = state
        .researcher
        .report(&mut session)
        .await
        .map_err(api_error)?;

    info!("Research completed in {:?}", start_time.elapsed());
    let outcome = session.to_outcome();
    Ok(Json(ResearchResponse {
        session_id: session.id.to_string(),
        query: session.original_query().to_string(),
        learnings: outcome.learnings,
        visited_urls: outcome.visited_urls,
        iterations: outcome.iterations,
        report,
        total_time_ms: start_time.elapsed().as_millis() as u64,
        stage_times: session.stage_times().clone(),
    }))
}
