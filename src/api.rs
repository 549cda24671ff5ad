use std::sync::Arc;

use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::analyze::Pipeline;
use crate::model::{Guideline, MessageRecord};
use crate::report::{RunReport, RunStatus};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/analyze", post(analyze))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct AnalyzeReq {
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(default)]
    guidelines: Vec<Guideline>,
}

/// A run that could not reach the analysis service at all answers 502; every
/// other outcome (including no_data and partial) is a normal 200 report.
async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeReq>,
) -> (StatusCode, Json<RunReport>) {
    info!(
        target: "analysis",
        messages = body.messages.len(),
        guidelines = body.guidelines.len(),
        "POST /analyze"
    );
    let report = state.pipeline.run(&body.messages, &body.guidelines).await;
    let code = match report.status {
        RunStatus::Failed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    (code, Json(report))
}
