//! HTTP API.
//!
//! Thin axum glue over the artifact store and the orchestrator. Every
//! handler answers with JSON; failures become `{status: "error", message}`
//! with a status code chosen by the error kind.

mod handlers;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Orchestrator;
use crate::runner::ToolRunner;
use crate::storage::ArtifactStore;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ArtifactStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: Config, runner: Arc<dyn ToolRunner>) -> PipelineResult<Self> {
        let store = Arc::new(ArtifactStore::new(&config.storage.upload_dir)?);
        let orchestrator = Arc::new(Orchestrator::new(runner, store.clone(), &config));

        Ok(Self {
            config: Arc::new(config),
            store,
            orchestrator,
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/upload", post(handlers::upload))
        .route("/api/artifacts", get(handlers::list_artifacts))
        .route("/api/run_repeatmasker", post(handlers::run_repeatmasker))
        .route("/api/analyze_expression", post(handlers::analyze_expression))
        .route("/api/map_tes", post(handlers::map_tes))
        .route("/api/predict_structure", post(handlers::predict_structure))
        .route("/api/go_enrichment", post(handlers::go_enrichment))
        .route("/api/run_pipeline", post(handlers::run_pipeline))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self);
        } else {
            warn!("Rejected request ({}): {}", status, self);
        }

        let body = serde_json::json!({
            "status": "error",
            "kind": self.kind(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
