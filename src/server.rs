//! HTTP surface
//!
//! `POST /process` runs the pipeline; `/visitors` exposes the counter.
//! Failures are logged in full and answered with a generic message.

use crate::counter::CounterStore;
use crate::pipeline::{Pipeline, RenderRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Largest accepted request body
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Shared handles injected into every handler
pub struct AppState {
    pub pipeline: Pipeline,
    pub counter: Arc<dyn CounterStore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Build the router with permissive CORS and JSON body parsing
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/process", post(process_handler))
        .route("/visitors", get(visitors_handler).post(visit_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

/// POST /process - render markup and score it against the challenge reference
pub async fn process_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected /process body: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    match state.pipeline.execute(&req).await {
        Ok(cmp) => Json(ScoreResponse { score: cmp.score }).into_response(),
        Err(e) => {
            error!("Error processing request for challenge {:?}: {}", req.challenge_id, e);
            internal_error()
        }
    }
}

/// GET /visitors - current visitor count
pub async fn visitors_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let counter = state.counter.clone();
    count_response(tokio::task::spawn_blocking(move || counter.current()).await)
}

/// POST /visitors - record a visit and return the new count
pub async fn visit_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let counter = state.counter.clone();
    count_response(tokio::task::spawn_blocking(move || counter.increment()).await)
}

fn count_response(res: Result<crate::Result<u64>, tokio::task::JoinError>) -> Response {
    match res {
        Ok(Ok(count)) => Json(CountResponse { count }).into_response(),
        Ok(Err(e)) => {
            error!("Visitor counter failed: {}", e);
            internal_error()
        }
        Err(e) => {
            error!("Visitor counter task failed: {}", e);
            internal_error()
        }
    }
}

/// GET /health - basic liveness check
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
