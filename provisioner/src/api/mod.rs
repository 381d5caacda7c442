//! HTTP front end.
//!
//! `/health` and `/status/{job_id}` are open so provisioned hosts and
//! dashboards can poll them; every other route needs the `X-API-Key`
//! header.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tracing::warn;

use crate::application::services::orchestrator::JobOrchestrator;
use crate::domain::validation::SourceDefaults;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: JobOrchestrator,
    pub api_key: Arc<str>,
    pub source_defaults: SourceDefaults,
    pub max_job_age: Duration,
}

#[must_use]
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/provision", post(handlers::provision))
        .route("/provision/universal", post(handlers::provision_universal))
        .route("/jobs", get(handlers::list_jobs))
        .route("/stats", get(handlers::stats))
        .route("/cleanup", post(handlers::cleanup))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/status/{job_id}", get(handlers::status))
        .merge(protected)
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    match provided {
        None => ApiError::Unauthorized("Missing API key").into_response(),
        Some(key) if constant_time_eq(key.as_bytes(), state.api_key.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "rejected request with invalid API key");
            ApiError::Unauthorized("Invalid API key").into_response()
        }
    }
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    Invalid(Vec<String>),
    NotFound(&'static str),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": reason,
                    "message": "Include a valid X-API-Key header in your request",
                })),
            )
                .into_response(),
            ApiError::Invalid(errors) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response()
            }
            ApiError::NotFound(what) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %format!("{e:#}"), "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}
