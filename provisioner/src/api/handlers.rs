use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use provisioner_common::{
    AppProvisionRequest, Job, JobStats, JobStatus, NamedApp, SubmitReceipt,
    UniversalProvisionRequest,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ApiError, AppState};
use crate::application::services::orchestrator::DEFAULT_LIST_LIMIT;
use crate::domain::JobSpec;
use crate::domain::validation::{validate_app_request, validate_universal_request};

type Accepted = (StatusCode, Json<SubmitReceipt>);

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "supported_apps": NamedApp::supported(),
    }))
}

pub(super) async fn provision(
    State(state): State<AppState>,
    body: Result<Json<AppProvisionRequest>, JsonRejection>,
) -> Result<Accepted, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Invalid(vec![e.body_text()]))?;
    let spec = validate_app_request(&request).map_err(|e| ApiError::Invalid(e.0))?;
    submit(&state, spec).await
}

pub(super) async fn provision_universal(
    State(state): State<AppState>,
    body: Result<Json<UniversalProvisionRequest>, JsonRejection>,
) -> Result<Accepted, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Invalid(vec![e.body_text()]))?;
    let spec = validate_universal_request(&request, state.source_defaults)
        .map_err(|e| ApiError::Invalid(e.0))?;
    submit(&state, spec).await
}

async fn submit(state: &AppState, spec: JobSpec) -> Result<Accepted, ApiError> {
    let submitted = state.orchestrator.submit(spec).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted.receipt)))
}

pub(super) async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .orchestrator
        .get(&job_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Job not found"))
}

#[derive(Debug, Deserialize)]
pub(super) struct ListParams {
    limit: Option<usize>,
    status: Option<String>,
}

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| ApiError::Invalid(vec![e.to_string()]))?;
    let jobs = state
        .orchestrator
        .list(params.limit.unwrap_or(DEFAULT_LIST_LIMIT), status)
        .await?;
    Ok(Json(json!({ "total": jobs.len(), "jobs": jobs })))
}

pub(super) async fn stats(State(state): State<AppState>) -> Result<Json<JobStats>, ApiError> {
    Ok(Json(state.orchestrator.stats().await?))
}

pub(super) async fn cleanup(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let removed = state.orchestrator.purge_older_than(state.max_job_age).await?;
    info!(removed, "manual cleanup finished");
    Ok(Json(json!({
        "message": format!("Cleaned up {removed} old jobs"),
        "removed": removed,
    })))
}
