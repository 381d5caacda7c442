//! A stand-in provisioner API on a loopback port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use provisioner_common::{Job, JobStats, JobStatus, SubmitReceipt};
use serde_json::{Value, json};

use crate::client::ProvisionerClient;

pub const API_KEY: &str = "stub-api-key";

/// Job id whose status advances one step per poll until it completes.
pub const ADVANCING_JOB: &str = "job-advancing";
/// Job id that never leaves `installing`.
pub const STUCK_JOB: &str = "job-stuck";
pub const MISSING_JOB: &str = "job-missing";

#[derive(Default)]
struct Shared {
    polls: AtomicU32,
    queries: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

pub struct StubProvisioner {
    pub base_url: String,
    shared: Arc<Shared>,
}

impl StubProvisioner {
    pub async fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .route("/provision", post(provision))
            .route("/provision/universal", post(provision))
            .route("/status/{job_id}", get(status))
            .route("/jobs", get(jobs))
            .route("/stats", get(stats))
            .with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Self {
            base_url: format!("http://{addr}"),
            shared,
        }
    }

    pub fn client(&self) -> Arc<ProvisionerClient> {
        Arc::new(ProvisionerClient::new(&self.base_url, API_KEY, Duration::from_secs(5)).unwrap())
    }

    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.shared.bodies.lock().unwrap().clone()
    }

    pub fn polls(&self) -> u32 {
        self.shared.polls.load(Ordering::SeqCst)
    }
}

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    if headers.get("X-API-Key").and_then(|v| v.to_str().ok()) == Some(API_KEY) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid API key"})),
        )
            .into_response())
    }
}

fn job(job_id: &str, status: JobStatus, progress: u8) -> Job {
    let mut job = Job::new(job_id.into(), "203.0.113.10".into(), "web".into());
    job.status = status;
    job.progress = progress;
    job
}

async fn provision(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    shared.bodies.lock().unwrap().push(body.clone());
    if body.get("target_host").is_none_or(Value::is_null) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"errors": ["target_host is required"]})),
        )
            .into_response();
    }
    (
        StatusCode::ACCEPTED,
        Json(SubmitReceipt::started(ADVANCING_JOB.into())),
    )
        .into_response()
}

async fn status(State(shared): State<Arc<Shared>>, Path(job_id): Path<String>) -> Response {
    match job_id.as_str() {
        MISSING_JOB => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Job not found"})),
        )
            .into_response(),
        ADVANCING_JOB => {
            let poll = shared.polls.fetch_add(1, Ordering::SeqCst);
            let current = match poll {
                0 => job(&job_id, JobStatus::WaitingSsh, 5),
                1 => job(&job_id, JobStatus::Installing, 60),
                _ => {
                    let mut done = job(&job_id, JobStatus::Completed, 100);
                    done.result = Some(json!({"status": "success", "url": "http://203.0.113.10"}));
                    done
                }
            };
            Json(current).into_response()
        }
        STUCK_JOB => {
            shared.polls.fetch_add(1, Ordering::SeqCst);
            Json(job(&job_id, JobStatus::Installing, 60)).into_response()
        }
        other => Json(job(other, JobStatus::Started, 0)).into_response(),
    }
}

async fn jobs(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    shared
        .queries
        .lock()
        .unwrap()
        .push(query.unwrap_or_default());
    let jobs = vec![job("job-1", JobStatus::Failed, 10)];
    Json(json!({"total": jobs.len(), "jobs": jobs})).into_response()
}

async fn stats(headers: HeaderMap) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let jobs = [
        job("job-1", JobStatus::Completed, 100),
        job("job-2", JobStatus::Failed, 40),
    ];
    Json(JobStats::from_jobs(&jobs)).into_response()
}
