//! HTTP routing, authentication and status codes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use vps_provisioner::api::{self, AppState};
use vps_provisioner::domain::validation::SourceDefaults;

use crate::mocks::{HostScript, StaticFetcher, orchestrator};

const KEY: &str = "test-api-key";

fn app() -> Router {
    let shell = HostScript::healthy(8000, 100, &[], &[]).build();
    let (orchestrator, _) = orchestrator(shell, StaticFetcher::empty());
    api::router(AppState {
        orchestrator,
        api_key: Arc::from(KEY),
        source_defaults: SourceDefaults::default(),
        max_job_age: Duration::from_secs(24 * 3600),
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_open() {
    let (status, body) = send(&app(), get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["supported_apps"]
        .as_array()
        .unwrap()
        .contains(&json!("n8n")));
}

#[tokio::test]
async fn protected_routes_need_the_key() {
    let app = app();
    for request in [
        get("/jobs", None),
        get("/stats", Some("wrong-key")),
        post("/cleanup", None, &json!({})),
        post("/provision", Some("nope"), &json!({})),
    ] {
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("API key"));
    }
}

#[tokio::test]
async fn provision_returns_receipt_and_status_is_pollable() {
    let app = app();
    let (status, receipt) = send(
        &app,
        post(
            "/provision/universal",
            Some(KEY),
            &json!({
                "target_host": "203.0.113.10",
                "ssh_username": "root",
                "ssh_password": "correct-horse",
                "source_type": "docker-image",
                "source_url": "nginx:1.27",
                "app_name": "web",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["status"], "started");
    let job_id = receipt["job_id"].as_str().unwrap();
    assert_eq!(receipt["status_url"], format!("/status/{job_id}"));

    let (status, job) = send(&app, get(&format!("/status/{job_id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["job_id"], job_id);
    assert_eq!(job["app"], "web");
    assert!(job.get("ssh_password").is_none());
}

#[tokio::test]
async fn legacy_field_names_are_accepted() {
    let (status, _) = send(
        &app(),
        post(
            "/provision",
            Some(KEY),
            &json!({
                "ip_address": "203.0.113.10",
                "username": "root",
                "password": "correct-horse",
                "app": "vaultwarden",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn invalid_submission_lists_errors() {
    let (status, body) = send(
        &app(),
        post(
            "/provision",
            Some(KEY),
            &json!({
                "target_host": "not-an-ip",
                "ssh_username": "root",
                "ssh_password": "short",
                "app_name": "wordpress",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors = body["errors"].as_array().unwrap();
    assert!(errors.len() >= 3, "{errors:?}");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let request = Request::post("/provision")
        .header("content-type", "application/json")
        .header("X-API-Key", KEY)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"].is_array());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (status, body) = send(&app(), get("/status/does-not-exist", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found");
}

#[tokio::test]
async fn jobs_listing_validates_status_filter() {
    let app = app();
    let (status, body) = send(&app, get("/jobs?limit=5", Some(KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, _) = send(&app, get("/jobs?status=done", Some(KEY))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_and_cleanup_respond() {
    let app = app();
    let (status, stats) = send(&app, get("/stats", Some(KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 0);

    let (status, body) = send(&app, post("/cleanup", Some(KEY), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
}
