//! Thin HTTP client for the provisioner API.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use provisioner_common::{
    AppProvisionRequest, Job, JobStats, JobStatus, SubmitReceipt, UniversalProvisionRequest,
};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Response body of `GET /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobList {
    pub total: usize,
    pub jobs: Vec<Job>,
}

pub struct ProvisionerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for ProvisionerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ProvisionerClient {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("provisioner-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn provision_app(&self, request: &AppProvisionRequest) -> Result<SubmitReceipt> {
        self.send(self.http.post(self.url("/provision")).json(request))
            .await
    }

    pub async fn provision_universal(
        &self,
        request: &UniversalProvisionRequest,
    ) -> Result<SubmitReceipt> {
        self.send(self.http.post(self.url("/provision/universal")).json(request))
            .await
    }

    pub async fn status(&self, job_id: &str) -> Result<Job> {
        let path = format!("/status/{}", utf8_percent_encode(job_id, NON_ALPHANUMERIC));
        self.send(self.http.get(self.url(&path))).await
    }

    pub async fn jobs(&self, limit: usize, status: Option<JobStatus>) -> Result<JobList> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(status) = status {
            query.push(("status", status.as_str().to_string()));
        }
        self.send(self.http.get(self.url("/jobs")).query(&query))
            .await
    }

    pub async fn stats(&self) -> Result<JobStats> {
        self.send(self.http.get(self.url("/stats"))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("cannot reach provisioner at {}", self.base_url))?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "provisioner responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {}: {}", status.as_u16(), body.trim());
        }
        response
            .json()
            .await
            .context("provisioner returned an unexpected body")
    }
}
