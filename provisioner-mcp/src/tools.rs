//! MCP tools for driving deployments through the provisioner API.
//!
//! Six tools, each a thin call over one HTTP route:
//!   - `deploy_app`, `deploy_universal`: submit a job
//!   - `check_status`, `wait_for_completion`: follow one job
//!   - `list_jobs`, `get_stats`: inspect the job store

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use provisioner_common::{
    AppProvisionRequest, Job, JobStatus, SubmitReceipt, UniversalProvisionRequest,
};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::ServerInfo,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::client::ProvisionerClient;

pub const DEFAULT_WAIT_SECS: u64 = 1800;
pub const DEFAULT_LIST_LIMIT: usize = 10;

// ===================================================================
// Input structs
// ===================================================================

/// Input for `deploy_app`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeployAppInput {
    /// IPv4 address of the VPS.
    pub ip_address: String,
    /// SSH username, usually `root`.
    pub username: String,
    pub password: String,
    /// One of n8n, wireguard, outline, vaultwarden, 3x-ui, seafile, filebrowser.
    pub app: String,
    pub custom_domain: Option<String>,
}

/// Input for `deploy_universal`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeployUniversalInput {
    pub ip_address: String,
    pub username: String,
    pub password: String,
    /// `docker-compose`, `docker-image` or `github-repo`.
    pub source_type: String,
    /// Compose file URL, image reference or repository URL.
    pub source_url: String,
    pub app_name: String,
    /// Host port to container port, e.g. `{"3001": "3001"}`.
    pub ports: Option<BTreeMap<String, String>>,
    pub env_vars: Option<BTreeMap<String, String>>,
    pub max_memory_mb: Option<i64>,
    pub max_cpu: Option<f64>,
    pub custom_domain: Option<String>,
    pub dockerfile_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckStatusInput {
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WaitInput {
    pub job_id: String,
    /// Seconds to wait before giving up (default 1800).
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListJobsInput {
    /// Number of jobs to return (default 10).
    pub limit: Option<usize>,
    /// Only jobs in this status, e.g. `failed`.
    pub status: Option<String>,
}

// ===================================================================
// Output structs
// ===================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DeployOutput {
    pub message: String,
    pub job_id: String,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitOutput {
    /// Whether the job reached a terminal status before the timeout.
    pub finished: bool,
    pub message: String,
    pub job: Job,
}

// ===================================================================
// ProvisionerTools
// ===================================================================

#[derive(Clone)]
pub struct ProvisionerTools {
    client: Arc<ProvisionerClient>,
    poll_interval: Duration,
    tool_router: ToolRouter<Self>,
}

impl std::fmt::Debug for ProvisionerTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerTools")
            .field("client", &self.client)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ProvisionerTools {
    pub fn new(client: Arc<ProvisionerClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl ProvisionerTools {
    #[tool(description = "Deploy a pre-configured application (n8n, wireguard, outline, \
        vaultwarden, 3x-ui, seafile, filebrowser) to a VPS. Returns a job id.")]
    async fn deploy_app(&self, params: Parameters<DeployAppInput>) -> Result<String, String> {
        let input = params.0;
        info!(app = %input.app, host = %input.ip_address, "submitting app deployment");
        let request = AppProvisionRequest {
            target_host: Some(input.ip_address.clone()),
            ssh_username: Some(input.username),
            ssh_password: Some(input.password),
            app_name: Some(input.app.clone()),
            custom_domain: input.custom_domain,
        };
        let receipt = self
            .client
            .provision_app(&request)
            .await
            .map_err(|e| format!("Deployment was not accepted: {e:#}"))?;
        to_json(&deploy_output(receipt, &input.app, &input.ip_address))
    }

    #[tool(description = "Deploy any Docker workload from a compose file URL, an image \
        reference or a git repository with a Dockerfile. Returns a job id.")]
    async fn deploy_universal(
        &self,
        params: Parameters<DeployUniversalInput>,
    ) -> Result<String, String> {
        let input = params.0;
        info!(app = %input.app_name, host = %input.ip_address, source = %input.source_type, "submitting universal deployment");
        let request = UniversalProvisionRequest {
            target_host: Some(input.ip_address.clone()),
            ssh_username: Some(input.username),
            ssh_password: Some(input.password),
            source_type: Some(input.source_type),
            source_url: Some(input.source_url),
            app_name: Some(input.app_name.clone()),
            custom_domain: input.custom_domain,
            max_memory_mb: input.max_memory_mb,
            max_cpu: input.max_cpu,
            ports: input.ports,
            env_vars: input.env_vars,
            dockerfile_path: input.dockerfile_path,
        };
        let receipt = self
            .client
            .provision_universal(&request)
            .await
            .map_err(|e| format!("Deployment was not accepted: {e:#}"))?;
        to_json(&deploy_output(receipt, &input.app_name, &input.ip_address))
    }

    #[tool(description = "Get the current status, progress and result of a deployment job.")]
    async fn check_status(&self, params: Parameters<CheckStatusInput>) -> Result<String, String> {
        let job = self
            .client
            .status(&params.0.job_id)
            .await
            .map_err(|e| format!("Failed to fetch job: {e:#}"))?;
        to_json(&job)
    }

    #[tool(description = "Poll a deployment job until it completes, fails or is rejected, \
        or until the timeout passes.")]
    async fn wait_for_completion(&self, params: Parameters<WaitInput>) -> Result<String, String> {
        let input = params.0;
        let timeout = Duration::from_secs(input.timeout_secs.unwrap_or(DEFAULT_WAIT_SECS));
        let deadline = Instant::now() + timeout;
        loop {
            let job = self
                .client
                .status(&input.job_id)
                .await
                .map_err(|e| format!("Failed to fetch job: {e:#}"))?;
            if job.is_terminal() {
                let message = format!("Job {} finished with status {}", job.job_id, job.status);
                return to_json(&WaitOutput {
                    finished: true,
                    message,
                    job,
                });
            }
            if Instant::now() + self.poll_interval > deadline {
                let message = format!(
                    "Job {} is still {} after {}s; use check_status to follow it",
                    job.job_id,
                    job.status,
                    timeout.as_secs()
                );
                return to_json(&WaitOutput {
                    finished: false,
                    message,
                    job,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    #[tool(description = "List recent deployment jobs, newest first, optionally filtered \
        by status.")]
    async fn list_jobs(&self, params: Parameters<ListJobsInput>) -> Result<String, String> {
        let input = params.0;
        let status = input
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(|e| e.to_string())?;
        let list = self
            .client
            .jobs(input.limit.unwrap_or(DEFAULT_LIST_LIMIT), status)
            .await
            .map_err(|e| format!("Failed to list jobs: {e:#}"))?;
        to_json(&list)
    }

    #[tool(description = "Get job counts by status and by application.")]
    async fn get_stats(&self) -> Result<String, String> {
        let stats = self
            .client
            .stats()
            .await
            .map_err(|e| format!("Failed to fetch stats: {e:#}"))?;
        to_json(&stats)
    }
}

#[tool_handler]
impl ServerHandler for ProvisionerTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "VPS provisioner. Use deploy_app or deploy_universal to start a job, \
                 then check_status or wait_for_completion with the returned job_id."
                    .into(),
            ),
            ..Default::default()
        }
    }
}

// -------------------------------------------------------------------
// Helpers
// -------------------------------------------------------------------

fn deploy_output(receipt: SubmitReceipt, app: &str, host: &str) -> DeployOutput {
    DeployOutput {
        message: format!(
            "Deployment of {app} to {host} started. Follow it with check_status or \
             wait_for_completion using job_id {}.",
            receipt.job_id
        ),
        job_id: receipt.job_id,
        status_url: receipt.status_url,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("Serialization error: {e}"))
}
