use std::sync::LazyLock;

use provisioner_common::JobStatus;
use regex::Regex;
use serde_json::{Value, json};
use tracing::info;

use super::{
    Admission, StrategyContext, access_url, admit_profile, docker_run_command, ensure_runtime,
    run_step, settled_server_status,
};
use crate::application::services::snapshot::SnapshotReader;
use crate::domain::admission::ResourceProfile;
use crate::domain::job::progress;
use crate::domain::{ProvisionError, SourceSpec};

/// Disk assumed for pulling and running a single image.
pub const IMAGE_DISK_GB: u64 = 5;

#[allow(clippy::expect_used)]
static IMAGE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._/:@-]*$").expect("valid regex"));

/// Single container from a registry image.
pub struct ImageStrategy {
    spec: SourceSpec,
}

impl ImageStrategy {
    #[must_use]
    pub fn new(spec: SourceSpec) -> Self {
        Self { spec }
    }

    fn profile(&self) -> ResourceProfile {
        ResourceProfile {
            memory_mb: self.spec.max_memory_mb,
            disk_gb: IMAGE_DISK_GB,
            ports: self.spec.ports.keys().copied().collect(),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ProvisionError> {
        if IMAGE_REF_RE.is_match(&self.spec.source_url) {
            Ok(())
        } else {
            Err(ProvisionError::Provisioner(format!(
                "Invalid image reference '{}'",
                self.spec.source_url
            )))
        }
    }

    /// A container already running under the app name short-circuits with
    /// success and skips admission entirely.
    pub(super) async fn admit(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<Admission<()>, ProvisionError> {
        let spec = &self.spec;
        ctx.reporter
            .step(
                JobStatus::Analyzing,
                progress::ANALYZING,
                "Checking for an existing container",
            )
            .await;
        let running = SnapshotReader::new(ctx.session).running_workloads().await?;
        if running.iter().any(|name| *name == spec.app_name) {
            info!(app = %spec.app_name, "container already running, nothing to do");
            return Ok(Admission::AlreadySatisfied(json!({
                "status": "success",
                "already_running": true,
                "app": spec.app_name,
                "source_type": spec.source_type,
                "source_url": spec.source_url,
                "url": access_url(ctx.target, spec.custom_domain.as_deref(), first_port(spec)),
                "notes": [format!("Container '{}' is already running", spec.app_name)],
            })));
        }
        admit_profile(ctx, &spec.app_name, &self.profile()).await?;
        Ok(Admission::Granted(()))
    }

    pub(super) async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, ProvisionError> {
        let spec = &self.spec;
        ensure_runtime(ctx).await?;

        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::DEPLOYING,
                &format!("Pulling and starting {}", spec.source_url),
            )
            .await;
        let output = run_step(
            ctx,
            &docker_run_command(spec, &spec.source_url),
            "docker run",
            ProvisionError::Provisioner,
        )
        .await?;
        let container_id: String = output.stdout.trim().chars().take(12).collect();

        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::VERIFYING,
                "Collecting server status",
            )
            .await;
        let server_status = settled_server_status(ctx).await;
        Ok(json!({
            "status": "success",
            "app": spec.app_name,
            "source_type": spec.source_type,
            "source_url": spec.source_url,
            "container_id": container_id,
            "url": access_url(ctx.target, spec.custom_domain.as_deref(), first_port(spec)),
            "ports": spec.ports,
            "resources_allocated": {
                "memory_limit_mb": spec.max_memory_mb,
                "cpu_limit": spec.max_cpu,
            },
            "server_status": server_status,
            "notes": [
                format!("Container '{}' restarts at most 3 times on failure", spec.app_name),
                format!("Logs: docker logs {}", spec.app_name),
            ],
        }))
    }
}

fn first_port(spec: &SourceSpec) -> Option<u16> {
    spec.ports.keys().next().copied()
}
