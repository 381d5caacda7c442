use provisioner_common::JobStatus;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{
    Admission, StrategyContext, access_url, admit_profile, app_dir, ensure_runtime, run_step,
    settled_server_status, upload,
};
use crate::domain::compose::{ComposeAnalysis, ComposeDocument};
use crate::domain::job::progress;
use crate::domain::shell::{env_file, quote};
use crate::domain::{ProvisionError, SourceSpec};

/// Multi-service deployment from a downloaded docker-compose file.
pub struct ComposeStrategy {
    spec: SourceSpec,
}

/// A parsed descriptor that passed admission.
pub struct ComposePlan {
    document: ComposeDocument,
    analysis: ComposeAnalysis,
}

impl ComposeStrategy {
    #[must_use]
    pub fn new(spec: SourceSpec) -> Self {
        Self { spec }
    }

    pub(super) fn validate(&self) -> Result<(), ProvisionError> {
        let url = self.spec.source_url.as_str();
        if url.starts_with("https://") || url.starts_with("http://") {
            Ok(())
        } else {
            Err(ProvisionError::Provisioner(format!(
                "docker-compose source_url must be an http(s) URL, got '{url}'"
            )))
        }
    }

    pub(super) async fn admit(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<Admission<ComposePlan>, ProvisionError> {
        let app = self.spec.app_name.as_str();

        // 1. Fetch the descriptor
        ctx.reporter
            .step(
                JobStatus::Analyzing,
                progress::ANALYZING,
                "Downloading docker-compose.yml",
            )
            .await;
        let text = ctx
            .fetcher
            .fetch_text(&self.spec.source_url)
            .await
            .map_err(|e| {
                ProvisionError::SourceDownload(format!(
                    "Failed to download docker-compose.yml from {}: {e:#}",
                    self.spec.source_url
                ))
            })?;

        // 2. Parse and analyze
        let document =
            ComposeDocument::parse(&text).map_err(|e| ProvisionError::Provisioner(e.to_string()))?;
        let analysis = document.analyze();
        info!(
            app,
            services = ?analysis.services,
            required_mb = analysis.required_memory_mb,
            required_gb = analysis.required_disk_gb,
            "compose file analyzed"
        );
        for warning in &analysis.security_warnings {
            warn!(app, %warning, "compose security warning");
        }

        // 3. Resources and ports, before anything is written to the host
        admit_profile(ctx, app, &analysis.profile()).await?;
        Ok(Admission::Granted(ComposePlan { document, analysis }))
    }

    pub(super) async fn execute(
        &self,
        ctx: &StrategyContext<'_>,
        plan: ComposePlan,
    ) -> Result<Value, ProvisionError> {
        let spec = &self.spec;
        ensure_runtime(ctx).await?;

        // 1. Bound every service
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::INSTALLING,
                "Applying resource limits to services",
            )
            .await;
        let rendered = plan
            .document
            .inject_safety_limits(spec.max_memory_mb, spec.max_cpu)
            .map_err(|e| ProvisionError::Provisioner(e.to_string()))?;

        // 2. Stage files
        let dir = app_dir(&spec.app_name);
        run_step(
            ctx,
            &format!("mkdir -p {}", quote(&dir)),
            "Creating application directory",
            ProvisionError::Provisioner,
        )
        .await?;
        upload(ctx, rendered.as_bytes(), &format!("{dir}/docker-compose.yml")).await?;
        if !spec.env_vars.is_empty() {
            upload(ctx, env_file(&spec.env_vars).as_bytes(), &format!("{dir}/.env")).await?;
        }

        // 3. Start
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::DEPLOYING,
                "Starting services with docker compose",
            )
            .await;
        run_step(
            ctx,
            &format!("cd {} && docker compose up -d", quote(&dir)),
            "docker compose up",
            ProvisionError::Provisioner,
        )
        .await?;

        // 4. Report
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::VERIFYING,
                "Collecting server status",
            )
            .await;
        let server_status = settled_server_status(ctx).await;
        let analysis = plan.analysis;
        let first_port = analysis.required_ports.iter().next().copied();
        Ok(json!({
            "status": "success",
            "app": spec.app_name,
            "source_type": spec.source_type,
            "source_url": spec.source_url,
            "url": access_url(ctx.target, spec.custom_domain.as_deref(), first_port),
            "services": analysis.services,
            "ports": analysis.required_ports,
            "location": dir,
            "resources_allocated": {
                "memory_limit_mb": spec.max_memory_mb,
                "cpu_limit": spec.max_cpu,
                "estimated_memory_mb": analysis.required_memory_mb,
            },
            "security_warnings": analysis.security_warnings,
            "server_status": server_status,
            "notes": [
                format!("Services running from {dir}/docker-compose.yml"),
                format!("Manage with: cd {dir} && docker compose ps"),
            ],
        }))
    }
}
