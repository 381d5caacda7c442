use provisioner_common::JobStatus;
use serde_json::{Value, json};
use tracing::info;

use super::{
    Admission, StrategyContext, access_url, admit_profile, app_dir, docker_run_command,
    ensure_runtime, failure_message, run_step, settled_server_status,
};
use crate::domain::admission::ResourceProfile;
use crate::domain::job::progress;
use crate::domain::shell::quote;
use crate::domain::{ProvisionError, SourceSpec};

/// Disk assumed for the clone plus build layers.
pub const REPOSITORY_DISK_GB: u64 = 10;
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Clone a repository, build its Dockerfile, run the result.
pub struct RepositoryStrategy {
    spec: SourceSpec,
}

impl RepositoryStrategy {
    #[must_use]
    pub fn new(spec: SourceSpec) -> Self {
        Self { spec }
    }

    fn profile(&self) -> ResourceProfile {
        ResourceProfile {
            memory_mb: self.spec.max_memory_mb,
            disk_gb: REPOSITORY_DISK_GB,
            ports: self.spec.ports.keys().copied().collect(),
        }
    }

    /// `(build context dir, dockerfile name)` inside the clone.
    fn build_paths(&self) -> (String, String) {
        let root = app_dir(&self.spec.app_name);
        let relative = self
            .spec
            .dockerfile_path
            .as_deref()
            .unwrap_or(DEFAULT_DOCKERFILE)
            .trim_start_matches("./");
        match relative.rsplit_once('/') {
            Some((dir, file)) => (format!("{root}/{dir}"), file.to_string()),
            None => (root, relative.to_string()),
        }
    }

    fn image_tag(&self) -> String {
        format!("{}:latest", self.spec.app_name)
    }

    pub(super) fn validate(&self) -> Result<(), ProvisionError> {
        let url = self.spec.source_url.as_str();
        let supported = ["https://", "http://", "git@"]
            .iter()
            .any(|prefix| url.starts_with(prefix));
        if supported {
            Ok(())
        } else {
            Err(ProvisionError::Provisioner(format!(
                "Unsupported repository URL '{url}'"
            )))
        }
    }

    pub(super) async fn admit(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<Admission<()>, ProvisionError> {
        admit_profile(ctx, &self.spec.app_name, &self.profile()).await?;
        Ok(Admission::Granted(()))
    }

    pub(super) async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, ProvisionError> {
        let spec = &self.spec;
        let dir = app_dir(&spec.app_name);
        ensure_runtime(ctx).await?;

        // 1. git is needed for the clone
        if !ctx.session.query("command -v git").await?.success() {
            info!(app = %spec.app_name, "installing git on target");
            run_step(
                ctx,
                "DEBIAN_FRONTEND=noninteractive apt-get update -qq && \
                 DEBIAN_FRONTEND=noninteractive apt-get install -y -qq git",
                "Installing git",
                ProvisionError::Provisioner,
            )
            .await?;
        }

        // 2. Fresh clone
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::INSTALLING,
                "Cloning repository",
            )
            .await;
        run_step(
            ctx,
            &format!(
                "rm -rf {dir_q} && git clone --depth 1 {url} {dir_q}",
                dir_q = quote(&dir),
                url = quote(&spec.source_url)
            ),
            "git clone",
            ProvisionError::SourceDownload,
        )
        .await?;

        // 3. Locate and build
        let (context_dir, dockerfile) = self.build_paths();
        let dockerfile_path = format!("{context_dir}/{dockerfile}");
        let found = ctx
            .session
            .query(&format!("test -f {}", quote(&dockerfile_path)))
            .await?;
        if !found.success() {
            return Err(ProvisionError::Provisioner(format!(
                "Dockerfile not found at {dockerfile_path}"
            )));
        }
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::DEPLOYING,
                "Building image",
            )
            .await;
        let build = ctx
            .session
            .execute(&format!(
                "cd {} && docker build -f {} -t {} .",
                quote(&context_dir),
                quote(&dockerfile),
                quote(&self.image_tag())
            ))
            .await?;
        if !build.success() {
            return Err(ProvisionError::Provisioner(failure_message(
                "docker build",
                &build,
            )));
        }

        // 4. Run
        run_step(
            ctx,
            &docker_run_command(spec, &self.image_tag()),
            "docker run",
            ProvisionError::Provisioner,
        )
        .await?;
        ctx.reporter
            .step(
                JobStatus::Installing,
                progress::VERIFYING,
                "Collecting server status",
            )
            .await;
        let server_status = settled_server_status(ctx).await;
        let first_port = spec.ports.keys().next().copied();
        Ok(json!({
            "status": "success",
            "app": spec.app_name,
            "source_type": spec.source_type,
            "source_url": spec.source_url,
            "image": self.image_tag(),
            "location": dir,
            "dockerfile": dockerfile_path,
            "url": access_url(ctx.target, spec.custom_domain.as_deref(), first_port),
            "ports": spec.ports,
            "resources_allocated": {
                "memory_limit_mb": spec.max_memory_mb,
                "cpu_limit": spec.max_cpu,
            },
            "server_status": server_status,
            "notes": [
                format!("Source cloned to {dir}"),
                format!("Rebuild with: cd {context_dir} && docker build -t {} .", self.image_tag()),
            ],
        }))
    }
}
