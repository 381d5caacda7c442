//! Source strategies for universal provisioning.
//!
//! Each strategy validates its input, admits the workload against a live
//! snapshot of the host, and only then runs remote mutations. Every
//! strategy runs both the resource check and the port check before its
//! `execute` step.

mod compose;
mod image;
mod repository;

use std::net::IpAddr;
use std::time::Duration;

use provisioner_common::{JobStatus, SourceType};
use serde_json::Value;
use tracing::{info, warn};

use crate::application::ports::{
    CommandOutput, ProgressReporter, RemoteSession, SourceFetcher,
};
use crate::application::services::snapshot::SnapshotReader;
use crate::domain::admission::{self, AdmissionReport, ResourceProfile};
use crate::domain::compose::BOUNDED_RESTART;
use crate::domain::job::progress;
use crate::domain::shell::quote;
use crate::domain::{HostTarget, ProvisionError, SourceSpec};

pub use compose::ComposeStrategy;
pub use image::ImageStrategy;
pub use repository::RepositoryStrategy;

/// Lines of command output kept in failure messages.
pub const ERROR_TAIL_LINES: usize = 20;

/// What a strategy needs from its surroundings for one job.
pub struct StrategyContext<'a> {
    pub session: &'a dyn RemoteSession,
    pub fetcher: &'a dyn SourceFetcher,
    pub reporter: &'a dyn ProgressReporter,
    pub target: &'a HostTarget,
    /// Pause between starting a workload and reading server status.
    pub settle_delay: Duration,
}

/// Result of a strategy's admission step.
pub enum Admission<P> {
    /// Proceed to `execute` with the prepared plan.
    Granted(P),
    /// Nothing to do; finish with this result.
    AlreadySatisfied(Value),
}

/// Closed set of universal source strategies.
pub enum SourceStrategy {
    Compose(ComposeStrategy),
    Image(ImageStrategy),
    Repository(RepositoryStrategy),
}

impl SourceStrategy {
    #[must_use]
    pub fn resolve(spec: SourceSpec) -> Self {
        match spec.source_type {
            SourceType::DockerCompose => Self::Compose(ComposeStrategy::new(spec)),
            SourceType::DockerImage => Self::Image(ImageStrategy::new(spec)),
            SourceType::GithubRepo => Self::Repository(RepositoryStrategy::new(spec)),
        }
    }

    #[must_use]
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Compose(_) => SourceType::DockerCompose,
            Self::Image(_) => SourceType::DockerImage,
            Self::Repository(_) => SourceType::GithubRepo,
        }
    }

    /// Validate, admit, then execute.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of whichever step failed.
    pub async fn run(&self, ctx: &StrategyContext<'_>) -> Result<Value, ProvisionError> {
        match self {
            Self::Compose(strategy) => {
                strategy.validate()?;
                match strategy.admit(ctx).await? {
                    Admission::Granted(plan) => strategy.execute(ctx, plan).await,
                    Admission::AlreadySatisfied(result) => Ok(result),
                }
            }
            Self::Image(strategy) => {
                strategy.validate()?;
                match strategy.admit(ctx).await? {
                    Admission::Granted(()) => strategy.execute(ctx).await,
                    Admission::AlreadySatisfied(result) => Ok(result),
                }
            }
            Self::Repository(strategy) => {
                strategy.validate()?;
                match strategy.admit(ctx).await? {
                    Admission::Granted(()) => strategy.execute(ctx).await,
                    Admission::AlreadySatisfied(result) => Ok(result),
                }
            }
        }
    }
}

// ── Shared steps ──────────────────────────────────────────────────────────────

/// Snapshot the host and run both admission checks.
pub(crate) async fn admit_profile(
    ctx: &StrategyContext<'_>,
    app: &str,
    profile: &ResourceProfile,
) -> Result<AdmissionReport, ProvisionError> {
    ctx.reporter
        .step(
            JobStatus::Analyzing,
            progress::CHECKING_RESOURCES,
            "Checking server resources",
        )
        .await;
    let snapshot = SnapshotReader::new(ctx.session).read().await?;
    match admission::enforce(profile, &snapshot) {
        Ok(report) => {
            info!(
                app,
                memory = %report.memory_mb.verdict,
                disk = %report.disk_gb.verdict,
                required_mb = profile.memory_mb,
                available_mb = snapshot.memory.available_mb,
                "admission granted"
            );
            Ok(report)
        }
        Err(err) => {
            warn!(app, error = %err, "admission refused");
            Err(err)
        }
    }
}

/// Remote mutations below assume a container runtime.
pub(crate) async fn ensure_runtime(ctx: &StrategyContext<'_>) -> Result<(), ProvisionError> {
    if SnapshotReader::new(ctx.session).runtime_installed().await? {
        Ok(())
    } else {
        Err(ProvisionError::Provisioner(
            "Docker is not installed on the target server".to_string(),
        ))
    }
}

/// Run a mutation and classify a non-zero exit with `classify`.
pub(crate) async fn run_step(
    ctx: &StrategyContext<'_>,
    command: &str,
    what: &str,
    classify: fn(String) -> ProvisionError,
) -> Result<CommandOutput, ProvisionError> {
    let output = ctx.session.execute(command).await?;
    if output.success() {
        return Ok(output);
    }
    Err(classify(failure_message(what, &output)))
}

pub(crate) fn failure_message(what: &str, output: &CommandOutput) -> String {
    let code = output
        .exit_code
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    format!(
        "{what} failed (exit code {code}):\n{}",
        output.tail(ERROR_TAIL_LINES)
    )
}

pub(crate) async fn upload(
    ctx: &StrategyContext<'_>,
    content: &[u8],
    remote_path: &str,
) -> Result<(), ProvisionError> {
    ctx.session
        .upload(content, remote_path)
        .await
        .map_err(|e| ProvisionError::Provisioner(format!("Failed to upload {remote_path}: {e:#}")))
}

/// Wait for the workload to settle, then read memory/disk usage.
pub(crate) async fn settled_server_status(ctx: &StrategyContext<'_>) -> Value {
    if !ctx.settle_delay.is_zero() {
        tokio::time::sleep(ctx.settle_delay).await;
    }
    SnapshotReader::new(ctx.session).server_status().await
}

/// `docker run` for a single bounded container.
pub(crate) fn docker_run_command(spec: &SourceSpec, image: &str) -> String {
    let mut command = format!(
        "docker run -d --name {} --memory={}m --cpus={} --restart={BOUNDED_RESTART}",
        quote(&spec.app_name),
        spec.max_memory_mb,
        spec.max_cpu
    );
    for (host, container) in &spec.ports {
        command.push_str(&format!(" -p {host}:{container}"));
    }
    for (key, value) in &spec.env_vars {
        command.push_str(&format!(" -e {}", quote(&format!("{key}={value}"))));
    }
    command.push(' ');
    command.push_str(&quote(image));
    command
}

pub(crate) fn app_dir(app_name: &str) -> String {
    format!("/opt/{app_name}")
}

/// `https://domain` when a domain is set, else `http://ip[:port]`.
#[must_use]
pub fn access_url(target: &HostTarget, custom_domain: Option<&str>, port: Option<u16>) -> String {
    let host = match target.host {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("[{ip}]"),
    };
    match (custom_domain, port) {
        (Some(domain), _) => format!("https://{domain}"),
        (None, Some(port)) => format!("http://{host}:{port}"),
        (None, None) => format!("http://{host}"),
    }
}
