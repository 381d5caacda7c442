//! Validated job input and the pure state-machine writes on a [`Job`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use provisioner_common::{Job, JobStatus, NamedApp, SourceType};
use serde_json::Value;

use crate::domain::error::{ProvisionError, TransitionError};

/// Progress milestones written by the worker.
pub mod progress {
    pub const WAITING_SSH: u8 = 5;
    pub const ANALYZING: u8 = 20;
    pub const CHECKING_RESOURCES: u8 = 30;
    pub const INSTALLING: u8 = 40;
    pub const DEPLOYING: u8 = 60;
    pub const VERIFYING: u8 = 90;
    pub const COMPLETE: u8 = 100;
}

/// Where to connect. The password never leaves process memory and is
/// redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub host: IpAddr,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostTarget")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A validated universal-provisioning request.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub source_type: SourceType,
    pub source_url: String,
    pub app_name: String,
    pub custom_domain: Option<String>,
    pub max_memory_mb: u64,
    pub max_cpu: f64,
    /// Host port → container port.
    pub ports: BTreeMap<u16, u16>,
    pub env_vars: BTreeMap<String, String>,
    pub dockerfile_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    NamedApp {
        app: NamedApp,
        custom_domain: Option<String>,
    },
    Source(SourceSpec),
}

/// Everything a worker needs to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub target: HostTarget,
    pub kind: JobKind,
}

impl JobSpec {
    #[must_use]
    pub fn app_label(&self) -> String {
        match &self.kind {
            JobKind::NamedApp { app, .. } => app.to_string(),
            JobKind::Source(source) => source.app_name.clone(),
        }
    }

    /// The initial `started` record. Credentials are not copied.
    #[must_use]
    pub fn new_record(&self, job_id: String) -> Job {
        let mut job = Job::new(job_id, self.target.host.to_string(), self.app_label());
        job.message = Some("Provisioning started".to_string());
        if let JobKind::Source(source) = &self.kind {
            job.source_type = Some(source.source_type);
            job.source_url = Some(source.source_url.clone());
        }
        job
    }
}

/// Record a non-terminal step. Progress never goes down.
///
/// # Errors
///
/// Refuses writes to a terminal job, backward status moves, and terminal
/// statuses (those go through [`apply_success`] / [`apply_failure`]).
pub fn apply_step(
    job: &mut Job,
    status: JobStatus,
    progress: u8,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if status.is_terminal() {
        return Err(TransitionError::TerminalViaStep(status));
    }
    check_transition(job, status)?;
    job.status = status;
    job.progress = job.progress.max(progress.min(progress::COMPLETE));
    job.message = Some(message.to_string());
    job.updated_at = now;
    Ok(())
}

/// # Errors
///
/// Refuses writes to a job that is already terminal.
pub fn apply_success(job: &mut Job, result: Value, now: DateTime<Utc>) -> Result<(), TransitionError> {
    check_transition(job, JobStatus::Completed)?;
    job.status = JobStatus::Completed;
    job.progress = progress::COMPLETE;
    job.message = Some("Provisioning completed successfully".to_string());
    job.result = Some(result);
    job.updated_at = now;
    Ok(())
}

/// # Errors
///
/// Refuses writes to a job that is already terminal.
pub fn apply_failure(
    job: &mut Job,
    error: &ProvisionError,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let status = error.terminal_status();
    check_transition(job, status)?;
    job.status = status;
    job.progress = 0;
    job.message = Some(match status {
        JobStatus::Rejected => "Provisioning rejected".to_string(),
        _ => "Provisioning failed".to_string(),
    });
    job.error = Some(error.to_string());
    job.error_kind = Some(error.kind());
    job.error_detail = error.detail();
    job.updated_at = now;
    Ok(())
}

fn check_transition(job: &Job, next: JobStatus) -> Result<(), TransitionError> {
    if job.status.is_terminal() {
        return Err(TransitionError::Terminal(job.status));
    }
    if !job.status.can_transition_to(next) {
        return Err(TransitionError::Backward {
            from: job.status,
            to: next,
        });
    }
    Ok(())
}
