use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::SourceType;

/// Lifecycle status of a provisioning job.
///
/// Non-terminal states only move forward (`started` → `waiting_ssh` →
/// `analyzing` → `installing`); any of them may jump straight to a
/// terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    WaitingSsh,
    Analyzing,
    Installing,
    Completed,
    Failed,
    Rejected,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Started,
        JobStatus::WaitingSsh,
        JobStatus::Analyzing,
        JobStatus::Installing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Rejected,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::WaitingSsh => "waiting_ssh",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Installing => "installing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Rejected => "rejected",
        }
    }

    /// `completed`, `failed` and `rejected` accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Rejected
        )
    }

    /// Whether a job currently in `self` may be written with status `next`.
    ///
    /// Re-writing the same non-terminal status is allowed (progress updates).
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next >= self
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Stable machine-readable failure category surfaced on a terminal job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SshTimeout,
    InsufficientResources,
    PortConflict,
    SourceDownload,
    Provisioner,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SshTimeout => "ssh_timeout",
            ErrorKind::InsufficientResources => "insufficient_resources",
            ErrorKind::PortConflict => "port_conflict",
            ErrorKind::SourceDownload => "source_download",
            ErrorKind::Provisioner => "provisioner",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Admission failures reject the job; everything else fails it.
    #[must_use]
    pub fn terminal_status(self) -> JobStatus {
        match self {
            ErrorKind::InsufficientResources | ErrorKind::PortConflict => JobStatus::Rejected,
            _ => JobStatus::Failed,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioning job record as stored and served to polling clients.
///
/// SSH credentials are never part of the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    /// 0–100, non-decreasing while the job is active.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Structured failure context, e.g. required vs available resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub target_host: String,
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh record in status `started` with zero progress.
    #[must_use]
    pub fn new(job_id: String, target_host: String, app: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Started,
            progress: 0,
            message: None,
            error: None,
            error_kind: None,
            error_detail: None,
            result: None,
            target_host,
            app,
            source_type: None,
            source_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immediate response to a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub status_url: String,
}

impl SubmitReceipt {
    #[must_use]
    pub fn started(job_id: String) -> Self {
        let status_url = format!("/status/{job_id}");
        Self {
            job_id,
            status: JobStatus::Started,
            status_url,
        }
    }
}

/// Aggregate counts over stored jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_app: BTreeMap<String, usize>,
}

impl JobStats {
    #[must_use]
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = JobStats::default();
        for job in jobs {
            stats.total += 1;
            *stats
                .by_status
                .entry(job.status.as_str().to_string())
                .or_default() += 1;
            *stats.by_app.entry(job.app.clone()).or_default() += 1;
        }
        stats
    }
}
