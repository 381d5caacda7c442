//! Typed domain error enums.
//!
//! `ProvisionError` is the one failure shape a job can end in. Each variant
//! maps onto a stable [`ErrorKind`], and through it onto the terminal job
//! status (`rejected` for admission failures, `failed` otherwise).

use std::collections::BTreeSet;

use provisioner_common::{ErrorKind, JobStatus};
use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::admission::AdmissionReport;

// ── Job failures ──────────────────────────────────────────────────────────────

/// Why a provisioning job ended unsuccessfully.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("SSH timeout after {attempts} attempts. Server not ready.")]
    SshTimeout { attempts: u32 },

    #[error("Insufficient resources on target server: {}", .report.summary())]
    InsufficientResources {
        report: AdmissionReport,
        conflicts: BTreeSet<u16>,
    },

    #[error("Ports already in use on target server: {}", join_ports(.conflicts))]
    PortConflict {
        conflicts: BTreeSet<u16>,
        report: AdmissionReport,
    },

    #[error("{0}")]
    SourceDownload(String),

    #[error("{0}")]
    Provisioner(String),

    #[error("{0}")]
    Unknown(String),
}

impl ProvisionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SshTimeout { .. } => ErrorKind::SshTimeout,
            Self::InsufficientResources { .. } => ErrorKind::InsufficientResources,
            Self::PortConflict { .. } => ErrorKind::PortConflict,
            Self::SourceDownload(_) => ErrorKind::SourceDownload,
            Self::Provisioner(_) => ErrorKind::Provisioner,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    #[must_use]
    pub fn terminal_status(&self) -> JobStatus {
        self.kind().terminal_status()
    }

    /// Structured context stored next to the message on the job record.
    #[must_use]
    pub fn detail(&self) -> Option<Value> {
        match self {
            Self::SshTimeout { attempts } => Some(json!({ "attempts": attempts })),
            Self::InsufficientResources { report, conflicts }
            | Self::PortConflict { conflicts, report } => Some(json!({
                "memory_mb": report.memory_mb,
                "disk_gb": report.disk_gb,
                "port_conflicts": conflicts,
            })),
            Self::SourceDownload(_) | Self::Provisioner(_) | Self::Unknown(_) => None,
        }
    }
}

impl From<anyhow::Error> for ProvisionError {
    /// Anything not already classified becomes `Unknown`, keeping the
    /// full context chain in the message.
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ProvisionError>() {
            Ok(classified) => classified,
            Err(other) => Self::Unknown(format!("{other:#}")),
        }
    }
}

fn join_ports(ports: &BTreeSet<u16>) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Submission errors ─────────────────────────────────────────────────────────

/// Every problem found in a submission, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid request: {}", .0.join("; "))]
pub struct ValidationErrors(pub Vec<String>);

// ── State machine errors ──────────────────────────────────────────────────────

/// A write the job state machine refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already {0}; no further updates are accepted")]
    Terminal(JobStatus),

    #[error("cannot move job from {from} back to {to}")]
    Backward { from: JobStatus, to: JobStatus },

    #[error("{0} is a terminal status; use the completion or failure write")]
    TerminalViaStep(JobStatus),
}

// ── Store errors ──────────────────────────────────────────────────────────────

/// Writes a `JobStore` refuses regardless of backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job {job_id} is already {status} and cannot be overwritten")]
    TerminalOverwrite { job_id: String, status: JobStatus },
}
