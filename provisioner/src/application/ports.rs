//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and the shared model crate,
//! never from `crate::infra` or `crate::api`.
//!
//! Every port is `Send + Sync` so one adapter instance can be shared by all
//! job workers through an `Arc<dyn ...>`.

use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_common::{Job, JobStatus, NamedApp};

use crate::domain::HostTarget;
use crate::domain::shell::tail_lines;

// ── Local process execution ───────────────────────────────────────────────────

/// A local program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }
}

/// Abstracts local process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds
    /// `spec.timeout`. On timeout the child is killed, not left orphaned.
    async fn run(&self, spec: &CommandSpec) -> Result<Output>;
}

// ── Remote host access ────────────────────────────────────────────────────────

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the command was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `n` lines of stdout followed by stderr, for error messages.
    #[must_use]
    pub fn tail(&self, n: usize) -> String {
        let combined = match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        };
        tail_lines(&combined, n)
    }
}

/// Opens authenticated sessions to target hosts.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Open a session, failing if the host does not accept it.
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>>;
}

/// An open session on one host.
///
/// A non-zero exit status is returned as data, not as an error; errors are
/// reserved for transport failures and timeouts.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a read-only inspection command under the short command timeout.
    async fn query(&self, command: &str) -> Result<CommandOutput>;
    /// Run a state-changing command under the long install timeout.
    async fn execute(&self, command: &str) -> Result<CommandOutput>;
    /// Write `content` to `remote_path`, replacing any existing file.
    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

// ── Sources ───────────────────────────────────────────────────────────────────

/// Downloads workload descriptors such as compose files.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Supplies the install script for each named application.
#[async_trait]
pub trait ScriptLibrary: Send + Sync {
    async fn script(&self, app: NamedApp) -> Result<String>;
}

// ── Job persistence ───────────────────────────────────────────────────────────

/// Durable key-value storage of job records.
///
/// `upsert` must refuse to overwrite a record that is already terminal and
/// must keep the stored `created_at`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert(&self, job: &Job) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;
    /// Newest first, at most `limit`, optionally filtered by status.
    async fn list(&self, limit: usize, status: Option<JobStatus>) -> Result<Vec<Job>>;
    /// Delete terminal jobs created before `cutoff`. Returns the number removed.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Receives intermediate progress from a running strategy.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Record a non-terminal step. Never fails the job.
    async fn step(&self, status: JobStatus, progress: u8, message: &str);
}
