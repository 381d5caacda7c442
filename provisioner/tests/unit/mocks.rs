//! Shared fakes for orchestrator and API tests.
//!
//! `HostScript` describes how a fake target host answers; `FakeShell`
//! serves it through the `RemoteShell` port and records every command and
//! upload so tests can assert what was (or was not) done to the host.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_common::{Job, JobStatus, NamedApp, UniversalProvisionRequest};
use vps_provisioner::application::ports::{
    CommandOutput, JobStore, RemoteSession, RemoteShell, ScriptLibrary, SourceFetcher,
};
use vps_provisioner::application::services::orchestrator::{
    Collaborators, JobOrchestrator, OrchestratorSettings,
};
use vps_provisioner::domain::resources::commands;
use vps_provisioner::domain::validation::{SourceDefaults, validate_universal_request};
use vps_provisioner::domain::{HostTarget, JobSpec};
use vps_provisioner::infra::job_store::MemoryJobStore;

// ── Output helpers ────────────────────────────────────────────────────────────

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn free_output(available_mb: u64) -> String {
    format!(
        "               total        used        free      shared  buff/cache   available\n\
         Mem:           {}        {}         100           1         100        {available_mb}\n",
        available_mb * 2,
        available_mb
    )
}

fn df_output(available_gb: u64) -> String {
    format!(
        "Filesystem     1G-blocks  Used Available Capacity Mounted on\n\
         /dev/vda1            {}G   {}G       {available_gb}G      50% /\n",
        available_gb * 2,
        available_gb
    )
}

fn ss_output(ports: &[u16]) -> String {
    let mut out = String::from("Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n");
    for port in ports {
        out.push_str(&format!("tcp   LISTEN 0      4096   0.0.0.0:{port} 0.0.0.0:*\n"));
    }
    out
}

// ── Fake host ─────────────────────────────────────────────────────────────────

/// How a fake host behaves. Responses match on a command fragment; later
/// registrations win; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct HostScript {
    responses: Vec<(String, VecDeque<CommandOutput>)>,
    refuse_connects: u32,
    panic_on: Option<String>,
}

impl HostScript {
    /// A reachable host with free memory/disk, listeners and containers.
    pub fn healthy(available_mb: u64, available_gb: u64, ports: &[u16], containers: &[&str]) -> Self {
        Self::default()
            .respond(commands::MEMORY, ok(&free_output(available_mb)))
            .respond("df -BG", ok(&df_output(available_gb)))
            .respond(commands::LISTENING_PORTS, ok(&ss_output(ports)))
            .respond(commands::RUNNING_CONTAINERS, ok(&containers.join("\n")))
    }

    pub fn respond(mut self, fragment: &str, output: CommandOutput) -> Self {
        self.responses
            .push((fragment.to_string(), VecDeque::from([output])));
        self
    }

    /// Answer successive matching commands in order; the last answer repeats.
    pub fn respond_seq(mut self, fragment: &str, outputs: Vec<CommandOutput>) -> Self {
        self.responses
            .push((fragment.to_string(), outputs.into_iter().collect()));
        self
    }

    /// Refuse the first `n` connection attempts.
    pub fn refuse_connects(mut self, n: u32) -> Self {
        self.refuse_connects = n;
        self
    }

    /// Panic while executing a command containing `fragment`.
    pub fn panic_on(mut self, fragment: &str) -> Self {
        self.panic_on = Some(fragment.to_string());
        self
    }

    pub fn build(self) -> Arc<FakeShell> {
        Arc::new(FakeShell {
            state: Arc::new(HostState {
                responses: Mutex::new(self.responses),
                refuse_connects: self.refuse_connects,
                panic_on: self.panic_on,
                connects: AtomicU32::new(0),
                log: Mutex::new(Vec::new()),
                uploads: Mutex::new(Vec::new()),
            }),
        })
    }
}

struct HostState {
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    refuse_connects: u32,
    panic_on: Option<String>,
    connects: AtomicU32,
    log: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl HostState {
    fn answer(&self, kind: &str, command: &str) -> CommandOutput {
        self.log.lock().unwrap().push(format!("{kind}: {command}"));
        let mut responses = self.responses.lock().unwrap();
        for (fragment, queue) in responses.iter_mut().rev() {
            if command.contains(fragment.as_str()) {
                return if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap_or_default()
                };
            }
        }
        ok("")
    }
}

pub struct FakeShell {
    state: Arc<HostState>,
}

impl FakeShell {
    pub fn connects(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Every command run, as `query: ...` or `execute: ...`.
    pub fn commands(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| c.strip_prefix("execute: ").map(str::to_string))
            .collect()
    }

    /// `(remote_path, content)` pairs in upload order.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn connect(&self, _target: &HostTarget) -> Result<Box<dyn RemoteSession>> {
        let attempt = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.state.refuse_connects {
            bail!("Connection refused");
        }
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<HostState>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn query(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.state.answer("query", command))
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        if let Some(fragment) = &self.state.panic_on {
            if command.contains(fragment.as_str()) {
                panic!("fake host blew up on '{command}'");
            }
        }
        Ok(self.state.answer("execute", command))
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<()> {
        self.state.uploads.lock().unwrap().push((
            remote_path.to_string(),
            String::from_utf8_lossy(content).into_owned(),
        ));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ── Sources ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StaticFetcher {
    documents: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn with(url: &str, body: &str) -> Arc<Self> {
        let mut documents = HashMap::new();
        documents.insert(url.to_string(), body.to_string());
        Arc::new(Self { documents })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found for {url}"))
    }
}

pub struct StaticScripts;

#[async_trait]
impl ScriptLibrary for StaticScripts {
    async fn script(&self, app: NamedApp) -> Result<String> {
        Ok(format!(
            "#!/bin/bash\nset -e\necho installing {app} on {{{{SERVER_IP}}}}\n"
        ))
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// `MemoryJobStore` that remembers every accepted write and can be told
/// to drop the next few terminal writes.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    writes: Mutex<Vec<(JobStatus, u8)>>,
    terminal_outages: AtomicU32,
}

impl RecordingStore {
    pub fn writes(&self) -> Vec<(JobStatus, u8)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_terminal_writes(&self, count: u32) {
        self.terminal_outages.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn upsert(&self, job: &Job) -> Result<()> {
        if job.status.is_terminal()
            && self
                .terminal_outages
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            bail!("store unavailable");
        }
        self.inner.upsert(job).await?;
        self.writes.lock().unwrap().push((job.status, job.progress));
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        self.inner.get(job_id).await
    }

    async fn list(&self, limit: usize, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.inner.list(limit, status).await
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_terminal_before(cutoff).await
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_ssh_attempts: 15,
        ssh_attempt_timeout: Duration::from_secs(10),
        settle_delay: Duration::ZERO,
    }
}

pub fn orchestrator(
    shell: Arc<FakeShell>,
    fetcher: Arc<StaticFetcher>,
) -> (JobOrchestrator, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::default());
    let deps = Collaborators {
        store: store.clone(),
        shell,
        fetcher,
        scripts: Arc::new(StaticScripts),
    };
    (JobOrchestrator::new(deps, settings()), store)
}

pub fn universal(source_type: &str, source_url: &str, app_name: &str) -> UniversalProvisionRequest {
    UniversalProvisionRequest {
        target_host: Some("203.0.113.10".into()),
        ssh_username: Some("root".into()),
        ssh_password: Some("correct-horse".into()),
        source_type: Some(source_type.into()),
        source_url: Some(source_url.into()),
        app_name: Some(app_name.into()),
        ..UniversalProvisionRequest::default()
    }
}

pub fn spec(request: &UniversalProvisionRequest) -> JobSpec {
    validate_universal_request(request, SourceDefaults::default()).expect("valid request")
}
