//! Shared fakes for service tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use provisioner_common::JobStatus;

use crate::application::ports::{CommandOutput, ProgressReporter, RemoteSession, RemoteShell};
use crate::domain::HostTarget;
use crate::domain::resources::commands;

pub fn target() -> HostTarget {
    HostTarget {
        host: "203.0.113.10".parse().unwrap_or(std::net::IpAddr::from([127, 0, 0, 1])),
        username: "root".into(),
        password: "correct-horse".into(),
    }
}

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

pub fn free_output(available_mb: u64) -> String {
    format!(
        "               total        used        free      shared  buff/cache   available\n\
         Mem:           {}        {}         100           1         100        {available_mb}\n",
        available_mb * 2,
        available_mb
    )
}

pub fn df_output(available_gb: u64) -> String {
    format!(
        "Filesystem     1G-blocks  Used Available Capacity Mounted on\n\
         /dev/vda1            {}G   {}G       {available_gb}G      50% /\n",
        available_gb * 2,
        available_gb
    )
}

pub fn ss_output(ports: &[u16]) -> String {
    let mut out = String::from("Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n");
    for port in ports {
        out.push_str(&format!("tcp   LISTEN 0      4096   0.0.0.0:{port} 0.0.0.0:*\n"));
    }
    out
}

/// Session that answers commands containing a registered fragment, and
/// succeeds with empty output otherwise.
#[derive(Default)]
pub struct ScriptedSession {
    responses: Vec<(String, CommandOutput)>,
    log: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl ScriptedSession {
    /// A healthy host with the given free memory/disk, listeners and containers.
    pub fn host(available_mb: u64, available_gb: u64, ports: &[u16], containers: &[&str]) -> Self {
        Self::default()
            .respond(commands::MEMORY, ok(&free_output(available_mb)))
            .respond("df -BG", ok(&df_output(available_gb)))
            .respond(commands::LISTENING_PORTS, ok(&ss_output(ports)))
            .respond(commands::RUNNING_CONTAINERS, ok(&containers.join("\n")))
            .respond(commands::CPU_CORES, ok("2\n"))
    }

    #[must_use]
    pub fn respond(mut self, fragment: &str, output: CommandOutput) -> Self {
        // Later registrations win.
        self.responses.insert(0, (fragment.to_string(), output));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }

    fn answer(&self, kind: &str, command: &str) -> CommandOutput {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("{kind}: {command}"));
        }
        self.responses
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
            .map_or_else(|| ok(""), |(_, output)| output.clone())
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn query(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.answer("query", command))
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.answer("execute", command))
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<()> {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((
                remote_path.to_string(),
                String::from_utf8_lossy(content).into_owned(),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shell that refuses the first `failures` connections.
pub struct FlakyShell {
    failures: u32,
    hang: bool,
    attempts: AtomicU32,
}

impl FlakyShell {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            hang: false,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            failures: u32::MAX,
            hang: true,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteShell for FlakyShell {
    async fn connect(&self, _target: &HostTarget) -> Result<Box<dyn RemoteSession>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            std::future::pending::<()>().await;
        }
        if attempt <= self.failures {
            bail!("connection refused");
        }
        Ok(Box::new(ScriptedSession::default()))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    steps: Mutex<Vec<(JobStatus, u8, String)>>,
}

impl RecordingReporter {
    pub fn steps(&self) -> Vec<(JobStatus, u8, String)> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn step(&self, status: JobStatus, progress: u8, message: &str) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push((status, progress, message.to_string()));
        }
    }
}
