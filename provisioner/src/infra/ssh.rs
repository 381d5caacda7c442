//! `RemoteShell` over the system OpenSSH client.
//!
//! Password authentication goes through `sshpass -e`, which reads the
//! password from the `SSHPASS` environment variable so it never appears on
//! a command line. Each session multiplexes its commands over one control
//! master connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::application::ports::{
    CommandOutput, CommandRunner, CommandSpec, RemoteSession, RemoteShell,
};
use crate::domain::HostTarget;
use crate::domain::shell::quote;

/// ssh reserves this exit status for its own failures, though a remote
/// command may exit with it too.
const SSH_TRANSPORT_FAILURE: i32 = 255;
/// Line prefixes ssh writes to stderr when the connection itself fails.
const SSH_DIAGNOSTICS: &[&str] = &[
    "ssh:",
    "kex_exchange_identification:",
    "client_loop:",
    "mux_client",
    "Control socket",
    "Connection closed by",
    "Connection reset by",
    "Connection timed out",
    "Host key verification failed",
    "Permission denied (",
    "packet_write_wait:",
    "Timeout, server",
];
const CONTROL_PERSIST_SECS: u64 = 60;

/// Timeouts applied to remote work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshTimeouts {
    pub connect: Duration,
    pub command: Duration,
    pub install: Duration,
}

impl Default for SshTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            command: Duration::from_secs(30),
            install: Duration::from_secs(900),
        }
    }
}

pub struct SshShell {
    runner: Arc<dyn CommandRunner>,
    timeouts: SshTimeouts,
}

impl SshShell {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: SshTimeouts) -> Self {
        Self { runner, timeouts }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>> {
        let session = SshSession {
            runner: self.runner.clone(),
            target: target.clone(),
            timeouts: self.timeouts,
            control_path: std::env::temp_dir().join(format!("vps-ssh-{}", Uuid::new_v4().simple())),
        };
        // The first command also establishes the control master.
        let probe = session
            .run_raw("true", None, self.timeouts.command)
            .await?;
        if probe.exit_code == Some(SSH_TRANSPORT_FAILURE) {
            bail!(
                "ssh transport to {} failed: {}",
                target.host,
                probe.stderr.trim()
            );
        }
        if !probe.success() {
            bail!(
                "ssh to {} was refused (exit code {}): {}",
                target.host,
                probe.exit_code.unwrap_or(-1),
                probe.tail(5)
            );
        }
        debug!(host = %target.host, "ssh session opened");
        Ok(Box::new(session))
    }
}

pub struct SshSession {
    runner: Arc<dyn CommandRunner>,
    target: HostTarget,
    timeouts: SshTimeouts,
    control_path: PathBuf,
}

impl SshSession {
    fn base_command(&self, timeout: Duration) -> CommandSpec {
        let control_path = self.control_path.to_string_lossy();
        CommandSpec::new("sshpass", timeout)
            .env("SSHPASS", self.target.password.as_str())
            .args(["-e", "ssh"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .args(["-o", "PubkeyAuthentication=no"])
            .args(["-o", "NumberOfPasswordPrompts=1"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.timeouts.connect.as_secs().max(1)))
            .args(["-o", "ControlMaster=auto"])
            .arg("-o")
            .arg(format!("ControlPath={control_path}"))
            .arg("-o")
            .arg(format!("ControlPersist={CONTROL_PERSIST_SECS}"))
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.username, self.target.host)
    }

    /// Run on an open session. Exit 255 counts as a transport failure only
    /// when ssh says so on stderr; otherwise it is the command's own status.
    async fn run_remote(
        &self,
        command: &str,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let result = self.run_raw(command, stdin, timeout).await?;
        if is_transport_failure(&result) {
            bail!(
                "ssh transport to {} failed: {}",
                self.target.host,
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    async fn run_raw(
        &self,
        command: &str,
        stdin: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut spec = self
            .base_command(timeout)
            .arg(self.destination())
            .arg(command);
        if let Some(input) = stdin {
            spec = spec.stdin(input);
        }
        let output = self
            .runner
            .run(&spec)
            .await
            .with_context(|| format!("ssh to {}", self.target.host))?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn is_transport_failure(output: &CommandOutput) -> bool {
    output.exit_code == Some(SSH_TRANSPORT_FAILURE)
        && output.stderr.lines().any(|line| {
            let line = line.trim_start();
            SSH_DIAGNOSTICS.iter().any(|prefix| line.starts_with(prefix))
        })
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn query(&self, command: &str) -> Result<CommandOutput> {
        self.run_remote(command, None, self.timeouts.command).await
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        self.run_remote(command, None, self.timeouts.install).await
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<()> {
        let command = format!("cat > {}", quote(remote_path));
        let output = self
            .run_remote(&command, Some(content.to_vec()), self.timeouts.command)
            .await?;
        if !output.success() {
            bail!("upload to {remote_path} failed: {}", output.tail(5));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let spec = self
            .base_command(self.timeouts.connect)
            .args(["-O", "exit"])
            .arg(self.destination());
        self.runner.run(&spec).await.map(|_| ())
    }
}
