//! Readiness probe: wait for a freshly created host to accept SSH.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::application::ports::RemoteShell;
use crate::domain::HostTarget;

/// Seconds to wait after each failed attempt. Waits level off at 60s.
pub const BACKOFF_SCHEDULE_SECS: [u64; 15] = [5, 5, 10, 10, 15, 15, 20, 20, 30, 30, 30, 30, 60, 60, 60];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ready: bool,
    pub attempts: u32,
}

pub struct ReadinessProbe<'a> {
    shell: &'a dyn RemoteShell,
    attempt_timeout: Duration,
}

impl<'a> ReadinessProbe<'a> {
    #[must_use]
    pub fn new(shell: &'a dyn RemoteShell, attempt_timeout: Duration) -> Self {
        Self {
            shell,
            attempt_timeout,
        }
    }

    /// Try to open (and immediately close) a session up to `max_attempts`
    /// times, capped at the schedule length. No wait follows the final
    /// attempt.
    pub async fn wait_until_ready(&self, target: &HostTarget, max_attempts: u32) -> ProbeOutcome {
        let cap = max_attempts.min(u32::try_from(BACKOFF_SCHEDULE_SECS.len()).unwrap_or(u32::MAX));
        for attempt in 1..=cap {
            match tokio::time::timeout(self.attempt_timeout, self.shell.connect(target)).await {
                Ok(Ok(session)) => {
                    if let Err(e) = session.close().await {
                        debug!(host = %target.host, error = %e, "probe session close failed");
                    }
                    info!(host = %target.host, attempt, "host accepted SSH session");
                    return ProbeOutcome {
                        ready: true,
                        attempts: attempt,
                    };
                }
                Ok(Err(e)) => {
                    debug!(host = %target.host, attempt, error = %e, "SSH not ready");
                }
                Err(_) => {
                    debug!(host = %target.host, attempt, "SSH attempt timed out");
                }
            }
            if attempt < cap {
                let wait = BACKOFF_SCHEDULE_SECS[(attempt - 1) as usize];
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
        }
        warn!(host = %target.host, attempts = cap, "host never accepted SSH");
        ProbeOutcome {
            ready: false,
            attempts: cap,
        }
    }
}
