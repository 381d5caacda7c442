//! Job lifecycle: accept a validated job, run it in the background, record
//! every transition, and serve queries over the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use provisioner_common::{Job, JobStats, JobStatus, SubmitReceipt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::application::ports::{JobStore, RemoteShell, ScriptLibrary, SourceFetcher};
use crate::application::services::named_app::NamedAppStrategy;
use crate::application::services::probe::ReadinessProbe;
use crate::application::services::strategy::{SourceStrategy, StrategyContext};
use crate::application::services::tracker::JobTracker;
use crate::domain::job::progress;
use crate::domain::{JobKind, JobSpec, ProvisionError};

pub const DEFAULT_LIST_LIMIT: usize = 100;
const TERMINAL_WRITE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Tunables for job workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_ssh_attempts: u32,
    /// Bound on a single readiness-probe connection attempt.
    pub ssh_attempt_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_ssh_attempts: 15,
            ssh_attempt_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Adapters shared by every worker.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub shell: Arc<dyn RemoteShell>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub scripts: Arc<dyn ScriptLibrary>,
}

/// A job accepted for processing.
pub struct Submitted {
    pub receipt: SubmitReceipt,
    /// Resolves once the job has reached a terminal state.
    pub worker: JoinHandle<()>,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    deps: Collaborators,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    #[must_use]
    pub fn new(deps: Collaborators, settings: OrchestratorSettings) -> Self {
        Self { deps, settings }
    }

    /// Create the `started` record and hand the job to a background worker.
    ///
    /// # Errors
    ///
    /// Fails only if the initial record cannot be stored; no worker is
    /// started in that case.
    pub async fn submit(&self, spec: JobSpec) -> Result<Submitted> {
        let job_id = Uuid::new_v4().to_string();
        let record = spec.new_record(job_id.clone());
        self.deps
            .store
            .upsert(&record)
            .await
            .with_context(|| format!("failed to store new job {job_id}"))?;
        info!(job_id = %job_id, app = %record.app, host = %record.target_host, "job submitted");

        let span = info_span!("job", job_id = %job_id, app = %record.app);
        let worker = tokio::spawn(self.clone().run_worker(job_id.clone(), spec).instrument(span));
        Ok(Submitted {
            receipt: SubmitReceipt::started(job_id),
            worker,
        })
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        self.deps.store.get(job_id).await
    }

    pub async fn list(&self, limit: usize, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.deps.store.list(limit, status).await
    }

    pub async fn stats(&self) -> Result<JobStats> {
        let jobs = self.deps.store.list(usize::MAX, None).await?;
        Ok(JobStats::from_jobs(&jobs))
    }

    /// Remove terminal jobs older than `max_age`.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age).context("retention age out of range")?;
        let removed = self
            .deps
            .store
            .purge_terminal_before(Utc::now() - max_age)
            .await?;
        if removed > 0 {
            info!(removed, "purged old jobs");
        }
        Ok(removed)
    }

    /// Runs the job in an inner task so that a panic is caught here and
    /// still produces exactly one terminal write.
    async fn run_worker(self, job_id: String, spec: JobSpec) {
        let tracker = JobTracker::new(self.deps.store.clone(), job_id.clone());
        let inner = {
            let this = self.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move { this.execute(&tracker, spec).await }.in_current_span())
        };
        let outcome = match inner.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(error = %join_error, "provisioning worker crashed");
                Err(ProvisionError::Unknown(format!(
                    "Provisioning worker crashed: {join_error}"
                )))
            }
        };

        let kind = match &outcome {
            Ok(_) => {
                info!("job completed");
                "none".to_string()
            }
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "job did not complete");
                err.kind().to_string()
            }
        };
        if let Err(first) = record_outcome(&tracker, &outcome).await {
            warn!(error = %format!("{first:#}"), "terminal job write failed, retrying once");
            tokio::time::sleep(TERMINAL_WRITE_RETRY_DELAY).await;
            if let Err(e) = record_outcome(&tracker, &outcome).await {
                error!(
                    job_id = %job_id,
                    kind = %kind,
                    error = %format!("{e:#}"),
                    "failed to record terminal job state; job stays active until retention"
                );
            }
        }
    }

    async fn execute(&self, tracker: &JobTracker, spec: JobSpec) -> Result<Value, ProvisionError> {
        let target = &spec.target;

        // 1. Wait for SSH
        tracker
            .advance(
                JobStatus::WaitingSsh,
                progress::WAITING_SSH,
                "Waiting for server to accept SSH",
            )
            .await?;
        let probe = ReadinessProbe::new(self.deps.shell.as_ref(), self.settings.ssh_attempt_timeout);
        let outcome = probe
            .wait_until_ready(target, self.settings.max_ssh_attempts)
            .await;
        if !outcome.ready {
            return Err(ProvisionError::SshTimeout {
                attempts: outcome.attempts,
            });
        }

        // 2. Open the working session
        let session = self.deps.shell.connect(target).await.map_err(|e| {
            ProvisionError::Provisioner(format!("SSH connection to {} failed: {e:#}", target.host))
        })?;
        let ctx = StrategyContext {
            session: session.as_ref(),
            fetcher: self.deps.fetcher.as_ref(),
            reporter: tracker,
            target,
            settle_delay: self.settings.settle_delay,
        };

        // 3. Run the strategy
        let result = match &spec.kind {
            JobKind::NamedApp { app, custom_domain } => {
                NamedAppStrategy::new(*app, custom_domain.clone())
                    .run(&ctx, self.deps.scripts.as_ref())
                    .await
            }
            JobKind::Source(source) => {
                tracker
                    .advance(
                        JobStatus::Analyzing,
                        progress::ANALYZING,
                        "Analyzing source",
                    )
                    .await?;
                SourceStrategy::resolve(source.clone()).run(&ctx).await
            }
        };

        if let Err(e) = session.close().await {
            warn!(error = %format!("{e:#}"), "failed to close SSH session");
        }
        result
    }
}

async fn record_outcome(
    tracker: &JobTracker,
    outcome: &Result<Value, ProvisionError>,
) -> Result<bool> {
    match outcome {
        Ok(result) => tracker.complete(result.clone()).await,
        Err(err) => tracker.fail(err).await,
    }
}
