//! Persists the state-machine writes for one job.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use provisioner_common::{Job, JobStatus};
use serde_json::Value;
use tracing::{debug, warn};

use crate::application::ports::{JobStore, ProgressReporter};
use crate::domain::ProvisionError;
use crate::domain::TransitionError;
use crate::domain::job::{apply_failure, apply_step, apply_success};

/// Read-modify-write access to a single job record.
///
/// Writes the state machine refuses are logged and dropped, so a late
/// update can never reopen a finished job.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
    job_id: String,
}

impl JobTracker {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, job_id: String) -> Self {
        Self { store, job_id }
    }

    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Returns `Ok(false)` when the write was refused.
    pub async fn advance(&self, status: JobStatus, progress: u8, message: &str) -> Result<bool> {
        self.write(|job| apply_step(job, status, progress, message, Utc::now()))
            .await
    }

    pub async fn complete(&self, result: Value) -> Result<bool> {
        self.write(|job| apply_success(job, result, Utc::now())).await
    }

    pub async fn fail(&self, error: &ProvisionError) -> Result<bool> {
        self.write(|job| apply_failure(job, error, Utc::now())).await
    }

    async fn write(
        &self,
        update: impl FnOnce(&mut Job) -> Result<(), TransitionError>,
    ) -> Result<bool> {
        let mut job = self
            .store
            .get(&self.job_id)
            .await?
            .ok_or_else(|| anyhow!("job {} is not in the store", self.job_id))?;
        if let Err(refused) = update(&mut job) {
            warn!(job_id = %self.job_id, error = %refused, "ignoring job update");
            return Ok(false);
        }
        self.store.upsert(&job).await?;
        debug!(job_id = %self.job_id, status = %job.status, progress = job.progress, "job updated");
        Ok(true)
    }
}

#[async_trait]
impl ProgressReporter for JobTracker {
    async fn step(&self, status: JobStatus, progress: u8, message: &str) {
        if let Err(e) = self.advance(status, progress, message).await {
            warn!(job_id = %self.job_id, error = %format!("{e:#}"), "failed to record progress");
        }
    }
}
