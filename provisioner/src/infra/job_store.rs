//! In-process `JobStore`, used when no Valkey URL is configured and by tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_common::{Job, JobStatus};
use tokio::sync::RwLock;

use crate::application::ports::JobStore;
use crate::domain::StoreError;

/// Jobs live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let mut record = job.clone();
        if let Some(existing) = jobs.get(&job.job_id) {
            if existing.is_terminal() {
                return Err(StoreError::TerminalOverwrite {
                    job_id: job.job_id.clone(),
                    status: existing.status,
                }
                .into());
            }
            record.created_at = existing.created_at;
        }
        jobs.insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn list(&self, limit: usize, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.is_terminal() && job.created_at < cutoff));
        Ok(before - jobs.len())
    }
}
