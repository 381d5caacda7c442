//! `JobStore` backed by Valkey (or any Redis-compatible server).
//!
//! Layout:
//! - `vps:job:{job_id}` holds the JSON-serialized `Job`.
//! - `vps:jobs` is a sorted set of job ids scored by `created_at` in
//!   milliseconds, which gives newest-first listing and age-based purges
//!   without `KEYS`.
//!
//! The terminal-state guard runs server-side in a Lua script so two
//! writers cannot both reopen a finished job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Pool, Runtime};
use provisioner_common::{Job, JobStatus};
use tracing::{info, warn};

use crate::application::ports::JobStore;
use crate::domain::StoreError;

/// Key names used by the store.
pub mod keys {
    /// Format: vps:job:{job_id}
    pub const JOB_PREFIX: &str = "vps:job";

    /// Sorted set of job ids, score = `created_at` in epoch milliseconds.
    pub const JOB_INDEX: &str = "vps:jobs";

    #[must_use]
    pub fn job(job_id: &str) -> String {
        format!("{JOB_PREFIX}:{job_id}")
    }
}

/// Returns the stored status when it is terminal (write refused), nil
/// after a successful write.
const GUARDED_UPSERT: &str = r"
local current = redis.call('GET', KEYS[1])
if current then
  local status = cjson.decode(current)['status']
  if status == 'completed' or status == 'failed' or status == 'rejected' then
    return status
  end
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], 'NX', ARGV[2], ARGV[3])
return false
";

#[derive(Clone)]
pub struct ValkeyJobStore {
    pool: Pool,
    upsert_script: redis::Script,
}

impl ValkeyJobStore {
    /// Build the pool and verify connectivity with `PING`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .context("failed to create Valkey pool")?;
        let mut conn = pool.get().await.context("failed to connect to Valkey")?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Valkey startup PING failed; is Valkey reachable?")?;
        info!("Valkey job store ready");
        Ok(Self {
            pool,
            upsert_script: redis::Script::new(GUARDED_UPSERT),
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .context("failed to check out Valkey connection")
    }

    async fn load(&self, ids: &[String]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("GET").arg(keys::job(id));
        }
        let raw: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .context("pipelined GET for jobs failed")?;

        let mut jobs = Vec::with_capacity(raw.len());
        for (id, maybe_json) in ids.iter().zip(raw) {
            let Some(json) = maybe_json else { continue };
            match serde_json::from_str::<Job>(&json) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job_id = %id, error = %e, "skipping malformed job record"),
            }
        }
        Ok(jobs)
    }
}

/// ZREVRANGE stop index for an unfiltered listing of `limit` entries.
fn range_stop(limit: usize) -> isize {
    isize::try_from(limit).map_or(-1, |l| l - 1)
}

#[async_trait]
impl JobStore for ValkeyJobStore {
    async fn upsert(&self, job: &Job) -> Result<()> {
        let key = keys::job(&job.job_id);
        let mut record = job.clone();
        if let Some(existing) = self.get(&job.job_id).await? {
            record.created_at = existing.created_at;
        }
        let json = serde_json::to_string(&record).context("failed to serialize job")?;

        let mut conn = self.conn().await?;
        let refused: Option<String> = self
            .upsert_script
            .key(&key)
            .key(keys::JOB_INDEX)
            .arg(json)
            .arg(record.created_at.timestamp_millis())
            .arg(&record.job_id)
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("guarded SET failed for {key}"))?;

        match refused {
            None => Ok(()),
            Some(status) => Err(StoreError::TerminalOverwrite {
                job_id: job.job_id.clone(),
                status: status.parse().unwrap_or(JobStatus::Completed),
            }
            .into()),
        }
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(keys::job(job_id))
            .await
            .with_context(|| format!("GET failed for job {job_id}"))?;
        raw.map(|json| serde_json::from_str(&json).context("malformed job record"))
            .transpose()
    }

    async fn list(&self, limit: usize, status: Option<JobStatus>) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // A status filter has to look past the first `limit` ids.
        let stop = if status.is_some() { -1 } else { range_stop(limit) };
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrevrange(keys::JOB_INDEX, 0, stop)
            .await
            .context("ZREVRANGE on job index failed")?;
        drop(conn);

        let mut jobs = self.load(&ids).await?;
        if let Some(status) = status {
            jobs.retain(|job| job.status == status);
        }
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrangebyscore(keys::JOB_INDEX, "-inf", cutoff.timestamp_millis())
            .await
            .context("ZRANGEBYSCORE on job index failed")?;
        drop(conn);

        let stale: Vec<String> = self
            .load(&ids)
            .await?
            .into_iter()
            .filter(Job::is_terminal)
            .map(|job| job.job_id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for id in &stale {
            pipe.cmd("DEL").arg(keys::job(id)).ignore();
            pipe.cmd("ZREM").arg(keys::JOB_INDEX).arg(id).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .context("pipelined purge failed")?;
        Ok(stale.len())
    }
}
