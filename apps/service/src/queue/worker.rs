use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::Job;
use super::runner::JobHandler;
use crate::config::WorkerConfig;
use crate::database::{Database, JobRepository, StoreError};

const BACKOFF_BASE_SECS: i64 = 5;
const BACKOFF_JITTER_MS: i64 = 1000;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub task_timeout: Duration,
    pub visibility_timeout: Duration,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts.max(1),
            task_timeout: config.task_timeout(),
            visibility_timeout: config.visibility_timeout(),
        }
    }
}

/// Delay before the next attempt: exponential from 5s plus up to a second of jitter.
pub fn backoff(attempt: u32) -> TimeDelta {
    let exponent = attempt.saturating_sub(1).min(6);
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    TimeDelta::seconds(BACKOFF_BASE_SECS << exponent) + TimeDelta::milliseconds(jitter)
}

/// Pool of workers draining the durable job queue
pub struct WorkerPool {
    db: Arc<dyn Database>,
    handler: Arc<dyn JobHandler>,
    settings: WorkerSettings,
    node_id: String,
}

impl WorkerPool {
    pub fn new(db: Arc<dyn Database>, handler: Arc<dyn JobHandler>, settings: WorkerSettings) -> Self {
        let node_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self { db, handler, settings, node_id }
    }

    /// Start `concurrency` workers that stop once `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(workers = self.settings.concurrency, node = %self.node_id, "starting worker pool");
        (0..self.settings.concurrency)
            .map(|index| {
                let pool = Arc::clone(&self);
                let shutdown = shutdown.clone();
                let worker_id = format!("{}-{index}", pool.node_id);
                tokio::spawn(async move { pool.worker_loop(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                debug!(worker = %worker_id, "worker stopping");
                break;
            }

            match self.run_once(&worker_id, Utc::now()).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(worker = %worker_id, error = %e, "queue access failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Claim and run a single job. Returns `false` when nothing was runnable.
    pub async fn run_once(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let reclaim_before = now - visibility(self.settings.visibility_timeout);
        let Some(record) = self.db.claim_job(worker_id, now, reclaim_before).await? else {
            return Ok(false);
        };

        let job = match Job::from_payload(&record.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = record.id, error = %e, "undecodable job payload");
                self.db.fail_job(record.id, &format!("undecodable payload: {e}"), now).await?;
                return Ok(true);
            }
        };

        debug!(job_id = record.id, job = job.name(), domain_id = job.domain_id(), attempt = record.attempts, "running job");
        let error = match tokio::time::timeout(self.settings.task_timeout, self.handler.handle(job)).await {
            Ok(Ok(())) => {
                self.db.complete_job(record.id).await?;
                return Ok(true);
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("timed out after {}s", self.settings.task_timeout.as_secs()),
        };

        if record.attempts >= self.settings.max_attempts {
            error!(job_id = record.id, job = job.name(), attempts = record.attempts, error = %error, "job failed permanently");
            self.db.fail_job(record.id, &error, now).await?;
        } else {
            let retry_at = now + backoff(record.attempts);
            warn!(job_id = record.id, job = job.name(), attempt = record.attempts, error = %error, "job failed, retrying");
            self.db.release_job(record.id, &error, retry_at).await?;
        }
        Ok(true)
    }
}

fn visibility(timeout: Duration) -> TimeDelta {
    TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
}
