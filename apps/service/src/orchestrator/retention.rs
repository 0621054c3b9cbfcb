//! Automatic retention and cleanup.
//!
//! Notification log rows, closed incidents and permanently failed jobs are
//! deleted once they are older than the configured number of days. Open
//! incidents and pending jobs are never touched.
//!
//! Cleanup runs periodically as a background task.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::{Database, DomainRepository, JobRepository, NotificationLogRepository};

/// Retention policy for historical rows
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep notification logs, closed incidents and failed jobs
    pub days: i64,
    /// How often the background task runs
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { days: 30, interval: Duration::from_secs(3600) }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self { days: i64::from(config.days), interval: Duration::from_secs(config.interval_secs.max(1)) }
    }
}

impl RetentionPolicy {
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - TimeDelta::days(self.days)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub notification_logs: u64,
    pub incidents: u64,
    pub failed_jobs: u64,
}

/// Cleanup manager for expired rows
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = self.policy.cutoff(now);
        debug!(%cutoff, days = self.policy.days, "starting retention cleanup");

        let report = CleanupReport {
            notification_logs: self.database.prune_notification_logs(cutoff).await?,
            incidents: self.database.prune_closed_incidents(cutoff).await?,
            failed_jobs: self.database.prune_failed_jobs(cutoff).await?,
        };

        info!(
            notification_logs = report.notification_logs,
            incidents = report.incidents,
            failed_jobs = report.failed_jobs,
            "retention cleanup completed"
        );
        Ok(report)
    }

    /// Start background cleanup task
    pub fn start_periodic_cleanup(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.cleanup(Utc::now()).await {
                            warn!("Periodic retention cleanup failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use crate::database::models::{DeliveryStatus, NewNotificationLog};
    use crate::database::{AccountRepository, IncidentChange, NewJob, open_database};

    #[test]
    fn test_retention_policy_from_config() {
        let policy = RetentionPolicy::from(&RetentionConfig { days: 14, interval_secs: 0 });
        assert_eq!(policy.days, 14);
        assert_eq!(policy.interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_and_open_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(open_database(&dir.path().join("t.db"), 2).await.unwrap());
        let now = Utc::now();
        let old = now - TimeDelta::days(40);
        let account = db.insert_account("acme", "pro", old).await.unwrap();

        for created_at in [old, now] {
            db.append_notification_log(&NewNotificationLog {
                account_id: account.id,
                domain_id: None,
                channel: "slack".into(),
                status: DeliveryStatus::Sent,
                message: "m".into(),
                metadata: serde_json::json!({}),
                created_at,
            })
            .await
            .unwrap();
        }

        let closed = db.register_domain(account.id, "old.example.com", None, old).await.unwrap();
        let open = db.register_domain(account.id, "open.example.com", None, old).await.unwrap();
        for (domain, close) in [(&closed, true), (&open, false)] {
            let mut down = domain.clone();
            down.status = crate::database::models::DomainStatus::Down;
            let write = crate::database::DomainWrite {
                domain: &down,
                expected_version: domain.version,
                incident: Some(IncidentChange::Open {
                    status_before: domain.status,
                    message: None,
                    at: old,
                }),
                jobs: vec![],
            };
            assert!(db.write_domain_state(write).await.unwrap());
            if close {
                let current = db.get_domain(domain.id).await.unwrap().unwrap();
                let write = crate::database::DomainWrite {
                    domain: &current,
                    expected_version: current.version,
                    incident: Some(IncidentChange::Close { at: old }),
                    jobs: vec![],
                };
                assert!(db.write_domain_state(write).await.unwrap());
            }
        }

        db.enqueue_jobs(&[NewJob { payload: "{}".into(), available_at: old }], old).await.unwrap();
        let job = db.claim_job("w", old, old).await.unwrap().unwrap();
        db.fail_job(job.id, "boom", old).await.unwrap();

        let report = RetentionCleanup::new(db.clone(), RetentionPolicy::default()).cleanup(now).await.unwrap();

        assert_eq!(report, CleanupReport { notification_logs: 1, incidents: 1, failed_jobs: 1 });
        assert_eq!(db.notification_logs(account.id, 10).await.unwrap().len(), 1);
        assert!(db.open_incident(open.id).await.unwrap().is_some());
    }
}
