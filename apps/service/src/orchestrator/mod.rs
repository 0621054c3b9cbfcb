/// Orchestrator module - schedules checks per account
///
/// The orchestrator:
/// - Walks every account on a fixed sweep interval
/// - Opens a check batch once the plan's check interval has elapsed
/// - Marks the batch's domains as queued
/// - Enqueues local probe jobs, or leaves them to the external prober fleet
///
/// Retention cleanup of logs, incidents and failed jobs lives in the
/// `retention` submodule.
pub mod plans;
pub mod retention;

pub use plans::{ConfigPlanResolver, PlanResolver, PlanRules};
pub use retention::{RetentionCleanup, RetentionPolicy};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::database::models::{Account, BatchStatus};
use crate::database::{AccountRepository, Database, DomainRepository, JobRepository, StoreError};
use crate::queue::Job;

/// Where probes for a sweep run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Enqueue one probe job per domain on the local worker pool
    #[default]
    Local,
    /// Only mark domains; the external fleet pulls and pushes them
    Delegated,
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMode::Local => write!(f, "local"),
            CheckMode::Delegated => write!(f, "delegated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The previous batch is younger than the plan interval
    NotDue { next_due: DateTime<Utc> },
    Dispatched { batch_id: i64, domains: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub accounts: usize,
    pub batches: usize,
    pub domains: usize,
    pub failures: usize,
}

pub struct CheckOrchestrator {
    database: Arc<dyn Database>,
    plans: Arc<dyn PlanResolver>,
    mode: CheckMode,
}

impl CheckOrchestrator {
    pub fn new(database: Arc<dyn Database>, plans: Arc<dyn PlanResolver>, mode: CheckMode) -> Self {
        Self { database, plans, mode }
    }

    /// One pass over all accounts. A failing account is logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let accounts = self.database.list_accounts().await?;
        let mut report = SweepReport { accounts: accounts.len(), ..Default::default() };

        for account in &accounts {
            match self.sweep_account(account, now).await {
                Ok(SweepOutcome::Dispatched { domains, .. }) => {
                    report.batches += 1;
                    report.domains += domains;
                }
                Ok(SweepOutcome::NotDue { next_due }) => {
                    debug!(account_id = account.id, %next_due, "account not due");
                }
                Err(e) => {
                    warn!(account_id = account.id, error = %e, "account sweep failed");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    pub async fn sweep_account(&self, account: &Account, now: DateTime<Utc>) -> Result<SweepOutcome, StoreError> {
        let rules = self.plans.resolve(&account.plan);
        if let Some(last) = self.database.latest_batch(account.id).await? {
            let next_due =
                last.scheduled_for.checked_add_signed(rules.check_interval()).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if now < next_due {
                return Ok(SweepOutcome::NotDue { next_due });
            }
        }

        let domains = self.database.list_account_domains(account.id, Some(rules.max_domains)).await?;
        let ids: Vec<i64> = domains.iter().map(|d| d.id).collect();

        let mut batch = self.database.open_batch(account.id, ids.len() as i64, now).await?;
        batch.status = BatchStatus::Processing;
        self.database.update_batch(&batch).await?;

        self.database.mark_queued(&ids, now).await?;

        if self.mode == CheckMode::Local {
            let jobs = ids
                .iter()
                .map(|id| Job::CheckDomain { domain_id: *id, batch_id: Some(batch.id) }.at(now))
                .collect::<Result<Vec<_>, _>>()?;
            self.database.enqueue_jobs(&jobs, now).await?;
        }

        // Dispatch accounting only; results land asynchronously.
        batch.processed = batch.total;
        batch.status = BatchStatus::Completed;
        batch.completed_at = Some(now);
        self.database.update_batch(&batch).await?;

        info!(
            account_id = account.id,
            batch_id = batch.id,
            domains = ids.len(),
            mode = %self.mode,
            "check batch dispatched"
        );
        Ok(SweepOutcome::Dispatched { batch_id: batch.id, domains: ids.len() })
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if report.batches > 0 => info!(
                            batches = report.batches,
                            domains = report.domains,
                            failures = report.failures,
                            "sweep finished"
                        ),
                        Ok(_) => debug!("sweep finished, nothing due"),
                        Err(e) => warn!(error = %e, "sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orchestrator stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlansConfig;
    use crate::database::open_database;
    use chrono::TimeDelta;

    async fn setup(mode: CheckMode) -> (tempfile::TempDir, Arc<crate::database::DatabaseImpl>, CheckOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(open_database(&dir.path().join("t.db"), 2).await.unwrap());
        let plans = Arc::new(ConfigPlanResolver::new(&PlansConfig::default()));
        let orchestrator = CheckOrchestrator::new(db.clone(), plans, mode);
        (dir, db, orchestrator)
    }

    #[tokio::test]
    async fn test_local_sweep_enqueues_and_completes_batch() {
        let (_dir, db, orchestrator) = setup(CheckMode::Local).await;
        let now = Utc::now();
        let account = db.insert_account("acme", "pro", now).await.unwrap();
        let first = db.register_domain(account.id, "a.example.com", None, now).await.unwrap();
        db.register_domain(account.id, "b.example.com", Some("spring"), now).await.unwrap();

        let outcome = orchestrator.sweep_account(&account, now).await.unwrap();

        let SweepOutcome::Dispatched { batch_id, domains } = outcome else { panic!("expected dispatch") };
        assert_eq!(domains, 2);
        let batch = db.latest_batch(account.id).await.unwrap().unwrap();
        assert_eq!(batch.id, batch_id);
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.processed, 2);
        assert_eq!(db.list_jobs().await.unwrap().len(), 2);

        let marked = db.get_domain(first.id).await.unwrap().unwrap();
        assert!(marked.queued_at.is_some());
        assert_eq!(marked.status, first.status);
    }

    #[tokio::test]
    async fn test_interval_and_plan_limit_are_respected() {
        let (_dir, db, orchestrator) = setup(CheckMode::Local).await;
        let now = Utc::now();
        let account = db.insert_account("tiny", "free", now).await.unwrap();
        for i in 0..55 {
            db.register_domain(account.id, &format!("d{i}.example.com"), None, now).await.unwrap();
        }

        let first = orchestrator.sweep_account(&account, now).await.unwrap();
        let again = orchestrator.sweep_account(&account, now + TimeDelta::minutes(30)).await.unwrap();
        let later = orchestrator.sweep_account(&account, now + TimeDelta::hours(1)).await.unwrap();

        assert!(matches!(first, SweepOutcome::Dispatched { domains: 50, .. }));
        assert!(matches!(again, SweepOutcome::NotDue { .. }));
        assert!(matches!(later, SweepOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_never_comes_due() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(open_database(&dir.path().join("t.db"), 2).await.unwrap());
        let mut config = PlansConfig::default();
        config
            .rules
            .insert("glacial".into(), PlanRules { max_domains: 5, check_interval_secs: u64::MAX, ssl_check: false });
        let orchestrator =
            CheckOrchestrator::new(db.clone(), Arc::new(ConfigPlanResolver::new(&config)), CheckMode::Local);
        let now = Utc::now();
        let account = db.insert_account("slow", "glacial", now).await.unwrap();
        db.register_domain(account.id, "slow.example.com", None, now).await.unwrap();

        let first = orchestrator.sweep_account(&account, now).await.unwrap();
        let again = orchestrator.sweep_account(&account, now + TimeDelta::days(3650)).await.unwrap();

        assert!(matches!(first, SweepOutcome::Dispatched { domains: 1, .. }));
        assert!(matches!(again, SweepOutcome::NotDue { next_due } if next_due == DateTime::<Utc>::MAX_UTC));
    }

    #[tokio::test]
    async fn test_delegated_sweep_enqueues_nothing() {
        let (_dir, db, orchestrator) = setup(CheckMode::Delegated).await;
        let now = Utc::now();
        let account = db.insert_account("edge", "pro", now).await.unwrap();
        db.register_domain(account.id, "edge.example.com", None, now).await.unwrap();

        let report = orchestrator.sweep(now).await.unwrap();

        assert_eq!(report.batches, 1);
        assert_eq!(report.domains, 1);
        assert!(db.list_jobs().await.unwrap().is_empty());
    }
}
