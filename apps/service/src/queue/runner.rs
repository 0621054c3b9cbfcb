use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::Job;
use crate::database::{AccountRepository, Database, DomainRepository};
use crate::engine::{Evaluation, Notifier, ResultPipeline};
use crate::monitoring::Probe;
use crate::orchestrator::plans::PlanResolver;

/// Executes one decoded job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<()>;
}

/// Production handler: probes through the pipeline, evaluations through the notifier.
pub struct JobRunner {
    db: Arc<dyn Database>,
    prober: Arc<dyn Probe>,
    pipeline: Arc<ResultPipeline>,
    notifier: Arc<Notifier>,
    plans: Arc<dyn PlanResolver>,
}

impl JobRunner {
    pub fn new(
        db: Arc<dyn Database>,
        prober: Arc<dyn Probe>,
        pipeline: Arc<ResultPipeline>,
        notifier: Arc<Notifier>,
        plans: Arc<dyn PlanResolver>,
    ) -> Self {
        Self { db, prober, pipeline, notifier, plans }
    }

    async fn check_domain(&self, domain_id: i64, batch_id: Option<i64>) -> Result<()> {
        let Some(domain) = self.db.get_domain(domain_id).await? else {
            debug!(domain_id, ?batch_id, "domain removed before its check ran");
            return Ok(());
        };

        let check_certificate = match self.db.get_account(domain.account_id).await? {
            Some(account) => self.plans.resolve(&account.plan).ssl_check,
            None => false,
        };

        let verdict = self.prober.probe(&domain.name, check_certificate).await;
        self.pipeline.apply(domain_id, &verdict).await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, job: Job) -> Result<()> {
        match job {
            Job::CheckDomain { domain_id, batch_id } => self.check_domain(domain_id, batch_id).await,
            Job::EvaluateDown { domain_id } => {
                let evaluation = self.notifier.evaluate_down(domain_id, Utc::now()).await?;
                if let Evaluation::Skipped(reason) = evaluation {
                    debug!(domain_id, ?reason, "down evaluation skipped");
                }
                Ok(())
            }
            Job::EvaluateUp { domain_id } => {
                let evaluation = self.notifier.evaluate_up(domain_id, Utc::now()).await?;
                if let Evaluation::Skipped(reason) = evaluation {
                    debug!(domain_id, ?reason, "up evaluation skipped");
                }
                Ok(())
            }
        }
    }
}
