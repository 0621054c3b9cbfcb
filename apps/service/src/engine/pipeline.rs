use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::instrument;

use super::applier::{Event, Transition, apply_verdict};
use super::incidents::incident_change;
use crate::database::models::DomainStatus;
use crate::database::{Database, DomainRepository, DomainWrite, NewJob, StoreError};
use crate::monitoring::Verdict;
use crate::queue::Job;

const MAX_APPLY_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { domain_id: i64, status: DomainStatus, transition: Option<Transition> },
    /// The domain was deleted before the verdict arrived
    UnknownDomain,
}

/// The single entry point that mutates domain status.
///
/// Local workers and the external ingress both call [`ResultPipeline::apply`].
/// Writes for one domain are serialized by an in-process lock and, across
/// processes, by the row version check in the store.
pub struct ResultPipeline {
    db: Arc<dyn Database>,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl ResultPipeline {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, locks: DashMap::new() }
    }

    fn domain_lock(&self, domain_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(domain_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn apply(&self, domain_id: i64, verdict: &Verdict) -> Result<ApplyOutcome, StoreError> {
        self.apply_at(domain_id, verdict, Utc::now()).await
    }

    #[instrument(skip(self, verdict), fields(status = %verdict.status))]
    pub async fn apply_at(
        &self,
        domain_id: i64,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, StoreError> {
        let lock = self.domain_lock(domain_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_locked(domain_id, verdict, now).await
        };

        // Only the map itself still holds the lock once every waiter is done.
        drop(lock);
        self.locks.remove_if(&domain_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn apply_locked(
        &self,
        domain_id: i64,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, StoreError> {
        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let Some(current) = self.db.get_domain(domain_id).await? else {
                tracing::debug!(domain_id, "verdict for unknown domain ignored");
                return Ok(ApplyOutcome::UnknownDomain);
            };

            let applied = apply_verdict(&current, verdict, now);
            let write = DomainWrite {
                domain: &applied.domain,
                expected_version: current.version,
                incident: incident_change(&applied.events, now),
                jobs: follow_up_jobs(domain_id, &applied.events, now)?,
            };

            if self.db.write_domain_state(write).await? {
                if applied.transition.is_some() {
                    tracing::info!(
                        domain_id,
                        domain = %applied.domain.name,
                        from = %applied.previous,
                        to = %applied.domain.status,
                        "status changed"
                    );
                }
                return Ok(ApplyOutcome::Applied {
                    domain_id,
                    status: applied.domain.status,
                    transition: applied.transition,
                });
            }

            tracing::debug!(domain_id, attempt, "domain row moved underneath, re-applying");
        }

        Err(StoreError::Conflict(format!("domain {domain_id} kept changing during apply")))
    }
}

fn follow_up_jobs(domain_id: i64, events: &[Event], now: DateTime<Utc>) -> Result<Vec<NewJob>, StoreError> {
    let jobs = events
        .iter()
        .filter_map(|event| match event {
            Event::ScheduleDownEvaluation { at } => Some(Job::EvaluateDown { domain_id }.at(*at)),
            Event::ScheduleUpEvaluation { at } => Some(Job::EvaluateUp { domain_id }.at(*at)),
            Event::DownAlertDue => Some(Job::EvaluateDown { domain_id }.at(now)),
            Event::OpenIncident { .. } | Event::CloseIncident => None,
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}
