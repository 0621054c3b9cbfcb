/// Durable task queue
///
/// Jobs are rows in the `jobs` table. Delayed work (the debounced notifier
/// evaluations) is an ordinary job whose `available_at` lies in the future.
pub mod runner;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::NewJob;

pub use runner::JobRunner;
pub use worker::{WorkerPool, WorkerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Probe a domain and apply the verdict
    CheckDomain { domain_id: i64, batch_id: Option<i64> },
    /// Send the down alert if the outage outlived the debounce window
    EvaluateDown { domain_id: i64 },
    /// Send the recovery alert if the domain stayed up
    EvaluateUp { domain_id: i64 },
}

impl Job {
    pub fn domain_id(&self) -> i64 {
        match self {
            Job::CheckDomain { domain_id, .. }
            | Job::EvaluateDown { domain_id }
            | Job::EvaluateUp { domain_id } => *domain_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::CheckDomain { .. } => "check_domain",
            Job::EvaluateDown { .. } => "evaluate_down",
            Job::EvaluateUp { .. } => "evaluate_up",
        }
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Queue row for this job, runnable from `available_at`.
    pub fn at(&self, available_at: DateTime<Utc>) -> Result<NewJob, serde_json::Error> {
        Ok(NewJob { payload: serde_json::to_string(self)?, available_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_tagged() {
        let job = Job::EvaluateDown { domain_id: 7 };
        let row = job.at(Utc::now()).unwrap();

        assert_eq!(row.payload, r#"{"kind":"evaluate_down","domain_id":7}"#);
        assert_eq!(Job::from_payload(&row.payload).unwrap(), job);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Job::from_payload(r#"{"kind":"reboot","domain_id":1}"#).is_err());
    }
}
