//! External result ingress.
//!
//! The remote prober fleet pulls due domains and pushes verdicts back. Every
//! pushed verdict goes through [`ResultPipeline::apply`], the same entry point
//! local workers use.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::models::{DueDomain, SslState};
use crate::database::{Database, DomainRepository, StoreError};
use crate::engine::{ApplyOutcome, ResultPipeline, Transition};
use crate::monitoring::{Verdict, VerdictStatus};

pub const DEFAULT_DUE_LIMIT: usize = 100;
pub const MAX_DUE_LIMIT: usize = 1000;
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("Domain {0} not found")]
    UnknownDomain(i64),

    #[error("Batch of {0} results exceeds the limit of {MAX_BATCH_SIZE}")]
    BatchTooLarge(usize),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One verdict as reported by the fleet
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultPayload {
    pub id: i64,
    pub status: VerdictStatus,
    #[serde(default)]
    pub ssl_valid: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ResultPayload {
    pub fn verdict(&self) -> Verdict {
        Verdict {
            status: self.status,
            ssl_valid: SslState::from(self.ssl_valid),
            error: self.error.clone(),
            checked_at: self.checked_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DueResponse {
    pub count: usize,
    pub domains: Vec<DueDomain>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushResponse {
    pub success: bool,
    pub id: i64,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub id: Option<i64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<ItemResult>,
}

/// Caller limit clamped to `1..=1000`, 100 when absent.
pub fn clamp_due_limit(limit: Option<i64>) -> usize {
    match limit {
        None => DEFAULT_DUE_LIMIT,
        Some(n) => n.clamp(1, MAX_DUE_LIMIT as i64) as usize,
    }
}

pub struct ExternalIngress {
    database: Arc<dyn Database>,
    pipeline: Arc<ResultPipeline>,
}

impl ExternalIngress {
    pub fn new(database: Arc<dyn Database>, pipeline: Arc<ResultPipeline>) -> Self {
        Self { database, pipeline }
    }

    pub async fn due(&self, limit: Option<i64>) -> Result<DueResponse, StoreError> {
        let domains = self.database.due_domains(clamp_due_limit(limit)).await?;
        Ok(DueResponse { count: domains.len(), domains })
    }

    pub async fn push(&self, payload: &ResultPayload) -> Result<PushResponse, IngressError> {
        match self.pipeline.apply(payload.id, &payload.verdict()).await? {
            ApplyOutcome::Applied { transition, .. } => {
                Ok(PushResponse { success: true, id: payload.id, transition })
            }
            ApplyOutcome::UnknownDomain => Err(IngressError::UnknownDomain(payload.id)),
        }
    }

    /// Apply items one after another in submission order. Bad items are
    /// reported in place and never abort the rest.
    pub async fn push_batch(&self, items: Vec<Value>) -> Result<BatchResponse, IngressError> {
        if items.len() > MAX_BATCH_SIZE {
            return Err(IngressError::BatchTooLarge(items.len()));
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let id = item.get("id").and_then(Value::as_i64);
            let payload = match serde_json::from_value::<ResultPayload>(item) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(?id, error = %e, "rejected malformed result");
                    results.push(ItemResult { id, success: false, error: Some(format!("invalid payload: {e}")) });
                    continue;
                }
            };

            let result = match self.push(&payload).await {
                Ok(_) => ItemResult { id: Some(payload.id), success: true, error: None },
                Err(IngressError::UnknownDomain(_)) => ItemResult {
                    id: Some(payload.id),
                    success: false,
                    error: Some("domain not found".to_string()),
                },
                Err(e) => {
                    warn!(domain_id = payload.id, error = %e, "failed to apply pushed result");
                    ItemResult { id: Some(payload.id), success: false, error: Some(e.to_string()) }
                }
            };
            results.push(result);
        }

        let processed = results.iter().filter(|r| r.success).count();
        Ok(BatchResponse { processed, failed: results.len() - processed, results })
    }
}
