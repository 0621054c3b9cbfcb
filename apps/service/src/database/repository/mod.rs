use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{
    Account, CheckBatch, Domain, DomainStatus, DueDomain, Incident, NewNotificationLog,
    NotificationLog, NotificationSettings,
};
use crate::pool::{LibsqlManager, LibsqlPool};

mod accounts;
mod domains;
mod jobs;
mod notifications;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),
}

impl From<deadpool::managed::PoolError<libsql::Error>> for StoreError {
    fn from(err: deadpool::managed::PoolError<libsql::Error>) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Incident bookkeeping that must commit together with a domain update.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentChange {
    /// Open a new incident unless one is already open for the domain.
    Open { status_before: DomainStatus, message: Option<String>, at: DateTime<Utc> },
    /// Close the most recent open incident, if any.
    Close { at: DateTime<Utc> },
}

/// Job row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub payload: String,
    pub available_at: DateTime<Utc>,
}

/// A reserved job as returned by a claim.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub payload: String,
    /// Attempts including the current reservation.
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Everything the result pipeline writes for one applied verdict.
#[derive(Debug, Clone)]
pub struct DomainWrite<'a> {
    pub domain: &'a Domain,
    /// Version read before applying; the write is rejected if it moved.
    pub expected_version: i64,
    pub incident: Option<IncidentChange>,
    pub jobs: Vec<NewJob>,
}

/// Domain rows, incidents and the atomic notification claims
#[async_trait]
pub trait DomainRepository: Send + Sync {
    async fn register_domain(
        &self,
        account_id: i64,
        name: &str,
        campaign: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Domain, StoreError>;

    async fn get_domain(&self, id: i64) -> Result<Option<Domain>, StoreError>;

    async fn delete_domain(&self, id: i64) -> Result<(), StoreError>;

    /// Domains of an account in registration order
    async fn list_account_domains(
        &self,
        account_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Domain>, StoreError>;

    /// Never-checked domains first, then the least recently checked
    async fn due_domains(&self, limit: usize) -> Result<Vec<DueDomain>, StoreError>;

    async fn mark_queued(&self, ids: &[i64], now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Compare-and-update of the domain row plus its incident change and jobs,
    /// in one transaction. Returns `false` when the version moved or the row is gone.
    async fn write_domain_state(&self, write: DomainWrite<'_>) -> Result<bool, StoreError>;

    /// Sets `down_notified_at` if the domain has been down since `down_since_before`
    /// or earlier and nobody claimed the alert yet. Returns the updated row on success.
    async fn claim_down_notification(
        &self,
        id: i64,
        now: DateTime<Utc>,
        down_since_before: DateTime<Utc>,
    ) -> Result<Option<Domain>, StoreError>;

    /// Sets `up_notified_at` if the domain is ok and the recovery is unclaimed.
    async fn claim_up_notification(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Domain>, StoreError>;

    async fn open_incident(&self, domain_id: i64) -> Result<Option<Incident>, StoreError>;

    async fn list_incidents(&self, domain_id: i64) -> Result<Vec<Incident>, StoreError>;

    async fn prune_closed_incidents(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Accounts, check batches and notification settings
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn insert_account(&self, name: &str, plan: &str, now: DateTime<Utc>) -> Result<Account, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn latest_batch(&self, account_id: i64) -> Result<Option<CheckBatch>, StoreError>;

    async fn open_batch(
        &self,
        account_id: i64,
        total: i64,
        scheduled_for: DateTime<Utc>,
    ) -> Result<CheckBatch, StoreError>;

    async fn update_batch(&self, batch: &CheckBatch) -> Result<(), StoreError>;

    async fn notification_settings(
        &self,
        account_id: i64,
    ) -> Result<Option<NotificationSettings>, StoreError>;

    async fn save_notification_settings(
        &self,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Append-only delivery log
#[async_trait]
pub trait NotificationLogRepository: Send + Sync {
    async fn append_notification_log(&self, entry: &NewNotificationLog) -> Result<i64, StoreError>;

    async fn notification_logs(
        &self,
        account_id: i64,
        limit: usize,
    ) -> Result<Vec<NotificationLog>, StoreError>;

    async fn prune_notification_logs(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Durable queue rows
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn enqueue_jobs(&self, jobs: &[NewJob], now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Reserve the oldest available job. Reservations older than
    /// `reclaim_before` are treated as abandoned.
    async fn claim_job(
        &self,
        worker: &str,
        now: DateTime<Utc>,
        reclaim_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError>;

    async fn complete_job(&self, id: i64) -> Result<(), StoreError>;

    async fn release_job(
        &self,
        id: i64,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn fail_job(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Unfinished jobs, failed ones included, in queue order
    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;

    async fn prune_failed_jobs(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Database trait for abstracting database operations
pub trait Database:
    DomainRepository + AccountRepository + NotificationLogRepository + JobRepository
{
}

impl<T> Database for T where
    T: DomainRepository + AccountRepository + NotificationLogRepository + JobRepository
{
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

pub(crate) fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::InvalidValue)
}
