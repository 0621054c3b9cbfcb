/// Database abstraction layer
///
/// Persistence for domains, incidents, batches, notification logs and the
/// job queue, backed by LibSQL through a deadpool connection pool.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{
    AccountRepository, Database, DatabaseImpl, DomainRepository, DomainWrite, IncidentChange,
    JobRecord, JobRepository, NewJob, NotificationLogRepository, StoreError,
};

use std::path::Path;

use anyhow::Result;

use crate::pool::open_pool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<(), StoreError> {
    migrations::run_migrations(conn).await
}

/// Open (or create) the database file, migrate it and return the store.
pub async fn open_database(path: &Path, pool_size: usize) -> Result<DatabaseImpl> {
    let pool = open_pool(path, pool_size).await?;

    let conn = pool.get().await.map_err(StoreError::from)?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok(DatabaseImpl::new_from_pool(pool))
}
