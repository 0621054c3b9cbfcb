use libsql::Connection;

use super::repository::StoreError;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 3;

/// Run database migrations
///
/// Both binaries call this on start-up; every statement is idempotent so a
/// concurrent start of the server and the service is harmless.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Accounts, domains and incidents").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Check batches, notification settings and logs").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Durable job queue").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32, StoreError> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i64> = row.get(0)?;
        Ok(version.unwrap_or(0) as i32)
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version as i64, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: accounts, domains and incidents
async fn run_migration_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            plan TEXT NOT NULL DEFAULT 'free',
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS domains (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            campaign TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            status_since INTEGER NOT NULL,
            last_checked_at INTEGER,
            last_up_at INTEGER,
            last_down_at INTEGER,
            down_notified_at INTEGER,
            up_notified_at INTEGER,
            ssl_valid INTEGER,
            last_check_error TEXT,
            history TEXT NOT NULL DEFAULT '[]',
            queued_at INTEGER,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS incidents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain_id INTEGER NOT NULL,
            status_before TEXT NOT NULL,
            status_after TEXT NOT NULL,
            message TEXT,
            opened_at INTEGER NOT NULL,
            closed_at INTEGER,
            FOREIGN KEY (domain_id) REFERENCES domains(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_domains_account ON domains(account_id, id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_domains_last_checked ON domains(last_checked_at)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_incidents_open ON incidents(domain_id, closed_at)", ()).await?;

    Ok(())
}

/// Migration v2: check batches, notification settings and the notification log
async fn run_migration_v2(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            total INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            scheduled_for INTEGER NOT NULL,
            completed_at INTEGER,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    // channels and credentials are JSON documents
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_settings (
            account_id INTEGER PRIMARY KEY,
            notify_on_fail INTEGER NOT NULL DEFAULT 1,
            channels TEXT NOT NULL DEFAULT '[]',
            credentials TEXT NOT NULL DEFAULT '{}',
            telegram_chat_id TEXT,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            domain_id INTEGER,
            channel TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_batches_account ON check_batches(account_id, scheduled_for DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_logs_account ON notification_logs(account_id, created_at DESC)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v3: job table backing the task queue
async fn run_migration_v3(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            available_at INTEGER NOT NULL,
            reserved_at INTEGER,
            reserved_by TEXT,
            last_error TEXT,
            failed_at INTEGER,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_available ON jobs(failed_at, available_at, id)",
        (),
    )
    .await?;

    Ok(())
}
