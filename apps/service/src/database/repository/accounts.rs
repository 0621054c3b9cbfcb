use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::{AccountRepository, DatabaseImpl, StoreError, parse_column};
use crate::database::models::{
    Account, BatchStatus, CheckBatch, NotificationSettings, i64_to_timestamp, optional_timestamp,
    timestamp_to_i64,
};

const BATCH_COLUMNS: &str = "id, account_id, status, total, processed, scheduled_for, completed_at";

fn batch_from_row(row: &Row) -> Result<CheckBatch, StoreError> {
    let status: String = row.get(2)?;
    Ok(CheckBatch {
        id: row.get(0)?,
        account_id: row.get(1)?,
        status: parse_column(&status)?,
        total: row.get(3)?,
        processed: row.get(4)?,
        scheduled_for: i64_to_timestamp(row.get(5)?),
        completed_at: optional_timestamp(row.get(6)?),
    })
}

fn account_from_row(row: &Row) -> Result<Account, StoreError> {
    Ok(Account { id: row.get(0)?, name: row.get(1)?, plan: row.get(2)? })
}

#[async_trait]
impl AccountRepository for DatabaseImpl {
    async fn insert_account(
        &self,
        name: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO accounts (name, plan, created_at) VALUES (?, ?, ?)",
            params![name.to_string(), plan.to_string(), timestamp_to_i64(now)],
        )
        .await?;

        Ok(Account { id: conn.last_insert_rowid(), name: name.to_string(), plan: plan.to_string() })
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows =
            conn.query("SELECT id, name, plan FROM accounts WHERE id = ?", params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(account_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT id, name, plan FROM accounts ORDER BY id ASC", ()).await?;

        let mut accounts = Vec::new();
        while let Some(row) = rows.next().await? {
            accounts.push(account_from_row(&row)?);
        }
        Ok(accounts)
    }

    async fn latest_batch(&self, account_id: i64) -> Result<Option<CheckBatch>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {BATCH_COLUMNS} FROM check_batches WHERE account_id = ?
                     ORDER BY scheduled_for DESC, id DESC LIMIT 1"
                ),
                params![account_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(batch_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn open_batch(
        &self,
        account_id: i64,
        total: i64,
        scheduled_for: DateTime<Utc>,
    ) -> Result<CheckBatch, StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO check_batches (account_id, status, total, processed, scheduled_for)
             VALUES (?, 'pending', ?, 0, ?)",
            params![account_id, total, timestamp_to_i64(scheduled_for)],
        )
        .await?;

        Ok(CheckBatch {
            id: conn.last_insert_rowid(),
            account_id,
            status: BatchStatus::Pending,
            total,
            processed: 0,
            scheduled_for: i64_to_timestamp(timestamp_to_i64(scheduled_for)),
            completed_at: None,
        })
    }

    async fn update_batch(&self, batch: &CheckBatch) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE check_batches SET status = ?, total = ?, processed = ?, completed_at = ?
             WHERE id = ?",
            params![
                batch.status.as_str(),
                batch.total,
                batch.processed,
                batch.completed_at.map(timestamp_to_i64),
                batch.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn notification_settings(
        &self,
        account_id: i64,
    ) -> Result<Option<NotificationSettings>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT account_id, notify_on_fail, channels, credentials, telegram_chat_id
                 FROM notification_settings WHERE account_id = ?",
                params![account_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let channels: String = row.get(2)?;
        let credentials: String = row.get(3)?;

        Ok(Some(NotificationSettings {
            account_id: row.get(0)?,
            notify_on_fail: row.get::<i64>(1)? != 0,
            channels: serde_json::from_str(&channels)?,
            credentials: serde_json::from_str(&credentials)?,
            legacy_telegram_chat_id: row.get(4)?,
        }))
    }

    async fn save_notification_settings(
        &self,
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO notification_settings
                (account_id, notify_on_fail, channels, credentials, telegram_chat_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(account_id) DO UPDATE SET
                notify_on_fail = ?2, channels = ?3, credentials = ?4,
                telegram_chat_id = ?5, updated_at = ?6",
            params![
                settings.account_id,
                if settings.notify_on_fail { 1 } else { 0 },
                serde_json::to_string(&settings.channels)?,
                serde_json::to_string(&settings.credentials)?,
                settings.legacy_telegram_chat_id.clone(),
                timestamp_to_i64(now)
            ],
        )
        .await?;
        Ok(())
    }
}
