use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use super::{DatabaseImpl, NotificationLogRepository, StoreError, parse_column};
use crate::database::models::{
    NewNotificationLog, NotificationLog, i64_to_timestamp, timestamp_to_i64,
};

#[async_trait]
impl NotificationLogRepository for DatabaseImpl {
    async fn append_notification_log(&self, entry: &NewNotificationLog) -> Result<i64, StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO notification_logs
                (account_id, domain_id, channel, status, message, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.account_id,
                entry.domain_id,
                entry.channel.clone(),
                entry.status.as_str(),
                entry.message.clone(),
                serde_json::to_string(&entry.metadata)?,
                timestamp_to_i64(entry.created_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn notification_logs(
        &self,
        account_id: i64,
        limit: usize,
    ) -> Result<Vec<NotificationLog>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, account_id, domain_id, channel, status, message, metadata, created_at
                 FROM notification_logs WHERE account_id = ?
                 ORDER BY id ASC LIMIT ?",
                params![account_id, limit as i64],
            )
            .await?;

        let mut logs = Vec::new();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(4)?;
            let metadata: String = row.get(6)?;
            logs.push(NotificationLog {
                id: row.get(0)?,
                account_id: row.get(1)?,
                domain_id: row.get(2)?,
                channel: row.get(3)?,
                status: parse_column(&status)?,
                message: row.get(5)?,
                metadata: serde_json::from_str(&metadata)?,
                created_at: i64_to_timestamp(row.get(7)?),
            });
        }
        Ok(logs)
    }

    async fn prune_notification_logs(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM notification_logs WHERE created_at < ?",
                params![timestamp_to_i64(before)],
            )
            .await?;
        Ok(deleted)
    }
}
