use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, TransactionBehavior, params};

use super::{DatabaseImpl, DomainRepository, DomainWrite, IncidentChange, StoreError, parse_column};
use crate::database::models::{
    Domain, DueDomain, Incident, SslState, i64_to_timestamp, optional_timestamp, timestamp_to_i64,
};

const DOMAIN_COLUMNS: &str = "id, account_id, name, campaign, status, status_since, last_checked_at, \
     last_up_at, last_down_at, down_notified_at, up_notified_at, ssl_valid, last_check_error, \
     history, queued_at, version, created_at";

const INCIDENT_COLUMNS: &str =
    "id, domain_id, status_before, status_after, message, opened_at, closed_at";

fn domain_from_row(row: &Row) -> Result<Domain, StoreError> {
    let status: String = row.get(4)?;
    let history: String = row.get(13)?;

    Ok(Domain {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        campaign: row.get(3)?,
        status: parse_column(&status)?,
        status_since: i64_to_timestamp(row.get(5)?),
        last_checked_at: optional_timestamp(row.get(6)?),
        last_up_at: optional_timestamp(row.get(7)?),
        last_down_at: optional_timestamp(row.get(8)?),
        down_notified_at: optional_timestamp(row.get(9)?),
        up_notified_at: optional_timestamp(row.get(10)?),
        ssl_valid: SslState::from_column(row.get(11)?),
        last_check_error: row.get(12)?,
        history: serde_json::from_str(&history)?,
        queued_at: optional_timestamp(row.get(14)?),
        version: row.get(15)?,
        created_at: i64_to_timestamp(row.get(16)?),
    })
}

fn incident_from_row(row: &Row) -> Result<Incident, StoreError> {
    let before: String = row.get(2)?;
    let after: String = row.get(3)?;

    Ok(Incident {
        id: row.get(0)?,
        domain_id: row.get(1)?,
        status_before: parse_column(&before)?,
        status_after: parse_column(&after)?,
        message: row.get(4)?,
        opened_at: i64_to_timestamp(row.get(5)?),
        closed_at: optional_timestamp(row.get(6)?),
    })
}

async fn fetch_domain(conn: &Connection, id: i64) -> Result<Option<Domain>, StoreError> {
    let mut rows = conn
        .query(&format!("SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = ?"), params![id])
        .await?;

    match rows.next().await? {
        Some(row) => Ok(Some(domain_from_row(&row)?)),
        None => Ok(None),
    }
}

async fn apply_incident_change(
    conn: &Connection,
    domain_id: i64,
    change: &IncidentChange,
) -> Result<(), StoreError> {
    match change {
        IncidentChange::Open { status_before, message, at } => {
            conn.execute(
                "INSERT INTO incidents (domain_id, status_before, status_after, message, opened_at)
                 SELECT ?1, ?2, 'down', ?3, ?4
                 WHERE NOT EXISTS (
                     SELECT 1 FROM incidents WHERE domain_id = ?1 AND closed_at IS NULL
                 )",
                params![domain_id, status_before.as_str(), message.clone(), timestamp_to_i64(*at)],
            )
            .await?;
        }
        IncidentChange::Close { at } => {
            let closed = conn
                .execute(
                    "UPDATE incidents SET closed_at = ?1, status_after = 'ok'
                     WHERE id = (
                         SELECT id FROM incidents
                         WHERE domain_id = ?2 AND closed_at IS NULL
                         ORDER BY opened_at DESC, id DESC LIMIT 1
                     )",
                    params![timestamp_to_i64(*at), domain_id],
                )
                .await?;
            if closed == 0 {
                tracing::debug!(domain_id, "recovery without an open incident");
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DomainRepository for DatabaseImpl {
    async fn register_domain(
        &self,
        account_id: i64,
        name: &str,
        campaign: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Domain, StoreError> {
        let conn = self.get_conn().await?;
        let created_at = timestamp_to_i64(now);

        conn.execute(
            "INSERT INTO domains (account_id, name, campaign, status, status_since, created_at)
             VALUES (?, ?, ?, 'pending', ?, ?)",
            params![account_id, name.to_string(), campaign.map(str::to_string), created_at, created_at],
        )
        .await?;

        let id = conn.last_insert_rowid();
        fetch_domain(&conn, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("domain {id} after insert")))
    }

    async fn get_domain(&self, id: i64) -> Result<Option<Domain>, StoreError> {
        let conn = self.get_conn().await?;
        fetch_domain(&conn, id).await
    }

    async fn delete_domain(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM domains WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn list_account_domains(
        &self,
        account_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Domain>, StoreError> {
        let conn = self.get_conn().await?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOMAIN_COLUMNS} FROM domains WHERE account_id = ? ORDER BY id ASC LIMIT ?"
                ),
                params![account_id, limit],
            )
            .await?;

        let mut domains = Vec::new();
        while let Some(row) = rows.next().await? {
            domains.push(domain_from_row(&row)?);
        }
        Ok(domains)
    }

    async fn due_domains(&self, limit: usize) -> Result<Vec<DueDomain>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, campaign, account_id FROM domains
                 ORDER BY (last_checked_at IS NOT NULL) ASC, last_checked_at ASC, id ASC
                 LIMIT ?",
                params![limit as i64],
            )
            .await?;

        let mut due = Vec::new();
        while let Some(row) = rows.next().await? {
            due.push(DueDomain {
                id: row.get(0)?,
                name: row.get(1)?,
                campaign: row.get(2)?,
                account_id: row.get(3)?,
            });
        }
        Ok(due)
    }

    async fn mark_queued(&self, ids: &[i64], now: DateTime<Utc>) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        let queued_at = timestamp_to_i64(now);
        for id in ids {
            tx.execute(
                "UPDATE domains SET queued_at = ?, version = version + 1 WHERE id = ?",
                params![queued_at, *id],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_domain_state(&self, write: DomainWrite<'_>) -> Result<bool, StoreError> {
        let domain = write.domain;
        let history = serde_json::to_string(&domain.history)?;

        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        let updated = tx
            .execute(
                "UPDATE domains SET
                    status = ?, status_since = ?, last_checked_at = ?, last_up_at = ?,
                    last_down_at = ?, down_notified_at = ?, up_notified_at = ?, ssl_valid = ?,
                    last_check_error = ?, history = ?, queued_at = ?, version = version + 1
                 WHERE id = ? AND version = ?",
                params![
                    domain.status.as_str(),
                    timestamp_to_i64(domain.status_since),
                    domain.last_checked_at.map(timestamp_to_i64),
                    domain.last_up_at.map(timestamp_to_i64),
                    domain.last_down_at.map(timestamp_to_i64),
                    domain.down_notified_at.map(timestamp_to_i64),
                    domain.up_notified_at.map(timestamp_to_i64),
                    domain.ssl_valid.to_column(),
                    domain.last_check_error.clone(),
                    history,
                    domain.queued_at.map(timestamp_to_i64),
                    domain.id,
                    write.expected_version
                ],
            )
            .await?;

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(change) = &write.incident {
            apply_incident_change(&tx, domain.id, change).await?;
        }

        for job in &write.jobs {
            tx.execute(
                "INSERT INTO jobs (payload, available_at, created_at) VALUES (?, ?, ?)",
                params![
                    job.payload.clone(),
                    timestamp_to_i64(job.available_at),
                    timestamp_to_i64(Utc::now())
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn claim_down_notification(
        &self,
        id: i64,
        now: DateTime<Utc>,
        down_since_before: DateTime<Utc>,
    ) -> Result<Option<Domain>, StoreError> {
        let conn = self.get_conn().await?;
        let claimed = conn
            .execute(
                "UPDATE domains SET down_notified_at = ?, version = version + 1
                 WHERE id = ? AND status = 'down' AND down_notified_at IS NULL
                   AND status_since <= ?",
                params![timestamp_to_i64(now), id, timestamp_to_i64(down_since_before)],
            )
            .await?;

        if claimed == 0 {
            return Ok(None);
        }
        fetch_domain(&conn, id).await
    }

    async fn claim_up_notification(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Domain>, StoreError> {
        let conn = self.get_conn().await?;
        let claimed = conn
            .execute(
                "UPDATE domains SET up_notified_at = ?, version = version + 1
                 WHERE id = ? AND status = 'ok' AND up_notified_at IS NULL",
                params![timestamp_to_i64(now), id],
            )
            .await?;

        if claimed == 0 {
            return Ok(None);
        }
        fetch_domain(&conn, id).await
    }

    async fn open_incident(&self, domain_id: i64) -> Result<Option<Incident>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents
                     WHERE domain_id = ? AND closed_at IS NULL
                     ORDER BY opened_at DESC, id DESC LIMIT 1"
                ),
                params![domain_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(incident_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_incidents(&self, domain_id: i64) -> Result<Vec<Incident>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE domain_id = ? ORDER BY id ASC"
                ),
                params![domain_id],
            )
            .await?;

        let mut incidents = Vec::new();
        while let Some(row) = rows.next().await? {
            incidents.push(incident_from_row(&row)?);
        }
        Ok(incidents)
    }

    async fn prune_closed_incidents(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM incidents WHERE closed_at IS NOT NULL AND closed_at < ?",
                params![timestamp_to_i64(before)],
            )
            .await?;
        Ok(deleted)
    }
}
