use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, TransactionBehavior, params};

use super::{DatabaseImpl, JobRecord, JobRepository, NewJob, StoreError};
use crate::database::models::{i64_to_timestamp, optional_timestamp, timestamp_to_i64};

const JOB_COLUMNS: &str = "id, payload, attempts, available_at, last_error, failed_at";

fn job_from_row(row: &Row) -> Result<JobRecord, StoreError> {
    Ok(JobRecord {
        id: row.get(0)?,
        payload: row.get(1)?,
        attempts: row.get::<i64>(2)?.max(0) as u32,
        available_at: i64_to_timestamp(row.get(3)?),
        last_error: row.get(4)?,
        failed_at: optional_timestamp(row.get(5)?),
    })
}

#[async_trait]
impl JobRepository for DatabaseImpl {
    async fn enqueue_jobs(&self, jobs: &[NewJob], now: DateTime<Utc>) -> Result<(), StoreError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        let created_at = timestamp_to_i64(now);
        for job in jobs {
            tx.execute(
                "INSERT INTO jobs (payload, available_at, created_at) VALUES (?, ?, ?)",
                params![job.payload.clone(), timestamp_to_i64(job.available_at), created_at],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn claim_job(
        &self,
        worker: &str,
        now: DateTime<Utc>,
        reclaim_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE jobs SET reserved_at = ?1, reserved_by = ?2, attempts = attempts + 1
                     WHERE id = (
                         SELECT id FROM jobs
                         WHERE failed_at IS NULL AND available_at <= ?1
                           AND (reserved_at IS NULL OR reserved_at <= ?3)
                         ORDER BY available_at ASC, id ASC LIMIT 1
                     )
                     RETURNING {JOB_COLUMNS}"
                ),
                params![timestamp_to_i64(now), worker.to_string(), timestamp_to_i64(reclaim_before)],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(job_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn complete_job(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM jobs WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn release_job(
        &self,
        id: i64,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE jobs SET reserved_at = NULL, reserved_by = NULL, available_at = ?, last_error = ?
             WHERE id = ?",
            params![timestamp_to_i64(retry_at), error.to_string(), id],
        )
        .await?;
        Ok(())
    }

    async fn fail_job(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE jobs SET reserved_at = NULL, reserved_by = NULL, failed_at = ?, last_error = ?
             WHERE id = ?",
            params![timestamp_to_i64(now), error.to_string(), id],
        )
        .await?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY available_at ASC, id ASC"), ())
            .await?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await? {
            jobs.push(job_from_row(&row)?);
        }
        Ok(jobs)
    }

    async fn prune_failed_jobs(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM jobs WHERE failed_at IS NOT NULL AND failed_at < ?",
                params![timestamp_to_i64(before)],
            )
            .await?;
        Ok(deleted)
    }
}
