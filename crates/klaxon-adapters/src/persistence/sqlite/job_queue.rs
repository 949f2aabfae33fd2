use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use klaxon_ports::error::PortError;
use klaxon_ports::outbound::JobQueue;
use klaxon_ports::types::{Backoff, JobPayload, JobSpec, JobState, QueueName, QueuedJob};

use super::{decode, encode, SqliteDb};

type JobRow = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    Option<i64>,
);

const JOB_COLUMNS: &str = "id, key, payload, state, priority, run_at, attempts, max_attempts, \
                           backoff_secs, last_error, locked_until";

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, PortError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PortError::Persistence(format!("invalid job timestamp {ms}")))
}

fn job_from_row(row: JobRow) -> Result<QueuedJob, PortError> {
    let (
        id,
        key,
        payload,
        state,
        priority,
        run_at,
        attempts,
        max_attempts,
        backoff_secs,
        last_error,
        locked_until,
    ) = row;
    let state = JobState::parse(&state)
        .ok_or_else(|| PortError::Persistence(format!("unknown job state {state}")))?;
    Ok(QueuedJob {
        id,
        key,
        payload: decode::<JobPayload>(&payload)?,
        state,
        priority: priority as u8,
        run_at: millis_to_utc(run_at)?,
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
        backoff: Backoff::exponential(backoff_secs as u64),
        last_error,
        locked_until: locked_until.map(millis_to_utc).transpose()?,
    })
}

#[async_trait]
impl JobQueue for SqliteDb {
    async fn enqueue(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<String, PortError> {
        let id = Uuid::new_v4().to_string();
        let payload = encode(&spec.payload)?;
        let run_at = (now + spec.delay).timestamp_millis();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        sqlx::query(
            "UPDATE jobs SET state = 'canceled'
             WHERE key = ? AND state IN ('scheduled', 'active')",
        )
        .bind(&spec.key)
        .execute(&mut *tx)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        sqlx::query(
            "INSERT INTO jobs (id, key, queue, payload, state, priority, run_at,
                               attempts, max_attempts, backoff_secs)
             VALUES (?, ?, ?, ?, 'scheduled', ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(&spec.key)
        .bind(spec.payload.queue().as_str())
        .bind(&payload)
        .bind(spec.priority as i64)
        .bind(run_at)
        .bind(spec.max_attempts as i64)
        .bind(spec.backoff.base_secs as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(id)
    }

    async fn cancel(&self, key: &str) -> Result<bool, PortError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'canceled'
             WHERE key = ? AND state IN ('scheduled', 'active')",
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_prefix(&self, prefix: &str) -> Result<u64, PortError> {
        // substr instead of LIKE so '_' and '%' in keys stay literal.
        let result = sqlx::query(
            "UPDATE jobs SET state = 'canceled'
             WHERE substr(key, 1, length(?)) = ? AND state IN ('scheduled', 'active')",
        )
        .bind(prefix)
        .bind(prefix)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn state(&self, key: &str) -> Result<Option<JobState>, PortError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM jobs WHERE key = ? ORDER BY rowid DESC LIMIT 1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(row.and_then(|(state,)| JobState::parse(&state)))
    }

    async fn claim_due(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<QueuedJob>, PortError> {
        let now_ms = now.timestamp_millis();

        // A lapsed lease with no attempts left would be retried forever.
        let exhausted = sqlx::query(
            "UPDATE jobs SET state = 'failed', locked_until = NULL,
                             last_error = COALESCE(last_error, 'lease expired')
             WHERE queue = ? AND state = 'active' AND COALESCE(locked_until, 0) <= ?
               AND attempts >= max_attempts",
        )
        .bind(queue.as_str())
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;
        if exhausted.rows_affected() > 0 {
            warn!(
                queue = queue.as_str(),
                jobs = exhausted.rows_affected(),
                "jobs failed after their last lease expired"
            );
        }

        // One statement, so two workers never claim the same job.
        let sql = format!(
            "UPDATE jobs SET state = 'active', attempts = attempts + 1, locked_until = ?
             WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = ? AND (
                    (state = 'scheduled' AND run_at <= ?)
                    OR (state = 'active' AND COALESCE(locked_until, 0) <= ?)
                )
                ORDER BY priority, run_at
                LIMIT ?
             )
             RETURNING {JOB_COLUMNS}"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind((now + lease).timestamp_millis())
            .bind(queue.as_str())
            .bind(now_ms)
            .bind(now_ms)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        let mut jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|j| (j.priority, j.run_at));
        Ok(jobs)
    }

    async fn complete(&self, job_id: &str) -> Result<(), PortError> {
        sqlx::query(
            "UPDATE jobs SET state = 'completed', locked_until = NULL
             WHERE id = ? AND state = 'active'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobState, PortError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND state = 'active'");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        let Some(job) = row.map(job_from_row).transpose()? else {
            return Ok(JobState::Canceled);
        };

        let (next, run_at) = if job.attempts >= job.max_attempts {
            (JobState::Failed, job.run_at)
        } else {
            (JobState::Scheduled, now + job.backoff.delay_for(job.attempts))
        };

        let result = sqlx::query(
            "UPDATE jobs SET state = ?, run_at = ?, last_error = ?, locked_until = NULL
             WHERE id = ? AND state = 'active'",
        )
        .bind(next.as_str())
        .bind(run_at.timestamp_millis())
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(JobState::Canceled);
        }
        Ok(next)
    }
}
