//! Job rows: submit with dedup, reserve, and retire.
//!
//! The `jobs` table is the record of truth; pgmq only carries
//! `{"job_id": ...}` messages that tell a worker which row to run. Delay is
//! pgmq's send delay, at-least-once redelivery is pgmq's visibility timeout.

use crate::error::{Error, Result};
use crate::model::job::{Job, JobId, JobRecord, JobState, QueuedJob};
use crate::queue::EnqueueResult;
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use super::pgmq;

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: JobState, to: JobState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn delay_seconds(delay: Duration) -> i32 {
    // pgmq delays are whole seconds; round up so a job never runs early
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

impl super::Db {
    /// Insert a job row and dispatch it through pgmq, in one transaction.
    ///
    /// With a dedup key, a pending job holding the same key wins and the new
    /// submission is dropped.
    pub async fn submit_job(
        &self,
        queue: &str,
        job: &Job,
        dedup_key: Option<&str>,
        delay: Duration,
    ) -> Result<EnqueueResult> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let run_at = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let payload = job.to_value()?;

        if let Some(dedup_key) = dedup_key {
            // The unique partial index on (queue, dedup_key) covers only
            // queued rows, so a running job never blocks a new submission.
            // The holder can be reserved between the conflicting insert and
            // the lookup; then the key is free and the insert is tried again.
            let mut attempt = 0;
            loop {
                attempt += 1;
                let inserted: Option<(Uuid,)> = sqlx::query_as(
                    "INSERT INTO jobs (id, queue, job_name, dedup_key, payload, state, run_at, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7, $7)
                     ON CONFLICT (queue, dedup_key) WHERE dedup_key IS NOT NULL AND state = 'queued'
                     DO NOTHING
                     RETURNING id",
                )
                .bind(id)
                .bind(queue)
                .bind(job.name())
                .bind(dedup_key)
                .bind(&payload)
                .bind(run_at)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?;
                if inserted.is_some() {
                    break;
                }

                let existing: Option<(Uuid,)> = sqlx::query_as(
                    "SELECT id FROM jobs
                     WHERE queue = $1 AND dedup_key = $2 AND state = 'queued'
                     LIMIT 1",
                )
                .bind(queue)
                .bind(dedup_key)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some((existing,)) = existing {
                    tx.commit().await?;
                    metrics::jobs_enqueued().add(
                        1,
                        &[
                            KeyValue::new("job", job.name()),
                            KeyValue::new("result", "duplicate"),
                        ],
                    );
                    return Ok(EnqueueResult::Duplicate {
                        existing: JobId(existing),
                    });
                }

                if attempt == 2 {
                    warn!(queue, dedup_key, "dedup holder kept changing, giving up");
                    return Err(Error::Unavailable(format!(
                        "dedup key {dedup_key} contended in {queue}"
                    )));
                }
            }
        } else {
            sqlx::query(
                "INSERT INTO jobs (id, queue, job_name, dedup_key, payload, state, run_at, created_at, updated_at)
                 VALUES ($1, $2, $3, NULL, $4, 'queued', $5, $6, $6)",
            )
            .bind(id)
            .bind(queue)
            .bind(job.name())
            .bind(&payload)
            .bind(run_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let msg = serde_json::json!({ "job_id": id });
        let msg_id = pgmq::send(&mut *tx, queue, &msg, delay_seconds(delay)).await?;

        sqlx::query("UPDATE jobs SET pgmq_msg_id = $1 WHERE id = $2")
            .bind(msg_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::jobs_enqueued().add(
            1,
            &[
                KeyValue::new("job", job.name()),
                KeyValue::new("result", "ok"),
            ],
        );
        Ok(EnqueueResult::Enqueued(JobId(id)))
    }

    /// Reserve the next runnable job.
    ///
    /// Messages pointing at missing or finished rows are archived and
    /// skipped. Rows whose payload no longer decodes are dead-lettered:
    /// malformed input is never retried.
    pub async fn reserve_job(&self, queue: &str, vt_seconds: i32) -> Result<Option<QueuedJob>> {
        loop {
            let Some(msg) = self.read_from_queue(queue, vt_seconds).await? else {
                return Ok(None);
            };

            let Some(job_id) = msg
                .message
                .get("job_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                error!(msg_id = msg.msg_id, "bad pgmq payload: missing job_id, archiving");
                self.archive_message(queue, msg.msg_id).await?;
                continue;
            };

            let mut tx = self.pool.begin().await?;
            let row: Option<(String, serde_json::Value, Option<String>, i32, DateTime<Utc>)> =
                sqlx::query_as(
                    "SELECT state, payload, dedup_key, attempts, created_at
                     FROM jobs WHERE id = $1 FOR UPDATE",
                )
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;

            let Some((state, payload, dedup_key, attempts, created_at)) = row else {
                tx.commit().await?;
                warn!(%job_id, "message for unknown job, archiving");
                self.archive_message(queue, msg.msg_id).await?;
                continue;
            };

            let state: JobState = state.parse()?;
            if state.is_terminal() {
                tx.commit().await?;
                self.archive_message(queue, msg.msg_id).await?;
                continue;
            }
            // Running here means a previous reservation's visibility
            // timeout lapsed: the worker died or overran. Run it again.
            if state == JobState::Running {
                warn!(%job_id, read_ct = msg.read_ct, "visibility timeout lapsed, redelivering");
            } else {
                validate_transition(state, JobState::Running)?;
            }

            let job = match Job::from_value(payload) {
                Ok(job) => job,
                Err(e) => {
                    validate_transition(JobState::Queued, JobState::Dead)?;
                    sqlx::query(
                        "UPDATE jobs SET state = 'dead', last_error = $1, updated_at = now(), resolved_at = now()
                         WHERE id = $2",
                    )
                    .bind(e.to_string())
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
                    pgmq::archive(&mut *tx, queue, msg.msg_id).await?;
                    tx.commit().await?;
                    error!(%job_id, error = %e, "undecodable job payload, dead-lettered");
                    continue;
                }
            };

            // Reserving releases the dedup key.
            sqlx::query(
                "UPDATE jobs SET state = 'running', attempts = attempts + 1, dedup_key = NULL,
                        pgmq_msg_id = $1, updated_at = now()
                 WHERE id = $2",
            )
            .bind(msg.msg_id)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(Some(QueuedJob {
                id: JobId(job_id),
                job,
                attempts: (attempts + 1) as u32,
                dedup_key,
                enqueued_at: created_at,
                receipt: Some(msg.msg_id),
            }));
        }
    }

    /// Running → Completed.
    pub async fn complete_job(&self, queue: &str, job: &QueuedJob) -> Result<()> {
        validate_transition(JobState::Running, JobState::Completed)?;
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "UPDATE jobs SET state = 'completed', last_error = NULL, updated_at = now(), resolved_at = now()
             WHERE id = $1 AND state = 'running'",
        )
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(Error::InvalidTransition {
                from: "running".to_string(),
                to: "completed".to_string(),
            });
        }
        if let Some(msg_id) = job.receipt {
            pgmq::archive(&mut *tx, queue, msg_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Running → Failed → Queued, redispatched after `delay`.
    pub async fn retry_job(
        &self,
        queue: &str,
        job: &QueuedJob,
        delay: Duration,
        error: &str,
    ) -> Result<()> {
        validate_transition(JobState::Running, JobState::Failed)?;
        validate_transition(JobState::Failed, JobState::Queued)?;

        let mut tx = self.pool.begin().await?;
        let run_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let msg = serde_json::json!({ "job_id": job.id.0 });
        let msg_id = pgmq::send(&mut *tx, queue, &msg, delay_seconds(delay)).await?;

        let rows = sqlx::query(
            "UPDATE jobs SET state = 'queued', last_error = $1, run_at = $2, pgmq_msg_id = $3, updated_at = now()
             WHERE id = $4 AND state = 'running'",
        )
        .bind(error)
        .bind(run_at)
        .bind(msg_id)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(Error::InvalidTransition {
                from: "running".to_string(),
                to: "queued".to_string(),
            });
        }
        if let Some(old) = job.receipt {
            pgmq::archive(&mut *tx, queue, old).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Running → Dead.
    pub async fn kill_job(&self, queue: &str, job: &QueuedJob, error: &str) -> Result<()> {
        validate_transition(JobState::Running, JobState::Dead)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE jobs SET state = 'dead', last_error = $1, updated_at = now(), resolved_at = now()
             WHERE id = $2 AND state = 'running'",
        )
        .bind(error)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?;
        if let Some(msg_id) = job.receipt {
            pgmq::archive(&mut *tx, queue, msg_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Count queued jobs (immediate and delayed).
    pub async fn pending_jobs(&self, queue: &str) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT count(*) FROM jobs WHERE queue = $1 AND state = 'queued'")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<JobRecord> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, queue, job_name, dedup_key, payload, state, attempts, last_error, run_at, created_at, updated_at, resolved_at
             FROM jobs WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
            .try_into_record()
    }

    /// List jobs, newest first.
    pub async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: i64,
    ) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, queue, job_name, dedup_key, payload, state, attempts, last_error, run_at, created_at, updated_at, resolved_at
             FROM jobs
             WHERE queue = $1 AND ($2::text IS NULL OR state = $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(queue)
        .bind(state.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::try_into_record).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    job_name: String,
    dedup_key: Option<String>,
    payload: serde_json::Value,
    state: String,
    attempts: i32,
    last_error: Option<String>,
    run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn try_into_record(self) -> Result<JobRecord> {
        Ok(JobRecord {
            id: JobId(self.id),
            queue: self.queue,
            job_name: self.job_name,
            dedup_key: self.dedup_key,
            payload: self.payload,
            state: self.state.parse()?,
            attempts: self.attempts as u32,
            last_error: self.last_error,
            run_at: self.run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            resolved_at: self.resolved_at,
        })
    }
}
