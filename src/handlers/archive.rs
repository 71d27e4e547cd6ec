//! Archival: `store_log_to_aws`.
//!
//! Reads positions `1..=N` in order, concatenates them, writes the result
//! to blob storage in one put, then clears the task's ephemeral keys. The
//! ephemeral keys outlive any failed write, so a retry starts from the same
//! chunks.

use super::JobHandler;
use crate::cache::keys;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::model::chunk::{LogChunk, TaskId};
use crate::model::job::{Job, QueuedJob};
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct ArchiveLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archived {
    /// The log was written with this many bytes.
    Written { bytes: usize },
    /// An earlier run already wrote it and cleaned up.
    AlreadyArchived,
}

#[async_trait]
impl JobHandler for ArchiveLog {
    async fn handle(&self, ctx: &Context, job: &QueuedJob) -> Result<()> {
        job.job.validate()?;
        let Job::StoreLog {
            task_id,
            aws_path,
            number_of_log_chunks,
            completed_at,
        } = &job.job
        else {
            return Err(Error::Malformed(format!(
                "{} routed to log archival",
                job.job.name()
            )));
        };
        let completed_at = completed_at.unwrap_or(job.enqueued_at);
        archive_log(ctx, task_id, aws_path, *number_of_log_chunks, Some(completed_at)).await?;
        Ok(())
    }
}

/// Assemble and persist a finished task's log.
pub async fn archive_log(
    ctx: &Context,
    task_id: &TaskId,
    aws_path: &str,
    expected: u32,
    completed_at: Option<DateTime<Utc>>,
) -> Result<Archived> {
    let start = Instant::now();

    let stored = ctx.store.get_counter(&keys::counter_key(task_id)).await?;
    if stored > i64::from(expected) {
        warn!(
            task_id = %task_id,
            stored,
            expected,
            "more chunks stored than the task reported, extras are not archived"
        );
    }

    let mut body = String::new();
    for position in 1..=expected {
        let key = keys::chunk_key(task_id, position);
        let Some(raw) = ctx.store.get(&key).await? else {
            if ctx.blobs.exists(aws_path).await? {
                info!(task_id = %task_id, aws_path, "log already archived");
                return Ok(Archived::AlreadyArchived);
            }
            return Err(missing_chunk(ctx, task_id, position, completed_at));
        };

        let chunk = LogChunk::decode(&raw)?;
        if chunk.position != position || chunk.task_id != *task_id {
            return Err(Error::OrderingViolation {
                task_id: task_id.to_string(),
                expected: position,
                found: chunk.position,
            });
        }
        body.push_str(&chunk.content);
    }

    let bytes = body.len();
    ctx.blobs.put(aws_path, body.into_bytes()).await?;

    metrics::archive_bytes().record(bytes as u64, &[]);
    metrics::operation_duration_ms().record(
        start.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", "archive.write")],
    );
    info!(task_id = %task_id, aws_path, chunks = expected, bytes, "log archived");

    // Only after the durable write: dropping the keys is hygiene, not
    // correctness, so a failure here does not fail the job.
    match ctx.store.delete(&keys::task_keys(task_id, expected)).await {
        Ok(removed) => info!(task_id = %task_id, removed, "ephemeral keys cleared"),
        Err(e) => warn!(task_id = %task_id, "ephemeral cleanup failed: {e}"),
    }

    Ok(Archived::Written { bytes })
}

/// When the task behind an archival job finished: the producer's stamp,
/// or the enqueue time for jobs that carry none.
pub fn completion_time(job: &QueuedJob) -> Option<DateTime<Utc>> {
    match &job.job {
        Job::StoreLog { completed_at, .. } => Some(completed_at.unwrap_or(job.enqueued_at)),
        _ => None,
    }
}

/// The error for a chunk that can no longer arrive, or `None` while the TTL
/// since completion has not run out. A zero TTL never expires.
pub fn expiry(
    ttl: std::time::Duration,
    task_id: &str,
    position: u32,
    completed_at: DateTime<Utc>,
) -> Option<Error> {
    if ttl.is_zero() {
        return None;
    }
    let elapsed = Utc::now() - completed_at;
    let limit = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    if elapsed <= limit {
        return None;
    }
    metrics::archive_expired().add(1, &[]);
    error!(
        task_id,
        position,
        elapsed_secs = elapsed.num_seconds(),
        ttl_secs = ttl.as_secs(),
        alert = "chunk_ttl_expired",
        "chunk expired before archival, log is unrecoverable"
    );
    Some(Error::ChunkExpired {
        task_id: task_id.to_string(),
        position,
        elapsed_secs: elapsed.num_seconds(),
    })
}

/// A missing chunk is late until the TTL has run out since completion;
/// after that it is gone and retrying cannot help.
fn missing_chunk(
    ctx: &Context,
    task_id: &TaskId,
    position: u32,
    completed_at: Option<DateTime<Utc>>,
) -> Error {
    if let Some(expired) = completed_at
        .and_then(|done| expiry(ctx.settings.chunk_ttl, task_id.as_str(), position, done))
    {
        return expired;
    }

    warn!(task_id = %task_id, position, "chunk not yet available");
    Error::MissingChunk {
        task_id: task_id.to_string(),
        position,
    }
}
