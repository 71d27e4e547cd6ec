//! Chunk ingestion: `store_chunk_to_redis`.
//!
//! Writes one chunk under `(task, position)` and advances the task's
//! ChunkCounter. The position is the producer's when it sent one, otherwise
//! it is allocated from the task's atomic sequence. A task uses one mode
//! for all of its chunks.

use super::JobHandler;
use crate::cache::keys;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::model::chunk::{ChunkPayload, LogChunk, TaskId};
use crate::model::job::{Job, JobId, QueuedJob};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::debug;

pub struct IngestChunk;

/// What an ingestion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingested {
    pub position: u32,
    /// False when the chunk was already stored by an earlier run.
    pub written: bool,
}

#[async_trait]
impl JobHandler for IngestChunk {
    async fn handle(&self, ctx: &Context, job: &QueuedJob) -> Result<()> {
        job.job.validate()?;
        let Job::StoreChunk { task_id, log_chunk } = &job.job else {
            return Err(Error::Malformed(format!(
                "{} routed to chunk ingestion",
                job.job.name()
            )));
        };
        ingest_chunk(ctx, &job.id, task_id, log_chunk).await?;
        Ok(())
    }
}

/// Store one chunk for a task.
///
/// Re-running with the same `job_id` lands on the same position and leaves
/// the counter alone.
pub async fn ingest_chunk(
    ctx: &Context,
    job_id: &JobId,
    task_id: &TaskId,
    payload: &ChunkPayload,
) -> Result<Ingested> {
    let ttl = ctx.settings.chunk_ttl;

    let (position, mode) = match payload.position {
        Some(0) => {
            return Err(Error::Validation("chunk positions start at 1".to_string()));
        }
        Some(position) => (position, "assigned"),
        None => (allocate_position(ctx, job_id, task_id).await?, "counter"),
    };

    let chunk = LogChunk::new(task_id.clone(), position, payload.content.as_str());
    let key = keys::chunk_key(task_id, position);
    let written = ctx.store.set_if_absent(&key, &chunk.encode()?, ttl).await?;

    if written {
        let stored = ctx
            .store
            .increment_and_get(&keys::counter_key(task_id), ttl)
            .await?;
        metrics::chunks_stored().add(1, &[KeyValue::new("mode", mode)]);
        debug!(task_id = %task_id, position, stored, mode, "chunk stored");
    } else {
        // Chunks are immutable. The same content again is a redelivery;
        // different content is two producers claiming one position.
        let existing = ctx.store.get(&key).await?;
        let same = existing
            .as_deref()
            .map(LogChunk::decode)
            .transpose()?
            .is_some_and(|c| c.content == payload.content);
        if !same {
            return Err(Error::Validation(format!(
                "position {position} of task {task_id} already holds different content"
            )));
        }
        debug!(task_id = %task_id, position, "chunk already stored");
    }

    Ok(Ingested { position, written })
}

/// Allocate the next position for a chunk that arrived without one,
/// reusing the job's earlier allocation if it has run before.
async fn allocate_position(ctx: &Context, job_id: &JobId, task_id: &TaskId) -> Result<u32> {
    let next = ctx
        .store
        .claim_position(
            &keys::claim_key(task_id, job_id),
            &keys::sequence_key(task_id),
            ctx.settings.chunk_ttl,
        )
        .await?;
    u32::try_from(next)
        .map_err(|_| Error::Other(format!("position {next} out of range for task {task_id}")))
}
