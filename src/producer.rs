//! Producer-side helpers: what the publish-task integration calls while a
//! task runs and when it finishes.

use crate::config::PipelineSettings;
use crate::error::Result;
use crate::model::chunk::{ChunkPayload, TaskId};
use crate::model::job::Job;
use crate::queue::{EnqueueResult, JobQueue};
use chrono::Utc;
use tracing::info;

/// Queue one chunk for ingestion, staggered by the configured throttle.
pub async fn publish_chunk(
    queue: &dyn JobQueue,
    settings: &PipelineSettings,
    task_id: &TaskId,
    chunk: ChunkPayload,
) -> Result<EnqueueResult> {
    let job = Job::StoreChunk {
        task_id: task_id.clone(),
        log_chunk: chunk,
    };
    job.validate()?;
    if settings.chunk_throttle.is_zero() {
        queue.enqueue(job).await
    } else {
        queue.enqueue_in(job, settings.chunk_throttle).await
    }
}

/// Dedup key for a task's archival job.
pub fn archive_dedup_key(task_id: &TaskId) -> String {
    format!("archive:{task_id}")
}

/// Signal that a task has finished after emitting `chunk_count` chunks.
///
/// Schedules archival after the configured delay. Repeated completion
/// signals collapse into the pending archival job.
pub async fn finish_task(
    queue: &dyn JobQueue,
    settings: &PipelineSettings,
    task_id: &TaskId,
    aws_path: &str,
    chunk_count: u32,
) -> Result<EnqueueResult> {
    let job = Job::StoreLog {
        task_id: task_id.clone(),
        aws_path: aws_path.to_string(),
        number_of_log_chunks: chunk_count,
        completed_at: Some(Utc::now()),
    };
    job.validate()?;

    let result = queue
        .enqueue_unique_in(job, &archive_dedup_key(task_id), settings.archive_delay)
        .await?;
    info!(
        task_id = %task_id,
        aws_path,
        chunk_count,
        delay_secs = settings.archive_delay.as_secs(),
        duplicate = result.is_duplicate(),
        "archival scheduled"
    );
    Ok(result)
}

/// Queue a copy of an uploaded file into another app version.
pub async fn copy_uploadable(
    queue: &dyn JobQueue,
    app_slug: &str,
    from_version_id: &str,
    to_version_id: &str,
    resource_id: &str,
    extension: &str,
) -> Result<EnqueueResult> {
    let job = Job::CopyUploadable {
        app_slug: app_slug.to_string(),
        from_version_id: from_version_id.to_string(),
        to_version_id: to_version_id.to_string(),
        resource_id: resource_id.to_string(),
        extension: extension.to_string(),
    };
    job.validate()?;
    let key = format!("copy:{app_slug}/{to_version_id}/{resource_id}");
    queue.enqueue_unique(job, &key).await
}
