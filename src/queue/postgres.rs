//! Durable job queue on Postgres + pgmq.

use super::{EnqueueResult, JobQueue, NewJob};
use crate::db::Db;
use crate::error::Result;
use crate::model::job::QueuedJob;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct PgJobQueue {
    db: Arc<Db>,
    queue: String,
    /// Seconds a reserved job stays invisible. Must exceed the longest
    /// handler run, or the job is delivered twice.
    visibility_timeout: i32,
}

impl PgJobQueue {
    pub fn new(db: Arc<Db>, queue: impl Into<String>) -> Self {
        Self {
            db,
            queue: queue.into(),
            visibility_timeout: 300,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX).max(1);
        self
    }

    /// Create the backing pgmq queue (idempotent).
    pub async fn create(&self) -> Result<()> {
        self.db.create_queue(&self.queue).await
    }

    pub fn name(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn submit(&self, new: NewJob) -> Result<EnqueueResult> {
        self.db
            .submit_job(&self.queue, &new.job, new.dedup_key.as_deref(), new.delay)
            .await
    }

    async fn reserve(&self) -> Result<Option<QueuedJob>> {
        self.db
            .reserve_job(&self.queue, self.visibility_timeout)
            .await
    }

    async fn complete(&self, job: &QueuedJob) -> Result<()> {
        self.db.complete_job(&self.queue, job).await
    }

    async fn retry(&self, job: &QueuedJob, delay: Duration, error: &str) -> Result<()> {
        self.db.retry_job(&self.queue, job, delay, error).await
    }

    async fn kill(&self, job: &QueuedJob, error: &str) -> Result<()> {
        self.db.kill_job(&self.queue, job, error).await
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.db.pending_jobs(&self.queue).await? as usize)
    }
}
