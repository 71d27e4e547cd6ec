//! Job queue: at-least-once delivery with delay and dedup.
//!
//! Producers use the four enqueue variants; the worker pool uses
//! `reserve` and then exactly one of `complete`, `retry` or `kill` per
//! reservation.

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

use crate::error::Result;
use crate::model::job::{Job, JobId, QueuedJob};
use async_trait::async_trait;
use std::time::Duration;

/// A submission, before the queue has accepted it.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job: Job,
    pub dedup_key: Option<String>,
    pub delay: Duration,
}

impl NewJob {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            dedup_key: None,
            delay: Duration::ZERO,
        }
    }

    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Accepted as a new job.
    Enqueued(JobId),
    /// A pending job already holds the dedup key; the submission was dropped.
    Duplicate { existing: JobId },
}

impl EnqueueResult {
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueResult::Enqueued(id) => *id,
            EnqueueResult::Duplicate { existing } => *existing,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueResult::Duplicate { .. })
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Accept a job. Errors only when the backing store is unreachable.
    async fn submit(&self, new: NewJob) -> Result<EnqueueResult>;

    /// Take the next eligible job, if any. Reservation releases the job's
    /// dedup key.
    async fn reserve(&self) -> Result<Option<QueuedJob>>;

    async fn complete(&self, job: &QueuedJob) -> Result<()>;

    /// Put a failed job back, eligible again after `delay`.
    async fn retry(&self, job: &QueuedJob, delay: Duration, error: &str) -> Result<()>;

    /// Dead-letter a job.
    async fn kill(&self, job: &QueuedJob, error: &str) -> Result<()>;

    /// Pending plus scheduled jobs.
    async fn len(&self) -> Result<usize>;

    async fn enqueue(&self, job: Job) -> Result<EnqueueResult> {
        self.submit(NewJob::new(job)).await
    }

    async fn enqueue_unique(&self, job: Job, dedup_key: &str) -> Result<EnqueueResult> {
        self.submit(NewJob::new(job).dedup_key(dedup_key)).await
    }

    async fn enqueue_in(&self, job: Job, delay: Duration) -> Result<EnqueueResult> {
        self.submit(NewJob::new(job).delay(delay)).await
    }

    async fn enqueue_unique_in(
        &self,
        job: Job,
        dedup_key: &str,
        delay: Duration,
    ) -> Result<EnqueueResult> {
        self.submit(NewJob::new(job).dedup_key(dedup_key).delay(delay))
            .await
    }
}

/// Exponential backoff with a cap, applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next run, given how many attempts have been made.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
