//! In-process job queue.
//!
//! Same contract as the Postgres queue minus durability: a crash loses
//! everything, so there is no visibility timeout to redeliver from. Delays
//! are measured on `tokio::time::Instant`.

use super::{EnqueueResult, JobQueue, NewJob};
use crate::error::{Error, Result};
use crate::model::job::{Job, JobId, QueuedJob};
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Pending {
    id: JobId,
    seq: u64,
    job: Job,
    dedup_key: Option<String>,
    ready_at: Instant,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
}

/// A job that ran out of chances.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: JobId,
    pub job: Job,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Default)]
struct Inner {
    seq: u64,
    pending: Vec<Pending>,
    running: HashMap<JobId, Pending>,
    dedup: HashMap<String, JobId>,
    dead: Vec<DeadLetter>,
    completed: u64,
}

#[derive(Debug)]
pub struct MemoryJobQueue {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs that were dead-lettered, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().map(|i| i.dead.clone()).unwrap_or_default()
    }

    /// Jobs completed so far.
    pub fn completed(&self) -> u64 {
        self.lock().map(|i| i.completed).unwrap_or(0)
    }

    /// Jobs currently reserved by a worker.
    pub fn in_flight(&self) -> usize {
        self.lock().map(|i| i.running.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("job queue lock poisoned".to_string()))
    }

    fn count(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }

    fn take_running(inner: &mut Inner, id: JobId) -> Result<Pending> {
        inner.running.remove(&id).ok_or_else(|| Error::InvalidTransition {
            from: "not running".to_string(),
            to: "resolved".to_string(),
        })
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn submit(&self, new: NewJob) -> Result<EnqueueResult> {
        let name = new.job.name();
        let result = {
            let mut inner = self.lock()?;
            match new
                .dedup_key
                .as_ref()
                .and_then(|key| inner.dedup.get(key).copied())
            {
                Some(existing) => EnqueueResult::Duplicate { existing },
                None => {
                    let id = JobId::new();
                    inner.seq += 1;
                    let seq = inner.seq;
                    if let Some(key) = &new.dedup_key {
                        inner.dedup.insert(key.clone(), id);
                    }
                    inner.pending.push(Pending {
                        id,
                        seq,
                        job: new.job,
                        dedup_key: new.dedup_key,
                        ready_at: Instant::now() + new.delay,
                        attempts: 0,
                        enqueued_at: Utc::now(),
                    });
                    EnqueueResult::Enqueued(id)
                }
            }
        };

        self.count("send");
        metrics::jobs_enqueued().add(
            1,
            &[
                KeyValue::new("job", name),
                KeyValue::new(
                    "result",
                    if result.is_duplicate() { "duplicate" } else { "ok" },
                ),
            ],
        );
        Ok(result)
    }

    async fn reserve(&self) -> Result<Option<QueuedJob>> {
        let reserved = {
            let mut inner = self.lock()?;
            let now = Instant::now();
            let next = inner
                .pending
                .iter()
                .enumerate()
                .filter(|(_, p)| p.ready_at <= now)
                .min_by_key(|(_, p)| (p.ready_at, p.seq))
                .map(|(idx, _)| idx);

            next.map(|idx| {
                let mut pending = inner.pending.swap_remove(idx);
                if let Some(key) = &pending.dedup_key {
                    inner.dedup.remove(key);
                }
                pending.attempts += 1;
                let queued = QueuedJob {
                    id: pending.id,
                    job: pending.job.clone(),
                    attempts: pending.attempts,
                    dedup_key: pending.dedup_key.take(),
                    enqueued_at: pending.enqueued_at,
                    receipt: None,
                };
                inner.running.insert(pending.id, pending);
                queued
            })
        };

        self.count(if reserved.is_some() { "read" } else { "read_empty" });
        Ok(reserved)
    }

    async fn complete(&self, job: &QueuedJob) -> Result<()> {
        let mut inner = self.lock()?;
        Self::take_running(&mut inner, job.id)?;
        inner.completed += 1;
        Ok(())
    }

    async fn retry(&self, job: &QueuedJob, delay: Duration, _error: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let mut pending = Self::take_running(&mut inner, job.id)?;
        pending.ready_at = Instant::now() + delay;
        inner.pending.push(pending);
        Ok(())
    }

    async fn kill(&self, job: &QueuedJob, error: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let pending = Self::take_running(&mut inner, job.id)?;
        inner.dead.push(DeadLetter {
            id: pending.id,
            job: pending.job,
            attempts: pending.attempts,
            error: error.to_string(),
        });
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.lock()?.pending.len())
    }
}
