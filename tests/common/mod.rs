//! Shared fixtures: in-memory pipeline wiring and failing collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use chunklog::blob::{BlobStore, ObjectBlobStore};
use chunklog::cache::{EphemeralStore, MemoryEphemeralStore};
use chunklog::config::PipelineSettings;
use chunklog::context::Context;
use chunklog::error::{Error, Result};
use chunklog::model::job::{Job, JobId, QueuedJob};
use chunklog::queue::MemoryJobQueue;
use std::sync::Arc;
use std::time::Duration;

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        chunk_ttl: Duration::from_secs(3600),
        archive_delay: Duration::ZERO,
        ..PipelineSettings::default()
    }
}

/// A fully in-memory pipeline, with typed handles to each collaborator.
pub struct Harness {
    pub store: Arc<MemoryEphemeralStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub blobs: Arc<ObjectBlobStore>,
    pub ctx: Arc<Context>,
}

pub fn harness() -> Harness {
    harness_with(settings())
}

pub fn harness_with(settings: PipelineSettings) -> Harness {
    let store = Arc::new(MemoryEphemeralStore::new());
    let queue = Arc::new(MemoryJobQueue::new("test"));
    let blobs = Arc::new(ObjectBlobStore::in_memory());
    let ctx = Arc::new(Context::new(
        store.clone(),
        queue.clone(),
        blobs.clone(),
        settings,
    ));
    Harness {
        store,
        queue,
        blobs,
        ctx,
    }
}

/// Context over a caller-supplied blob store.
pub fn context_with_blobs(
    store: Arc<MemoryEphemeralStore>,
    blobs: Arc<dyn BlobStore>,
) -> Context {
    Context::new(
        store,
        Arc::new(MemoryJobQueue::new("test")),
        blobs,
        settings(),
    )
}

/// Wrap a job as if a worker had just reserved it.
pub fn reserved(job: Job) -> QueuedJob {
    QueuedJob {
        id: JobId::new(),
        job,
        attempts: 1,
        dedup_key: None,
        enqueued_at: Utc::now(),
        receipt: None,
    }
}

pub struct UnreachableBlobs;

#[async_trait]
impl BlobStore for UnreachableBlobs {
    async fn put(&self, _path: &str, _bytes: Vec<u8>) -> Result<()> {
        Err(Error::Unavailable("blob store offline".into()))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        Err(Error::NotFound(path.to_string()))
    }

    async fn exists(&self, _path: &str) -> Result<bool> {
        Ok(false)
    }

    async fn copy(&self, _from: &str, _to: &str) -> Result<()> {
        Err(Error::Unavailable("blob store offline".into()))
    }
}

pub struct UnreachableStore;

#[async_trait]
impl EphemeralStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Unavailable("cache offline".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(Error::Unavailable("cache offline".into()))
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
        Err(Error::Unavailable("cache offline".into()))
    }

    async fn get_counter(&self, _key: &str) -> Result<i64> {
        Err(Error::Unavailable("cache offline".into()))
    }

    async fn increment_and_get(&self, _key: &str, _ttl: Duration) -> Result<i64> {
        Err(Error::Unavailable("cache offline".into()))
    }

    async fn claim_position(&self, _claim: &str, _sequence: &str, _ttl: Duration) -> Result<i64> {
        Err(Error::Unavailable("cache offline".into()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<usize> {
        Err(Error::Unavailable("cache offline".into()))
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
