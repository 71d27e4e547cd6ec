//! Job handlers and the registry that routes jobs to them by name.

pub mod archive;
pub mod copy;
pub mod ingest;

pub use archive::ArchiveLog;
pub use copy::CopyUploadable;
pub use ingest::IngestChunk;

use crate::context::Context;
use crate::error::Result;
use crate::model::job::{self, QueuedJob};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs one kind of job. Must be safe to run more than once for the same
/// job: delivery is at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, job: &QueuedJob) -> Result<()>;
}

/// Handlers indexed by job name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The pipeline's own handlers: ingestion, archival, asset copy.
    pub fn with_defaults() -> Self {
        Self::empty()
            .register(job::STORE_CHUNK, IngestChunk)
            .register(job::STORE_LOG, ArchiveLog)
            .register(job::COPY_UPLOADABLE, CopyUploadable)
    }

    pub fn register(mut self, name: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Look up a handler by job name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
