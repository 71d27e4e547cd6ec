//! Pipeline context: the collaborators every handler needs.
//!
//! Built once at startup and shared by `Arc`; nothing in the crate reaches
//! for process-global queue or connection state.

use crate::blob::BlobStore;
use crate::cache::EphemeralStore;
use crate::config::PipelineSettings;
use crate::queue::JobQueue;
use std::sync::Arc;

pub struct Context {
    pub store: Arc<dyn EphemeralStore>,
    pub queue: Arc<dyn JobQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub settings: PipelineSettings,
}

impl Context {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        queue: Arc<dyn JobQueue>,
        blobs: Arc<dyn BlobStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            queue,
            blobs,
            settings,
        }
    }
}
