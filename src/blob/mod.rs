//! Durable blob storage for archived logs and uploaded assets.
//!
//! Writes are whole-object puts: an archive either lands complete or not at
//! all, and rewriting identical content to the same path is harmless.

pub mod paths;

use crate::error::{Error, Result};
use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a whole object, replacing any existing one.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn copy(&self, from: &str, to: &str) -> Result<()>;
}

/// [`BlobStore`] over any `object_store` backend.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Build a store from a URL:
    /// - `memory://`
    /// - `file:///absolute/dir`
    /// - `s3://bucket` (credentials and region from the AWS environment)
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| Error::Config(format!("invalid blob store url {raw}: {e}")))?;

        let store: Arc<dyn ObjectStore> = match url.scheme() {
            "memory" => Arc::new(InMemory::new()),
            "file" => {
                let dir = url
                    .to_file_path()
                    .map_err(|_| Error::Config(format!("invalid file url {raw}")))?;
                std::fs::create_dir_all(&dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(&dir)?)
            }
            "s3" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| Error::Config(format!("missing bucket in {raw}")))?;
                Arc::new(
                    AmazonS3Builder::from_env()
                        .with_bucket_name(bucket)
                        .build()?,
                )
            }
            other => {
                return Err(Error::Config(format!(
                    "unsupported blob store scheme: {other}"
                )));
            }
        };

        info!(scheme = url.scheme(), "blob store configured");
        Ok(Self::new(store))
    }
}

fn location(path: &str) -> Result<ObjectPath> {
    ObjectPath::parse(path).map_err(|e| Error::Validation(format!("bad blob path {path}: {e}")))
}

/// NotFound is a permanent answer; everything else is worth retrying.
fn classify(path: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::NotFound(format!("blob {path}")),
        other => Error::Blob(other),
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.store
            .put(&location(path)?, bytes.into())
            .await
            .map_err(|e| classify(path, e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let result = self
            .store
            .get(&location(path)?)
            .await
            .map_err(|e| classify(path, e))?;
        let bytes = result.bytes().await.map_err(|e| classify(path, e))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.store.head(&location(path)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::Blob(e)),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.store
            .copy(&location(from)?, &location(to)?)
            .await
            .map_err(|e| classify(from, e))
    }
}
