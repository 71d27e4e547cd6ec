//! Uploadable asset copy: `copy_uploadable_file`.

use super::JobHandler;
use crate::blob::paths::asset_path;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::model::job::{Job, QueuedJob};
use async_trait::async_trait;
use tracing::info;

/// Duplicates a stored file from one app version to another. Rerunning
/// overwrites the target with the same bytes.
pub struct CopyUploadable;

#[async_trait]
impl JobHandler for CopyUploadable {
    async fn handle(&self, ctx: &Context, job: &QueuedJob) -> Result<()> {
        job.job.validate()?;
        let Job::CopyUploadable {
            app_slug,
            from_version_id,
            to_version_id,
            resource_id,
            extension,
        } = &job.job
        else {
            return Err(Error::Malformed(format!(
                "{} routed to asset copy",
                job.job.name()
            )));
        };

        let from = asset_path(app_slug, from_version_id, resource_id, extension);
        let to = asset_path(app_slug, to_version_id, resource_id, extension);
        ctx.blobs.copy(&from, &to).await?;

        info!(%from, %to, "uploadable copied");
        Ok(())
    }
}
