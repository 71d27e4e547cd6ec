mod common;

use chunklog::blob::BlobStore;
use chunklog::blob::paths::asset_path;
use chunklog::error::Error;
use chunklog::handlers::{CopyUploadable, JobHandler};
use chunklog::model::job::Job;
use chunklog::producer;
use chunklog::queue::JobQueue;
use common::{harness, reserved};

fn copy_job() -> Job {
    Job::CopyUploadable {
        app_slug: "acme".into(),
        from_version_id: "11".into(),
        to_version_id: "12".into(),
        resource_id: "icon".into(),
        extension: "png".into(),
    }
}

#[tokio::test]
async fn copies_the_asset_into_the_new_version() {
    let h = harness();
    h.blobs
        .put(&asset_path("acme", "11", "icon", "png"), b"\x89PNG".to_vec())
        .await
        .unwrap();

    CopyUploadable.handle(&h.ctx, &reserved(copy_job())).await.unwrap();
    // Rerunning overwrites with the same bytes.
    CopyUploadable.handle(&h.ctx, &reserved(copy_job())).await.unwrap();

    let copied = h.blobs.get("acme/12/icon.png").await.unwrap();
    assert_eq!(copied, b"\x89PNG");
    assert!(h.blobs.exists("acme/11/icon.png").await.unwrap());
}

#[tokio::test]
async fn missing_source_is_permanent() {
    let h = harness();
    let err = CopyUploadable
        .handle(&h.ctx, &reserved(copy_job()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn blank_fields_are_rejected() {
    let h = harness();
    let job = Job::CopyUploadable {
        app_slug: "acme".into(),
        from_version_id: "11".into(),
        to_version_id: " ".into(),
        resource_id: "icon".into(),
        extension: "png".into(),
    };
    let err = CopyUploadable.handle(&h.ctx, &reserved(job)).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn repeated_copy_requests_collapse_while_pending() {
    let h = harness();
    let first = producer::copy_uploadable(h.queue.as_ref(), "acme", "11", "12", "icon", "png")
        .await
        .unwrap();
    let second = producer::copy_uploadable(h.queue.as_ref(), "acme", "11", "12", "icon", "png")
        .await
        .unwrap();

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(h.queue.len().await.unwrap(), 1);
}
