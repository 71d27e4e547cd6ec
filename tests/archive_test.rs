//! Archival: reassembly order, failure modes and cleanup.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use chunklog::blob::BlobStore;
use chunklog::cache::{EphemeralStore, MemoryEphemeralStore, keys};
use chunklog::error::Error;
use chunklog::handlers::archive::{Archived, archive_log, completion_time};
use chunklog::handlers::ingest::ingest_chunk;
use chunklog::handlers::{ArchiveLog, JobHandler};
use chunklog::model::chunk::{ChunkPayload, LogChunk, TaskId};
use chunklog::model::job::{Job, JobId};
use common::{Harness, UnreachableBlobs, context_with_blobs, harness, reserved};
use std::sync::Arc;
use std::time::Duration;

const PATH: &str = "logs/acme/7/T1.log";

fn t1() -> TaskId {
    TaskId::parse("T1").unwrap()
}

async fn ingest_all(h: &Harness, task_id: &TaskId, chunks: &[ChunkPayload]) {
    for chunk in chunks {
        ingest_chunk(&h.ctx, &JobId::new(), task_id, chunk)
            .await
            .unwrap();
    }
}

async fn blob_text(h: &Harness, path: &str) -> String {
    String::from_utf8(h.blobs.get(path).await.unwrap()).unwrap()
}

#[tokio::test]
async fn out_of_order_assigned_chunks_archive_in_position_order() {
    let h = harness();
    ingest_all(
        &h,
        &t1(),
        &[
            ChunkPayload::at(2, "b"),
            ChunkPayload::at(1, "a"),
            ChunkPayload::at(3, "c"),
        ],
    )
    .await;

    let out = archive_log(&h.ctx, &t1(), PATH, 3, Some(Utc::now()))
        .await
        .unwrap();

    assert_eq!(out, Archived::Written { bytes: 3 });
    assert_eq!(blob_text(&h, PATH).await, "abc");
    assert!(h.store.is_empty(), "ephemeral keys should be cleared");
}

#[tokio::test]
async fn counter_mode_chunks_archive_in_arrival_order() {
    let h = harness();
    ingest_all(
        &h,
        &t1(),
        &[
            ChunkPayload::new("a"),
            ChunkPayload::new("b"),
            ChunkPayload::new("c"),
        ],
    )
    .await;

    archive_log(&h.ctx, &t1(), PATH, 3, Some(Utc::now()))
        .await
        .unwrap();

    assert_eq!(blob_text(&h, PATH).await, "abc");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn content_is_archived_byte_for_byte() {
    let h = harness();
    let parts = ["$ build\n", "  résumé ✓\r\n", "\tdone\n"];
    let chunks: Vec<_> = parts.iter().map(|p| ChunkPayload::new(*p)).collect();
    ingest_all(&h, &t1(), &chunks).await;

    archive_log(&h.ctx, &t1(), PATH, 3, None).await.unwrap();

    assert_eq!(blob_text(&h, PATH).await, parts.concat());
}

#[tokio::test]
async fn missing_chunk_writes_nothing_and_keeps_the_rest() {
    let h = harness();
    ingest_all(
        &h,
        &t1(),
        &[ChunkPayload::at(1, "a"), ChunkPayload::at(3, "c")],
    )
    .await;

    let err = archive_log(&h.ctx, &t1(), PATH, 3, Some(Utc::now()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingChunk { position: 2, .. }));
    assert!(err.is_retryable());
    assert!(!h.blobs.exists(PATH).await.unwrap());
    assert!(
        h.store
            .get(&keys::chunk_key(&t1(), 1))
            .await
            .unwrap()
            .is_some()
    );

    // The late chunk arrives and the retry succeeds.
    ingest_all(&h, &t1(), &[ChunkPayload::at(2, "b")]).await;
    archive_log(&h.ctx, &t1(), PATH, 3, Some(Utc::now()))
        .await
        .unwrap();
    assert_eq!(blob_text(&h, PATH).await, "abc");
}

#[tokio::test]
async fn missing_chunk_long_after_completion_is_expired() {
    let h = harness();
    let completed = Utc::now() - ChronoDuration::hours(2);

    let err = archive_log(&h.ctx, &t1(), PATH, 1, Some(completed))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    let Error::ChunkExpired {
        position,
        elapsed_secs,
        ..
    } = err
    else {
        panic!("expected ChunkExpired, got {err:?}");
    };
    assert_eq!(position, 1);
    assert!(elapsed_secs >= 7200);
}

#[tokio::test]
async fn missing_chunk_without_completion_time_stays_retryable() {
    let h = harness();
    let err = archive_log(&h.ctx, &t1(), PATH, 1, None).await.unwrap_err();
    assert!(matches!(err, Error::MissingChunk { .. }));
}

#[tokio::test]
async fn handler_falls_back_to_the_enqueue_time() {
    let h = harness();
    let mut job = reserved(Job::StoreLog {
        task_id: t1(),
        aws_path: PATH.into(),
        number_of_log_chunks: 1,
        completed_at: None,
    });
    job.enqueued_at = Utc::now() - ChronoDuration::hours(2);

    assert_eq!(completion_time(&job), Some(job.enqueued_at));
    let err = ArchiveLog.handle(&h.ctx, &job).await.unwrap_err();
    assert!(matches!(err, Error::ChunkExpired { position: 1, .. }));
}

#[tokio::test]
async fn rerun_after_success_reports_already_archived() {
    let h = harness();
    ingest_all(&h, &t1(), &[ChunkPayload::new("a"), ChunkPayload::new("b")]).await;

    archive_log(&h.ctx, &t1(), PATH, 2, Some(Utc::now()))
        .await
        .unwrap();
    let again = archive_log(&h.ctx, &t1(), PATH, 2, Some(Utc::now()))
        .await
        .unwrap();

    assert_eq!(again, Archived::AlreadyArchived);
    assert_eq!(blob_text(&h, PATH).await, "ab");
}

#[tokio::test]
async fn zero_chunks_writes_an_empty_object() {
    let h = harness();
    let out = archive_log(&h.ctx, &t1(), PATH, 0, Some(Utc::now()))
        .await
        .unwrap();

    assert_eq!(out, Archived::Written { bytes: 0 });
    assert_eq!(blob_text(&h, PATH).await, "");
}

#[tokio::test]
async fn blob_failure_keeps_chunks_for_the_retry() {
    let store = Arc::new(MemoryEphemeralStore::new());
    let ctx = context_with_blobs(store.clone(), Arc::new(UnreachableBlobs));
    for (position, content) in [(1, "a"), (2, "b")] {
        ingest_chunk(&ctx, &JobId::new(), &t1(), &ChunkPayload::at(position, content))
            .await
            .unwrap();
    }

    let err = archive_log(&ctx, &t1(), PATH, 2, Some(Utc::now()))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(store.get(&keys::chunk_key(&t1(), 1)).await.unwrap().is_some());
    assert!(store.get(&keys::chunk_key(&t1(), 2)).await.unwrap().is_some());
    assert_eq!(store.get_counter(&keys::counter_key(&t1())).await.unwrap(), 2);
}

#[tokio::test]
async fn chunk_stored_under_the_wrong_position_is_an_ordering_violation() {
    let h = harness();
    let misplaced = LogChunk::new(t1(), 3, "c").encode().unwrap();
    h.store
        .set(&keys::chunk_key(&t1(), 1), &misplaced, Duration::from_secs(60))
        .await
        .unwrap();

    let err = archive_log(&h.ctx, &t1(), PATH, 1, None).await.unwrap_err();

    assert!(matches!(
        err,
        Error::OrderingViolation {
            expected: 1,
            found: 3,
            ..
        }
    ));
    assert!(!h.blobs.exists(PATH).await.unwrap());
}

#[tokio::test]
async fn extra_stored_chunks_are_left_out() {
    let h = harness();
    ingest_all(
        &h,
        &t1(),
        &[
            ChunkPayload::new("a"),
            ChunkPayload::new("b"),
            ChunkPayload::new("c"),
        ],
    )
    .await;

    archive_log(&h.ctx, &t1(), PATH, 2, None).await.unwrap();

    assert_eq!(blob_text(&h, PATH).await, "ab");
}

#[tokio::test]
async fn handler_accepts_the_legacy_event_id_field() {
    let h = harness();
    ingest_all(&h, &t1(), &[ChunkPayload::new("hello")]).await;

    let job: Job = serde_json::from_value(serde_json::json!({
        "job": "store_log_to_aws",
        "event_id": "T1",
        "aws_path": PATH,
        "number_of_log_chunks": 1
    }))
    .unwrap();
    ArchiveLog.handle(&h.ctx, &reserved(job)).await.unwrap();

    assert_eq!(blob_text(&h, PATH).await, "hello");
}
