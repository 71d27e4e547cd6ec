//! Metric instrument factories for chunklog.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"chunklog"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for chunklog instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("chunklog")
}

/// Counter: jobs submitted.
/// Labels: `job`, `result` ("ok" | "duplicate").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("chunklog.jobs.enqueued")
        .with_description("Number of jobs submitted")
        .build()
}

/// Counter: how dispatched jobs ended.
/// Labels: `job`, `outcome` ("completed" | "retried" | "dead").
pub fn job_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("chunklog.jobs.outcomes")
        .with_description("Outcomes of dispatched jobs")
        .build()
}

/// Counter: jobs with no registered handler.
/// Labels: `job`.
pub fn jobs_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("chunklog.jobs.unroutable")
        .with_description("Jobs with no registered handler")
        .build()
}

/// Counter: queue-level operations (send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("chunklog.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: chunks newly written to the ephemeral store.
/// Labels: `mode` ("assigned" | "counter").
pub fn chunks_stored() -> Counter<u64> {
    meter()
        .u64_counter("chunklog.chunks.stored")
        .with_description("Log chunks written to the ephemeral store")
        .build()
}

/// Histogram: size of archived logs.
pub fn archive_bytes() -> Histogram<u64> {
    meter()
        .u64_histogram("chunklog.archive.bytes")
        .with_description("Size of archived logs")
        .with_unit("By")
        .build()
}

/// Counter: archives abandoned because chunks outlived their TTL.
pub fn archive_expired() -> Counter<u64> {
    meter()
        .u64_counter("chunklog.archive.expired")
        .with_description("Archivals that found chunks expired")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("chunklog.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
