//! Integration tests for telemetry initialization and span helpers.

use chunklog::telemetry::job::{record_state_transition, start_job_span};
use chunklog::telemetry::{TelemetryConfig, init_telemetry, metrics};
use opentelemetry::KeyValue;
use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so a second
    // init in the same binary returns Err; either outcome is fine here.
    let config = TelemetryConfig::new("chunklog-test");
    let _guard = init_telemetry(config);
}

#[test]
fn job_span_records_transitions() {
    let id = Uuid::new_v4();
    let span = start_job_span("store_log_to_aws", &id, 2);
    record_state_transition(&span, "running", "failed");
    record_state_transition(&span, "failed", "queued");
}

#[test]
fn instruments_work_without_a_provider() {
    metrics::chunks_stored().add(1, &[KeyValue::new("mode", "counter")]);
    metrics::archive_bytes().record(1024, &[]);
    metrics::archive_expired().add(1, &[]);
    metrics::operation_duration_ms().record(
        3.5,
        &[KeyValue::new("operation", "archive.write")],
    );
}
