//! Job execution span helpers.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one job execution.
///
/// The `job.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_job_span(job_name: &str, job_id: &Uuid, attempt: u32) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.name" = job_name,
        "job.id" = %job_id,
        "job.attempt" = attempt,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit it as an event.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
