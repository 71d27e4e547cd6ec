//! Error types for chunklog.
//!
//! Every failure a handler can produce is one of these variants. The worker
//! pool asks [`Error::is_retryable`] to decide between the queue's retry
//! policy and dead-lettering.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("blob storage error: {0}")]
    Blob(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Input was rejected. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A payload could not be decoded. Never retried.
    #[error("malformed job: {0}")]
    Malformed(String),

    /// A chunk the archive needs has not arrived (yet).
    #[error("missing chunk {position} for task {task_id}")]
    MissingChunk { task_id: String, position: u32 },

    /// A chunk is missing and the ephemeral TTL has plausibly elapsed.
    #[error("chunk {position} for task {task_id} expired ({elapsed_secs}s since completion)")]
    ChunkExpired {
        task_id: String,
        position: u32,
        elapsed_secs: i64,
    },

    #[error("ordering violation for task {task_id}: expected position {expected}, found {found}")]
    OrderingViolation {
        task_id: String,
        expected: u32,
        found: u32,
    },

    /// A backing service could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a job failing with this error should be handed back to the
    /// queue's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Blob(_)
                | Error::Io(_)
                | Error::Unavailable(_)
                | Error::MissingChunk { .. }
        )
    }

    /// Input rejected, as opposed to the system failing.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_chunk_is_retryable_but_expiry_is_not() {
        let missing = Error::MissingChunk {
            task_id: "t".into(),
            position: 2,
        };
        let expired = Error::ChunkExpired {
            task_id: "t".into(),
            position: 2,
            elapsed_secs: 90_000,
        };
        assert!(missing.is_retryable());
        assert!(!expired.is_retryable());
    }

    #[test]
    fn validation_is_distinct_from_infrastructure() {
        let rejected = Error::Validation("task_id is empty".into());
        let down = Error::Unavailable("store offline".into());
        assert!(rejected.is_validation());
        assert!(!rejected.is_retryable());
        assert!(!down.is_validation());
        assert!(down.is_retryable());
    }
}
