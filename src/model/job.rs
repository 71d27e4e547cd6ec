//! Jobs: the typed unit of work that flows through the queue.
//!
//! Each variant carries exactly the arguments its handler needs, so a job
//! that made it through deserialization cannot be missing a field. The
//! serde tag is the wire-level job name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunk::{ChunkPayload, TaskId};
use crate::error::{Error, Result};

pub const STORE_CHUNK: &str = "store_chunk_to_redis";
pub const STORE_LOG: &str = "store_log_to_aws";
pub const COPY_UPLOADABLE: &str = "copy_uploadable_file";

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job")]
pub enum Job {
    /// Append one chunk to a task's ephemeral log.
    #[serde(rename = "store_chunk_to_redis")]
    StoreChunk {
        task_id: TaskId,
        log_chunk: ChunkPayload,
    },

    /// Concatenate a finished task's chunks and write them to blob storage.
    #[serde(rename = "store_log_to_aws")]
    StoreLog {
        #[serde(alias = "event_id")]
        task_id: TaskId,
        aws_path: String,
        number_of_log_chunks: u32,
        /// When the producer signalled completion. Used to tell a chunk
        /// that is late from one that has expired.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_at: Option<DateTime<Utc>>,
    },

    /// Duplicate a stored upload from one app version to another.
    #[serde(rename = "copy_uploadable_file")]
    CopyUploadable {
        app_slug: String,
        from_version_id: String,
        to_version_id: String,
        resource_id: String,
        extension: String,
    },
}

impl Job {
    /// Wire name; also the key handlers are registered under.
    pub fn name(&self) -> &'static str {
        match self {
            Job::StoreChunk { .. } => STORE_CHUNK,
            Job::StoreLog { .. } => STORE_LOG,
            Job::CopyUploadable { .. } => COPY_UPLOADABLE,
        }
    }

    /// The task this job belongs to, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Job::StoreChunk { task_id, .. } | Job::StoreLog { task_id, .. } => Some(task_id),
            Job::CopyUploadable { .. } => None,
        }
    }

    /// Check the arguments serde cannot check.
    pub fn validate(&self) -> Result<()> {
        match self {
            Job::StoreChunk { task_id, log_chunk } => {
                require_task(task_id)?;
                if log_chunk.position == Some(0) {
                    return Err(Error::Validation(
                        "chunk positions start at 1".to_string(),
                    ));
                }
            }
            Job::StoreLog {
                task_id, aws_path, ..
            } => {
                require_task(task_id)?;
                require("aws_path", aws_path)?;
            }
            Job::CopyUploadable {
                app_slug,
                from_version_id,
                to_version_id,
                resource_id,
                extension,
            } => {
                require("app_slug", app_slug)?;
                require("from_version_id", from_version_id)?;
                require("to_version_id", to_version_id)?;
                require("resource_id", resource_id)?;
                require("extension", extension)?;
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a queue payload. Failures are malformed input, not transport
    /// errors.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Malformed(e.to_string()))
    }
}

fn require_task(task_id: &TaskId) -> Result<()> {
    if task_id.is_blank() {
        return Err(Error::Validation("task_id is empty".to_string()));
    }
    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} is empty")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to run, possibly delayed.
    Queued,
    /// Reserved by a worker.
    Running,
    /// Handler succeeded. Terminal.
    Completed,
    /// Handler failed; about to be retried or killed.
    Failed,
    /// Out of attempts or permanently broken. Terminal.
    Dead,
}

impl JobState {
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Queued, Dead)        // undecodable or unroutable
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Queued)     // visibility timeout lapsed
                | (Running, Dead)
                | (Failed, Queued)      // retry
                | (Failed, Dead) // exhausted retries
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(Error::Other(format!("unknown job state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Reserved job
// ---------------------------------------------------------------------------

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub job: Job,
    /// Executions so far, including this one.
    pub attempts: u32,
    pub dedup_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Queue-specific delivery handle (pgmq message id).
    pub receipt: Option<i64>,
}

/// A job as recorded by a durable queue, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub job_name: String,
    pub dedup_key: Option<String>,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archival_job_accepts_event_id_alias() {
        let job = Job::from_value(serde_json::json!({
            "job": "store_log_to_aws",
            "event_id": "evt-42",
            "aws_path": "logs/app/7/evt-42.log",
            "number_of_log_chunks": 3
        }))
        .unwrap();

        assert_eq!(job.name(), STORE_LOG);
        assert_eq!(job.task_id().map(TaskId::as_str), Some("evt-42"));
    }

    #[test]
    fn unknown_job_name_is_malformed() {
        let err = Job::from_value(serde_json::json!({"job": "send_email"})).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn position_zero_is_rejected() {
        let job = Job::StoreChunk {
            task_id: TaskId::parse("T1").unwrap(),
            log_chunk: ChunkPayload::at(0, "x"),
        };
        assert!(matches!(job.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn blank_task_id_from_the_wire_fails_validation() {
        let job = Job::from_value(serde_json::json!({
            "job": "store_chunk_to_redis",
            "task_id": "",
            "log_chunk": {"content": "x"}
        }))
        .unwrap();
        assert!(matches!(job.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn retry_goes_through_failed() {
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Failed.can_transition_to(JobState::Queued));
        assert!(!JobState::Completed.can_transition_to(JobState::Queued));
        assert!(JobState::Dead.is_terminal());
    }
}
