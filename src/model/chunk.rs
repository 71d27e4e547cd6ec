//! Tasks and the log chunks they emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Stable external identifier of a publish run.
///
/// Opaque to the pipeline: usually a UUID, but any non-empty string works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Parse a task id, rejecting empty or whitespace-only input.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::Validation("task_id is empty".to_string()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id would be rejected by [`TaskId::parse`]. Ids that
    /// arrive through serde skip `parse`, so handlers check this.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<uuid::Uuid> for TaskId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Chunk payload (wire)
// ---------------------------------------------------------------------------

/// The `log_chunk` argument of an ingestion job.
///
/// When the producer knows the position it sends it; otherwise the
/// ingestion handler allocates one from the task's atomic sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    pub content: String,
}

impl ChunkPayload {
    /// A chunk whose position is assigned at ingestion time.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            position: None,
            content: content.into(),
        }
    }

    /// A chunk whose position the producer already knows.
    pub fn at(position: u32, content: impl Into<String>) -> Self {
        Self {
            position: Some(position),
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored chunk
// ---------------------------------------------------------------------------

/// One ordered fragment of a task's log, as held by the ephemeral store.
///
/// Identity is `(task_id, position)`. Positions are 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub task_id: TaskId,
    pub position: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogChunk {
    pub fn new(task_id: TaskId, position: u32, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            position,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Malformed(format!("stored chunk: {e}")))
    }
}
