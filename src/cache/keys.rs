//! Key conventions for the ephemeral store.

use crate::model::{JobId, TaskId};

/// `{task_id}{position}`
pub fn chunk_key(task_id: &TaskId, position: u32) -> String {
    format!("{task_id}{position}")
}

/// `{task_id}_chunk_count`: chunks actually stored for the task.
pub fn counter_key(task_id: &TaskId) -> String {
    format!("{task_id}_chunk_count")
}

/// `{task_id}_chunk_seq`: position allocator for chunks that arrive
/// without a producer-assigned position.
pub fn sequence_key(task_id: &TaskId) -> String {
    format!("{task_id}_chunk_seq")
}

/// `{task_id}_claim_{job_id}`: the position an ingestion job allocated, so
/// a re-delivered job reuses it instead of allocating a second one.
pub fn claim_key(task_id: &TaskId, job_id: &JobId) -> String {
    format!("{task_id}_claim_{}", job_id.0)
}

/// Every chunk key for positions `1..=count`, plus the task's counters.
pub fn task_keys(task_id: &TaskId, count: u32) -> Vec<String> {
    let mut keys: Vec<String> = (1..=count).map(|p| chunk_key(task_id, p)).collect();
    keys.push(counter_key(task_id));
    keys.push(sequence_key(task_id));
    keys
}
