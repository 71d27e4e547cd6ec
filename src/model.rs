//! Core data model.
//!
//! A task is one external publish run. It streams log chunks while it runs
//! and, once finished, asks for its log to be archived. Both kinds of work
//! travel through the job queue as typed [`job::Job`] values.

pub mod chunk;
pub mod job;

pub use chunk::{ChunkPayload, LogChunk, TaskId};
pub use job::{Job, JobId, JobState, QueuedJob};
