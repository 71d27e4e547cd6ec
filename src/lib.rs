//! # chunklog
//!
//! Capture and archival of ordered log streams from long-running publish
//! tasks.
//!
//! Chunks arrive as queued jobs and are buffered in a TTL-bounded ephemeral
//! store, ordered by an atomic per-task counter. When a task completes, an
//! archival job reassembles the chunks in position order and writes the log
//! to blob storage in a single put.

pub mod blob;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod model;
pub mod producer;
pub mod queue;
pub mod telemetry;
