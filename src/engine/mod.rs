//! Worker pool: executors pulling jobs, dispatching, retiring.

pub mod pool;

pub use pool::{PoolConfig, WorkerPool};
