//! Ephemeral ordered store: TTL-bounded key-value cache for chunks pending
//! archival, plus atomic per-task counters.
//!
//! Counter keys are only ever mutated through
//! [`EphemeralStore::increment_and_get`]; handler code never reads a counter
//! and writes it back.

pub mod keys;
pub mod memory;
pub mod postgres;

pub use memory::MemoryEphemeralStore;
pub use postgres::PgEphemeralStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Read a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any existing one. A zero `ttl` applies no
    /// expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write a value only if the key is absent (or expired). Returns whether
    /// this call wrote it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Read a counter. Absent counters are zero.
    async fn get_counter(&self, key: &str) -> Result<i64>;

    /// Atomically add one to a counter and return the new value. No two
    /// callers ever observe the same result for the same key while it lives.
    /// Each increment pushes the counter's expiry out to `ttl` from now.
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Return the value recorded under `claim`, or allocate one from the
    /// `sequence` counter and record it, as a single atomic step. Repeated
    /// calls with the same `claim` always return the same value.
    async fn claim_position(&self, claim: &str, sequence: &str, ttl: Duration) -> Result<i64>;

    /// Remove keys; returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}
