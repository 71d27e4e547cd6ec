//! Ephemeral store over the `ephemeral_entries` table.

use super::EphemeralStore;
use crate::db::Db;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct PgEphemeralStore {
    db: Arc<Db>,
}

impl PgEphemeralStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Reclaim rows whose TTL has passed.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.db.purge_expired().await
    }
}

#[async_trait]
impl EphemeralStore for PgEphemeralStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .ephemeral_get(key)
            .await?
            .map(|(value, counter)| value.unwrap_or_else(|| counter.unwrap_or(0).to_string())))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.db.ephemeral_set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.db.ephemeral_set_if_absent(key, value, ttl).await
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        match self.db.ephemeral_get(key).await? {
            None => Ok(0),
            Some((_, Some(n))) => Ok(n),
            Some((Some(text), None)) => text
                .parse()
                .map_err(|_| Error::Malformed(format!("key {key} does not hold a counter"))),
            Some((None, None)) => Ok(0),
        }
    }

    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.db.ephemeral_increment(key, ttl).await
    }

    async fn claim_position(&self, claim: &str, sequence: &str, ttl: Duration) -> Result<i64> {
        self.db.ephemeral_claim(claim, sequence, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.db.ephemeral_delete(keys).await
    }
}
