//! Process-local ephemeral store.
//!
//! Used by tests and single-process deployments. Expiry runs on
//! `tokio::time::Instant`, so a paused test clock controls it.

use super::EphemeralStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        Self { value, expires_at }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryEphemeralStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Other("ephemeral store lock poisoned".to_string()))
    }

    /// Increment under an already-held lock. A live counter gets a fresh
    /// expiry; a missing or expired one restarts at 1.
    fn bump(entries: &mut HashMap<String, Entry>, key: &str, ttl: Duration) -> Result<i64> {
        let current = match Self::live(entries, key).map(|e| &e.value) {
            None => 0,
            Some(Value::Counter(n)) => *n,
            Some(Value::Text(s)) => s
                .parse()
                .map_err(|_| Error::Malformed(format!("key {key} does not hold a counter")))?,
        };
        entries.insert(key.to_string(), Entry::new(Value::Counter(current + 1), ttl));
        Ok(current + 1)
    }

    /// Fetch a live entry, dropping it if it has expired.
    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key).map(|e| match &e.value {
            Value::Text(s) => s.clone(),
            Value::Counter(n) => n.to_string(),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.lock()?;
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl));
        Ok(true)
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key).map(|e| e.value.clone()) {
            None => Ok(0),
            Some(Value::Counter(n)) => Ok(n),
            Some(Value::Text(s)) => s
                .parse()
                .map_err(|_| Error::Malformed(format!("key {key} does not hold a counter"))),
        }
    }

    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut entries = self.lock()?;
        Self::bump(&mut entries, key, ttl)
    }

    async fn claim_position(&self, claim: &str, sequence: &str, ttl: Duration) -> Result<i64> {
        let mut entries = self.lock()?;
        if let Some(entry) = Self::live(&mut entries, claim) {
            return match &entry.value {
                Value::Counter(n) => Ok(*n),
                Value::Text(s) => s
                    .parse()
                    .map_err(|_| Error::Malformed(format!("claim {claim} holds {s}"))),
            };
        }
        let position = Self::bump(&mut entries, sequence, ttl)?;
        entries.insert(claim.to_string(), Entry::new(Value::Counter(position), ttl));
        Ok(position)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.is_live(now))
            .count())
    }
}
