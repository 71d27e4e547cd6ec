//! Ephemeral entries: an UNLOGGED key/value table with per-row expiry.
//!
//! Expiry is evaluated against the database clock. Expired rows read as
//! absent and are overwritten in place; `purge_expired` reclaims the rest.

use crate::error::{Error, Result};
use sqlx::{Executor, Postgres};
use std::time::Duration;

/// SQL fragment computing the expiry for a TTL bound as `$n` seconds.
/// Zero means no expiry.
macro_rules! expiry {
    ($n:literal) => {
        concat!(
            "CASE WHEN $", $n, "::float8 > 0 THEN now() + make_interval(secs => $", $n,
            "::float8) END"
        )
    };
}

const LIVE: &str = "(expires_at IS NULL OR expires_at > now())";

fn ttl_secs(ttl: Duration) -> f64 {
    ttl.as_secs_f64()
}

/// Increment `key`, restarting at 1 if the row has expired. Every increment
/// pushes the expiry out to `ttl` from now.
async fn increment<'e, E>(executor: E, key: &str, ttl: Duration) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as(concat!(
        "INSERT INTO ephemeral_entries (key, value, counter, expires_at)
         VALUES ($1, NULL, 1, ",
        expiry!(2),
        ")
         ON CONFLICT (key) DO UPDATE
         SET counter = CASE
                 WHEN ephemeral_entries.expires_at IS NOT NULL AND ephemeral_entries.expires_at <= now()
                 THEN 1
                 ELSE COALESCE(ephemeral_entries.counter, ephemeral_entries.value::bigint, 0) + 1
             END,
             value = NULL,
             expires_at = EXCLUDED.expires_at
         RETURNING counter"
    ))
    .bind(key)
    .bind(ttl_secs(ttl))
    .fetch_one(executor)
    .await?;
    Ok(row.0)
}

impl super::Db {
    pub async fn ephemeral_get(&self, key: &str) -> Result<Option<(Option<String>, Option<i64>)>> {
        let row: Option<(Option<String>, Option<i64>)> = sqlx::query_as(&format!(
            "SELECT value, counter FROM ephemeral_entries WHERE key = $1 AND {LIVE}"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn ephemeral_set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO ephemeral_entries (key, value, counter, expires_at)
             VALUES ($1, $2, NULL, ",
            expiry!(3),
            ")
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, counter = NULL, expires_at = EXCLUDED.expires_at"
        ))
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert unless a live row holds the key. Returns whether this call
    /// wrote the row.
    pub async fn ephemeral_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let written: Option<(String,)> = sqlx::query_as(concat!(
            "INSERT INTO ephemeral_entries (key, value, counter, expires_at)
             VALUES ($1, $2, NULL, ",
            expiry!(3),
            ")
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, counter = NULL, expires_at = EXCLUDED.expires_at
             WHERE ephemeral_entries.expires_at IS NOT NULL
               AND ephemeral_entries.expires_at <= now()
             RETURNING key"
        ))
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .fetch_optional(&self.pool)
        .await?;
        Ok(written.is_some())
    }

    /// Atomic increment under the row lock taken by the upsert.
    pub async fn ephemeral_increment(&self, key: &str, ttl: Duration) -> Result<i64> {
        increment(&self.pool, key, ttl).await
    }

    /// Return the position recorded under `claim`, or take the next value of
    /// `sequence` and record it, in one transaction. The advisory lock keyed
    /// on the claim serializes concurrent deliveries of the same job.
    pub async fn ephemeral_claim(&self, claim: &str, sequence: &str, ttl: Duration) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(claim)
            .execute(&mut *tx)
            .await?;

        let held: Option<(Option<String>, Option<i64>)> = sqlx::query_as(&format!(
            "SELECT value, counter FROM ephemeral_entries WHERE key = $1 AND {LIVE}"
        ))
        .bind(claim)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((value, counter)) = held {
            tx.commit().await?;
            return match (counter, value) {
                (Some(n), _) => Ok(n),
                (None, Some(text)) => text
                    .parse()
                    .map_err(|_| Error::Malformed(format!("claim {claim} holds {text}"))),
                (None, None) => Err(Error::Malformed(format!("claim {claim} is empty"))),
            };
        }

        let position = increment(&mut *tx, sequence, ttl).await?;
        sqlx::query(concat!(
            "INSERT INTO ephemeral_entries (key, value, counter, expires_at)
             VALUES ($1, $2, NULL, ",
            expiry!(3),
            ")
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, counter = NULL, expires_at = EXCLUDED.expires_at"
        ))
        .bind(claim)
        .bind(position.to_string())
        .bind(ttl_secs(ttl))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(position)
    }

    pub async fn ephemeral_delete(&self, keys: &[String]) -> Result<usize> {
        let rows = sqlx::query(&format!(
            "DELETE FROM ephemeral_entries WHERE key = ANY($1) AND {LIVE}"
        ))
        .bind(keys)
        .execute(&self.pool)
        .await?
        .rows_affected();
        // Expired leftovers for the same keys go too; they just don't count.
        sqlx::query("DELETE FROM ephemeral_entries WHERE key = ANY($1)")
            .bind(keys)
            .execute(&self.pool)
            .await?;
        Ok(rows as usize)
    }

    /// Delete every expired row. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let rows = sqlx::query(
            "DELETE FROM ephemeral_entries WHERE expires_at IS NOT NULL AND expires_at <= now()",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
