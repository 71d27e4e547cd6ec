//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.metrics. The executor is generic so callers can run
//! these inside their own transaction.

use crate::error::Result;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use sqlx::{Executor, Postgres};

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

fn count(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

/// Send a message. `delay_seconds`: 0 for immediate, >0 for delayed
/// delivery. Returns the message ID.
pub(crate) async fn send<'e, E>(
    executor: E,
    queue_name: &str,
    payload: &serde_json::Value,
    delay_seconds: i32,
) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
        .bind(queue_name)
        .bind(payload)
        .bind(delay_seconds)
        .fetch_one(executor)
        .await?;
    count(queue_name, "send");
    Ok(row.0)
}

/// Archive a message (moves to archive table, preserves for audit).
pub(crate) async fn archive<'e, E>(executor: E, queue_name: &str, msg_id: i64) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT pgmq.archive($1, $2)")
        .bind(queue_name)
        .bind(msg_id)
        .execute(executor)
        .await?;
    count(queue_name, "archive");
    Ok(())
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        count(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        send(&self.pool, queue_name, payload, delay_seconds).await
    }

    /// Read the next message from a queue (visibility timeout in seconds).
    /// Returns None if queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)"
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });

        count(
            queue_name,
            if msg.is_some() { "read" } else { "read_empty" },
        );

        Ok(msg)
    }

    /// Archive a message.
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        archive(&self.pool, queue_name, msg_id).await
    }

    /// Number of messages currently in the queue, visible or not.
    pub async fn queue_length(&self, queue_name: &str) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT queue_length FROM pgmq.metrics($1)")
                .bind(queue_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
