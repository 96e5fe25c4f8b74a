//! SQLite-backed stream log
//!
//! Tables `stream_entries`, `stream_groups` and `stream_pending` live in the
//! service database (see `kscope_common::db::init`). Each group keeps a
//! delivery cursor; delivered entries stay in `stream_pending` until acked.

use super::{MessageId, StreamTransport};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use kscope_common::events::{Fields, StreamMessage};
use kscope_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::debug;

/// Stream log in the service database
#[derive(Clone)]
pub struct SqliteStreamLog {
    pool: SqlitePool,
}

impl SqliteStreamLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn append(&self, stream: &str, encoded: &str) -> Result<String> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // Insert first so the transaction owns the write lock before reading the tail
        let placeholder = format!("unassigned-{}", uuid::Uuid::new_v4());
        let entry_id = sqlx::query(
            "INSERT INTO stream_entries (stream, message_id, fields, created_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(stream)
        .bind(&placeholder)
        .bind(encoded)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let previous: Option<String> = sqlx::query_scalar(
            r#"
            SELECT message_id FROM stream_entries
            WHERE stream = ? AND entry_id < ?
            ORDER BY entry_id DESC
            LIMIT 1
            "#,
        )
        .bind(stream)
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?;

        let message_id = MessageId::next_after(previous.as_deref().and_then(MessageId::parse), now_ms);

        sqlx::query("UPDATE stream_entries SET message_id = ? WHERE entry_id = ?")
            .bind(message_id.to_string())
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message_id.to_string())
    }

    async fn read_group_once(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // No-op write takes the write lock and proves the group exists
        let touched = sqlx::query(
            "UPDATE stream_groups SET last_delivered_id = last_delivered_id WHERE stream = ? AND group_name = ?",
        )
        .bind(stream)
        .bind(group)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if touched == 0 {
            return Err(Error::NotFound(format!(
                "consumer group '{}' on stream '{}'",
                group, stream
            )));
        }

        let cursor: i64 = sqlx::query_scalar(
            "SELECT last_delivered_id FROM stream_groups WHERE stream = ? AND group_name = ?",
        )
        .bind(stream)
        .bind(group)
        .fetch_one(&mut *tx)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT entry_id, message_id, fields FROM stream_entries
            WHERE stream = ? AND entry_id > ?
            ORDER BY entry_id
            LIMIT ?
            "#,
        )
        .bind(stream)
        .bind(cursor)
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await?;

        let Some(last_entry) = rows.last().map(|row| row.get::<i64, _>("entry_id")) else {
            return Ok(Vec::new());
        };

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO stream_pending (stream, group_name, entry_id, consumer, delivery_count, last_delivered_ms)
                VALUES (?, ?, ?, ?, 1, ?)
                "#,
            )
            .bind(stream)
            .bind(group)
            .bind(row.get::<i64, _>("entry_id"))
            .bind(consumer)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE stream_groups SET last_delivered_id = ? WHERE stream = ? AND group_name = ?")
            .bind(last_entry)
            .bind(stream)
            .bind(group)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        rows.iter().map(|row| decode_entry(stream, row)).collect()
    }

    async fn claim_idle_once(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff_ms = now_ms.saturating_sub(min_idle.as_millis() as i64);
        let mut tx = self.pool.begin().await?;

        let mut claimed: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE stream_pending
            SET consumer = ?, delivery_count = delivery_count + 1, last_delivered_ms = ?
            WHERE stream = ? AND group_name = ? AND entry_id IN (
                SELECT entry_id FROM stream_pending
                WHERE stream = ? AND group_name = ? AND last_delivered_ms <= ?
                ORDER BY entry_id
                LIMIT ?
            )
            RETURNING entry_id
            "#,
        )
        .bind(consumer)
        .bind(now_ms)
        .bind(stream)
        .bind(group)
        .bind(stream)
        .bind(group)
        .bind(cutoff_ms)
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await?;
        claimed.sort_unstable();

        let mut messages = Vec::with_capacity(claimed.len());
        for entry_id in claimed {
            let row = sqlx::query("SELECT entry_id, message_id, fields FROM stream_entries WHERE entry_id = ?")
                .bind(entry_id)
                .fetch_one(&mut *tx)
                .await?;
            messages.push(decode_entry(stream, &row)?);
        }

        tx.commit().await?;

        if !messages.is_empty() {
            debug!(stream, group, consumer, count = messages.len(), "Claimed idle pending messages");
        }
        Ok(messages)
    }
}

fn decode_entry(stream: &str, row: &SqliteRow) -> Result<StreamMessage> {
    let message_id: String = row.get("message_id");
    let raw: String = row.get("fields");
    let fields: Fields = serde_json::from_str(&raw).map_err(|e| {
        Error::InvalidInput(format!("stored fields of {} on '{}': {}", message_id, stream, e))
    })?;
    Ok(StreamMessage::new(stream, message_id, fields))
}

#[async_trait]
impl StreamTransport for SqliteStreamLog {
    async fn publish(&self, stream: &str, fields: Fields) -> Result<String> {
        let encoded = serde_json::to_string(&fields)
            .map_err(|e| Error::InvalidInput(format!("cannot encode fields: {}", e)))?;
        retry_on_lock("stream publish", DEFAULT_MAX_LOCK_WAIT_MS, || self.append(stream, &encoded)).await
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let created = sqlx::query(
            "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_delivered_id) VALUES (?, ?, 0)",
        )
        .bind(stream)
        .bind(group)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if created > 0 {
            debug!(stream, group, "Created consumer group");
        }
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        retry_on_lock("stream read_group", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.read_group_once(stream, group, consumer, count)
        })
        .await
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        retry_on_lock("stream claim_idle", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.claim_idle_once(stream, group, consumer, min_idle, count)
        })
        .await
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<bool> {
        let removed = retry_on_lock("stream ack", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query(
                r#"
                DELETE FROM stream_pending
                WHERE stream = ? AND group_name = ? AND entry_id = (
                    SELECT entry_id FROM stream_entries WHERE stream = ? AND message_id = ?
                )
                "#,
            )
            .bind(stream)
            .bind(group)
            .bind(stream)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
            Ok::<u64, Error>(result.rows_affected())
        })
        .await?;

        Ok(removed > 0)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stream_pending WHERE stream = ? AND group_name = ?",
        )
        .bind(stream)
        .bind(group)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stream_entries WHERE stream = ?")
            .bind(stream)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
