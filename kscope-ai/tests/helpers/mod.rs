//! Test Helper Utilities
//!
//! Throw-away databases, seed data and test doubles for kscope-ai

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use kscope_ai::services::SearchIndex;
use kscope_ai::stream::{SqliteStreamLog, StreamTransport};
use kscope_ai::{IngestError, IngestResult, IngestState};
use kscope_common::config::IngestConfig;
use kscope_common::db::init_database;
use kscope_common::events::{Fields, StreamMessage};
use kscope_common::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Consumer group used by tests to observe outbound streams
pub const OBSERVER_GROUP: &str = "test-observer";

/// Create a temporary database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("kscope_test.db");
    let pool = init_database(&db_path).await.unwrap();
    (temp_dir, pool)
}

pub async fn seed_user(pool: &SqlitePool, user_id: i64, username: &str, designation: Option<&str>) {
    sqlx::query("INSERT INTO users (user_id, username, designation) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(username)
        .bind(designation)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_post(pool: &SqlitePool, post_id: i64, user_id: i64, title: &str) {
    let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    sqlx::query("INSERT INTO posts (post_id, user_id, title, body, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(post_id)
        .bind(user_id)
        .bind(title)
        .bind(format!("Body of {}", title))
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_media(pool: &SqlitePool, media_id: i64, post_id: i64, position: i64) {
    sqlx::query("INSERT INTO post_media (media_id, post_id, media_url, position) VALUES (?, ?, ?, ?)")
        .bind(media_id)
        .bind(post_id)
        .bind(format!("https://cdn.example/media/{}.jpg", media_id))
        .bind(position)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_hashtag(pool: &SqlitePool, name: &str, usage_count: i64) {
    sqlx::query("INSERT INTO hashtags (name, usage_count) VALUES (?, ?)")
        .bind(name)
        .bind(usage_count)
        .execute(pool)
        .await
        .unwrap();
}

/// User 1 "alice" owning `post_id` with the given media ids
pub async fn seed_post_with_media(pool: &SqlitePool, post_id: i64, media_ids: &[i64]) {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE user_id = 1")
        .fetch_one(pool)
        .await
        .unwrap();
    if exists == 0 {
        seed_user(pool, 1, "alice", Some("Engineering")).await;
    }
    seed_post(pool, post_id, 1, &format!("Post {}", post_id)).await;
    for (position, media_id) in media_ids.iter().enumerate() {
        seed_media(pool, *media_id, post_id, position as i64).await;
    }
}

/// Search index double that remembers every upsert
#[derive(Default)]
pub struct RecordingSearchIndex {
    pub upserts: Mutex<Vec<(String, String, Value)>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
    held: AtomicBool,
    /// Notified when a held upsert has started
    pub entered: Notify,
    /// Lets a held upsert finish
    pub release: Notify,
}

impl RecordingSearchIndex {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every upsert wait for `release` after signalling `entered`
    pub fn hold_upserts(&self, hold: bool) {
        self.held.store(hold, Ordering::SeqCst);
    }

    pub fn upserted_ids(&self, index: &str) -> Vec<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _, _)| i == index)
            .map(|(_, id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl SearchIndex for RecordingSearchIndex {
    async fn upsert(&self, index: &str, id: &str, document: &Value) -> IngestResult<()> {
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::SearchIndex("index unavailable".to_string()));
        }
        self.upserts
            .lock()
            .unwrap()
            .push((index.to_string(), id.to_string(), document.clone()));
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> IngestResult<()> {
        self.deletes.lock().unwrap().push((index.to_string(), id.to_string()));
        Ok(())
    }
}

/// Transport whose publishes always fail
pub struct FailingTransport;

#[async_trait]
impl StreamTransport for FailingTransport {
    async fn publish(&self, stream: &str, _fields: Fields) -> Result<String> {
        Err(Error::Internal(format!("log unavailable for '{}'", stream)))
    }

    async fn create_group(&self, _stream: &str, _group: &str) -> Result<()> {
        Ok(())
    }

    async fn read_group(&self, _: &str, _: &str, _: &str, _: usize) -> Result<Vec<StreamMessage>> {
        Ok(Vec::new())
    }

    async fn claim_idle(&self, _: &str, _: &str, _: &str, _: Duration, _: usize) -> Result<Vec<StreamMessage>> {
        Ok(Vec::new())
    }

    async fn ack(&self, _: &str, _: &str, _: &str) -> Result<bool> {
        Ok(false)
    }

    async fn pending_count(&self, _: &str, _: &str) -> Result<u64> {
        Ok(0)
    }

    async fn len(&self, _: &str) -> Result<u64> {
        Ok(0)
    }
}

/// Stream log wrapper that can fail publishes to one stream
pub struct SwitchableTransport {
    inner: Arc<SqliteStreamLog>,
    failing: Mutex<Option<String>>,
}

impl SwitchableTransport {
    pub fn new(inner: Arc<SqliteStreamLog>) -> Self {
        Self {
            inner,
            failing: Mutex::new(None),
        }
    }

    /// Fail publishes to `stream`, or heal with `None`
    pub fn fail_stream(&self, stream: Option<&str>) {
        *self.failing.lock().unwrap() = stream.map(str::to_string);
    }
}

#[async_trait]
impl StreamTransport for SwitchableTransport {
    async fn publish(&self, stream: &str, fields: Fields) -> Result<String> {
        let failing = self.failing.lock().unwrap().as_deref() == Some(stream);
        if failing {
            return Err(Error::Internal(format!("log unavailable for '{}'", stream)));
        }
        self.inner.publish(stream, fields).await
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        self.inner.create_group(stream, group).await
    }

    async fn read_group(&self, stream: &str, group: &str, consumer: &str, count: usize) -> Result<Vec<StreamMessage>> {
        self.inner.read_group(stream, group, consumer, count).await
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        self.inner.claim_idle(stream, group, consumer, min_idle, count).await
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<bool> {
        self.inner.ack(stream, group, message_id).await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        self.inner.pending_count(stream, group).await
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        self.inner.len(stream).await
    }
}

/// Everything a pipeline test needs, backed by one temporary database
pub struct TestPipeline {
    pub _dir: TempDir,
    pub db: SqlitePool,
    pub log: Arc<SqliteStreamLog>,
    /// Transport the pipeline publishes through, wrapping `log`
    pub transport: Arc<SwitchableTransport>,
    pub index: Arc<RecordingSearchIndex>,
    pub state: IngestState,
}

impl TestPipeline {
    pub async fn new() -> Self {
        Self::with_config(IngestConfig::default()).await
    }

    pub async fn with_config(config: IngestConfig) -> Self {
        let (dir, db) = create_test_db().await;
        let log = Arc::new(SqliteStreamLog::new(db.clone()));
        let transport = Arc::new(SwitchableTransport::new(log.clone()));
        let index = Arc::new(RecordingSearchIndex::default());
        let state = IngestState::new(db.clone(), transport.clone(), index.clone(), config);

        // Observe outbound streams from the start of the log
        for stream in ["es-sync-queue", "post-aggregation-trigger"] {
            log.create_group(stream, OBSERVER_GROUP).await.unwrap();
        }

        Self {
            _dir: dir,
            db,
            log,
            transport,
            index,
            state,
        }
    }

    /// Messages published to `stream` since the last call
    pub async fn drain(&self, stream: &str) -> Vec<StreamMessage> {
        self.log
            .read_group(stream, OBSERVER_GROUP, "observer", 1000)
            .await
            .unwrap()
    }
}

/// A delivered message with the given fields
pub fn message(stream: &str, id: &str, fields: &[(&str, &str)]) -> StreamMessage {
    let fields: Fields = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    StreamMessage::new(stream, id, fields)
}

/// Field value of a published message
pub fn field<'a>(message: &'a StreamMessage, key: &str) -> &'a str {
    message.fields.get(key).unwrap_or_default()
}
