//! Stream transport
//!
//! An append-only log per stream with consumer groups, per-message
//! acknowledgment and a pending set for redelivery. [`SqliteStreamLog`] keeps
//! the log in the service database; anything implementing
//! [`StreamTransport`] with the same semantics can replace it.

mod publisher;
mod sqlite;
mod worker;

pub use publisher::StreamPublisher;
pub use sqlite::SqliteStreamLog;
pub use worker::{StreamWorker, WorkerSettings};

use async_trait::async_trait;
use kscope_common::events::{Fields, StreamMessage};
use kscope_common::Result;
use std::time::Duration;

/// Consumer-group event log
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Append to `stream`; returns the log-assigned message id
    async fn publish(&self, stream: &str, fields: Fields) -> Result<String>;

    /// Create `group` on `stream` positioned at the start of the log (idempotent)
    async fn create_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Deliver up to `count` never-delivered messages to `consumer`
    ///
    /// Delivered messages enter the pending set until acknowledged.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>>;

    /// Re-deliver pending messages idle for at least `min_idle` to `consumer`
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>>;

    /// Remove `message_id` from the pending set; false if it was not pending
    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<bool>;

    /// Delivered-but-unacknowledged messages for `group`
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;

    /// Messages ever appended to `stream`
    async fn len(&self, stream: &str) -> Result<u64>;
}

/// `<millis>-<sequence>` message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageId {
    pub millis: i64,
    pub sequence: i64,
}

impl MessageId {
    /// Smallest id strictly greater than `previous` at wall clock `now_ms`
    pub fn next_after(previous: Option<MessageId>, now_ms: i64) -> Self {
        match previous {
            Some(prev) if prev.millis >= now_ms => MessageId {
                millis: prev.millis,
                sequence: prev.sequence + 1,
            },
            _ => MessageId {
                millis: now_ms,
                sequence: 0,
            },
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let (millis, sequence) = text.split_once('-')?;
        Some(MessageId {
            millis: millis.parse().ok()?,
            sequence: sequence.parse().ok()?,
        })
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}
