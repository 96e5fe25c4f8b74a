//! Fan-in completion check for multi-media posts
//!
//! A read-only snapshot comparison without cross-row locking: two insights
//! for the same post committing together may both see "incomplete", or both
//! see "complete". Duplicate triggers are handled by
//! [`super::AggregationTrigger`] when idempotency keys are enabled.

use crate::db::insights;
use kscope_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error};

/// Media counts of one post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub post_id: i64,
    pub total_media: i64,
    pub processed_media: i64,
}

impl ProcessingStatus {
    pub fn is_complete(&self) -> bool {
        self.total_media > 0 && self.total_media == self.processed_media
    }
}

#[derive(Clone)]
pub struct CompletionDetector {
    db: SqlitePool,
}

impl CompletionDetector {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// True when every media item of the post has a `COMPLETED` insight
    ///
    /// A failed count is logged and reported as not complete.
    pub async fn all_media_processed_for_post(&self, post_id: i64) -> bool {
        match self.processing_status(post_id).await {
            Ok(status) => {
                debug!(
                    post_id,
                    total_media = status.total_media,
                    processed_media = status.processed_media,
                    "Post processing status"
                );
                status.is_complete()
            }
            Err(err) => {
                error!(post_id, error = %err, "Cannot check post processing status");
                false
            }
        }
    }

    pub async fn processing_status(&self, post_id: i64) -> Result<ProcessingStatus> {
        let mut conn = self.db.acquire().await?;
        let total_media = insights::count_media_for_post(&mut conn, post_id).await?;
        let processed_media = insights::count_completed_for_post(&mut conn, post_id).await?;

        Ok(ProcessingStatus {
            post_id,
            total_media,
            processed_media,
        })
    }
}
