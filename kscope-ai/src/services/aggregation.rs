//! Post aggregation trigger

use crate::db::aggregation;
use crate::stream::StreamPublisher;
use kscope_common::config::AggregationDedup;
use kscope_common::events::{streams, AggregationTriggerEvent};
use kscope_common::{CorrelationId, Result};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Result of one trigger attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Published(String),
    /// Same idempotency key already recorded for the post
    Duplicate,
    Failed,
}

#[derive(Clone)]
pub struct AggregationTrigger {
    db: SqlitePool,
    publisher: StreamPublisher,
    dedup: AggregationDedup,
    max_attempts: u32,
    shutdown: CancellationToken,
}

impl AggregationTrigger {
    pub fn new(
        db: SqlitePool,
        publisher: StreamPublisher,
        dedup: AggregationDedup,
        max_attempts: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            publisher,
            dedup,
            max_attempts,
            shutdown,
        }
    }

    /// Publish `post-aggregation-trigger` for a fully processed post
    ///
    /// With idempotency keys enabled a key already recorded for the post
    /// publishes nothing, and the key is recorded only after a successful
    /// publish. The publish is retried up to `max_attempts` times unless
    /// shutdown begins. Failures are logged, never raised.
    pub async fn trigger_aggregation(
        &self,
        post_id: i64,
        media_ids: &[i64],
        correlation_id: &CorrelationId,
    ) -> TriggerOutcome {
        let event = AggregationTriggerEvent::new(post_id, media_ids, Some(correlation_id.to_string()));
        let dedup = self.dedup == AggregationDedup::IdempotencyKey;

        if dedup {
            match self.already_triggered(&event).await {
                Ok(false) => {}
                Ok(true) => {
                    info!(
                        post_id,
                        idempotency_key = %event.idempotency_key,
                        "Aggregation already triggered, skipping duplicate"
                    );
                    return TriggerOutcome::Duplicate;
                }
                Err(err) => {
                    error!(post_id, error = %err, "Cannot check aggregation trigger");
                    return TriggerOutcome::Failed;
                }
            }
        }

        let message_id = match self
            .publisher
            .publish_with_retry(
                streams::POST_AGGREGATION_TRIGGER,
                &event,
                self.max_attempts,
                &self.shutdown,
            )
            .await
        {
            Ok(message_id) => message_id,
            Err(err) => {
                error!(post_id, error = %err, "Failed to trigger post aggregation");
                return TriggerOutcome::Failed;
            }
        };

        info!(
            post_id,
            total_media = event.total_media,
            %message_id,
            "Post aggregation triggered"
        );

        if dedup {
            if let Err(err) = self.record(&event).await {
                warn!(post_id, error = %err, "Cannot record aggregation trigger");
            }
        }
        TriggerOutcome::Published(message_id)
    }

    async fn already_triggered(&self, event: &AggregationTriggerEvent) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        aggregation::is_recorded(&mut conn, event.post_id, &event.idempotency_key).await
    }

    async fn record(&self, event: &AggregationTriggerEvent) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        aggregation::record_trigger(&mut conn, event.post_id, event.total_media, &event.idempotency_key).await
    }
}
