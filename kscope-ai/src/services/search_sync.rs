//! Index-sync trigger for read-model rows

use crate::stream::StreamPublisher;
use kscope_common::events::{index_type_for, streams, IndexSyncEvent, SyncOperation};
use kscope_common::CorrelationId;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct SearchSyncTrigger {
    publisher: StreamPublisher,
}

impl SearchSyncTrigger {
    pub fn new(publisher: StreamPublisher) -> Self {
        Self { publisher }
    }

    /// Ask the indexer to mirror one read-model row
    ///
    /// Never fails: an unknown table or a publish failure is logged and the
    /// caller carries on. Returns whether an event was published.
    pub async fn trigger_sync(
        &self,
        index_name: &str,
        operation: SyncOperation,
        document_id: &str,
        correlation_id: &CorrelationId,
    ) -> bool {
        let Some(index_type) = index_type_for(index_name) else {
            warn!(index_name, document_id, "Unknown read-model table, index sync not triggered");
            return false;
        };

        let event = IndexSyncEvent {
            index_name: index_name.to_string(),
            index_type: index_type.to_string(),
            operation,
            document_id: document_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: Some(correlation_id.to_string()),
        };

        match self.publisher.publish_event(streams::ES_SYNC_QUEUE, &event).await {
            Ok(Some(message_id)) => {
                debug!(index_name, document_id, %operation, %message_id, "Index sync triggered");
                true
            }
            Ok(None) => false,
            Err(err) => {
                error!(index_name, document_id, error = %err, "Failed to trigger index sync");
                false
            }
        }
    }
}
