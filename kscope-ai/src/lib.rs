//! kscope-ai library interface
//!
//! Consumes AI results from the event log, applies them to the write model,
//! projects them into read models and triggers downstream indexing and
//! aggregation. Exposed as a library for the binary and integration tests.

pub mod consumers;
pub mod db;
pub mod error;
pub mod services;
pub mod stream;
pub mod utils;

pub use crate::error::{HandlerOutcome, IngestError, IngestResult};

use kscope_common::config::IngestConfig;
use services::{AggregationTrigger, CompletionDetector, ReadModelSync, SearchIndex, SearchSyncTrigger};
use sqlx::SqlitePool;
use std::sync::Arc;
use stream::{StreamPublisher, StreamTransport};
use tokio_util::sync::CancellationToken;

/// State shared by every consumer
#[derive(Clone)]
pub struct IngestState {
    /// Write model, read models and (for the SQLite transport) the stream log
    pub db: SqlitePool,
    pub publisher: StreamPublisher,
    pub search_index: Arc<dyn SearchIndex>,
    pub read_models: ReadModelSync,
    pub completion: CompletionDetector,
    pub search_sync: SearchSyncTrigger,
    pub aggregation: AggregationTrigger,
    pub config: Arc<IngestConfig>,
    /// Fired once on shutdown; parent of every worker's token
    pub shutdown: CancellationToken,
}

impl IngestState {
    pub fn new(
        db: SqlitePool,
        transport: Arc<dyn StreamTransport>,
        search_index: Arc<dyn SearchIndex>,
        config: IngestConfig,
    ) -> Self {
        let publisher = StreamPublisher::from_config(transport, &config);
        let shutdown = CancellationToken::new();
        Self {
            read_models: ReadModelSync::new(db.clone()),
            completion: CompletionDetector::new(db.clone()),
            search_sync: SearchSyncTrigger::new(publisher.clone()),
            aggregation: AggregationTrigger::new(
                db.clone(),
                publisher.clone(),
                config.aggregation_dedup,
                config.publish_max_attempts,
                shutdown.clone(),
            ),
            db,
            publisher,
            search_index,
            config: Arc::new(config),
            shutdown,
        }
    }
}
