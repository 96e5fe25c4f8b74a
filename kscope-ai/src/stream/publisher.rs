//! Publisher with per-stream criticality
//!
//! Publish failures on a critical stream reach the caller as
//! [`IngestError::Publish`]. On every other stream they are logged and
//! swallowed; a missed trigger there is recovered by a later reconciliation
//! pass.

use super::StreamTransport;
use crate::error::{IngestError, IngestResult};
use kscope_common::config::IngestConfig;
use kscope_common::events::{to_fields, CodecError, Fields, StreamEvent};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Publishes payloads onto the stream log
#[derive(Clone)]
pub struct StreamPublisher {
    transport: Arc<dyn StreamTransport>,
    critical_streams: Arc<HashSet<String>>,
}

impl StreamPublisher {
    pub fn new<I, S>(transport: Arc<dyn StreamTransport>, critical_streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transport,
            critical_streams: Arc::new(critical_streams.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_config(transport: Arc<dyn StreamTransport>, config: &IngestConfig) -> Self {
        Self::new(transport, config.critical_streams.iter().cloned())
    }

    pub fn is_critical(&self, stream: &str) -> bool {
        self.critical_streams.contains(stream)
    }

    /// Publish a serializable payload (must serialize to a JSON object)
    ///
    /// Returns the message id, or `None` when a non-critical publish failed.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        stream: &str,
        payload: &T,
    ) -> IngestResult<Option<String>> {
        self.deliver(stream, to_fields(payload)).await
    }

    /// Publish a typed event using its own field encoding
    pub async fn publish_event<E: StreamEvent>(
        &self,
        stream: &str,
        event: &E,
    ) -> IngestResult<Option<String>> {
        self.deliver(stream, event.encode()).await
    }

    /// Publish with up to `max_attempts` tries, backing off `attempt` seconds between them
    ///
    /// Final failure is always an error, whatever the stream's criticality.
    /// Firing `cancel` during a backoff abandons the remaining attempts.
    pub async fn publish_with_retry<T: Serialize + ?Sized>(
        &self,
        stream: &str,
        payload: &T,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> IngestResult<String> {
        let fields = to_fields(payload).map_err(|e| publish_error(stream, e))?;
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.transport.publish(stream, fields.clone()).await {
                Ok(message_id) => {
                    if attempt > 1 {
                        debug!(stream, attempt, %message_id, "Publish succeeded after retry");
                    }
                    return Ok(message_id);
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt == max_attempts {
                        break;
                    }

                    let backoff = Duration::from_secs(u64::from(attempt));
                    warn!(
                        stream,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %last_error,
                        "Publish failed, will retry after backoff"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(stream, attempt, "Publish retry cancelled");
                            return Err(IngestError::Publish {
                                stream: stream.to_string(),
                                reason: format!("cancelled after {} attempts: {}", attempt, last_error),
                            });
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        error!(stream, max_attempts, error = %last_error, "Publish failed after all retries");
        Err(IngestError::Publish {
            stream: stream.to_string(),
            reason: format!("failed after {} attempts: {}", max_attempts, last_error),
        })
    }

    async fn deliver(
        &self,
        stream: &str,
        fields: Result<Fields, CodecError>,
    ) -> IngestResult<Option<String>> {
        let outcome = match fields {
            Ok(fields) => self.transport.publish(stream, fields).await.map_err(|e| e.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(message_id) => {
                debug!(stream, %message_id, "Published message");
                Ok(Some(message_id))
            }
            Err(reason) if self.is_critical(stream) => {
                error!(stream, error = %reason, "Publish to critical stream failed");
                Err(IngestError::Publish {
                    stream: stream.to_string(),
                    reason,
                })
            }
            Err(reason) => {
                warn!(stream, error = %reason, "Publish to non-critical stream failed, continuing");
                Ok(None)
            }
        }
    }
}

fn publish_error(stream: &str, err: CodecError) -> IngestError {
    IngestError::Publish {
        stream: stream.to_string(),
        reason: err.to_string(),
    }
}
