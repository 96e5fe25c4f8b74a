//! Consumer-group polling loop, one per inbound stream

use super::StreamTransport;
use crate::consumers::Dispatcher;
use crate::error::{HandlerOutcome, IngestResult};
use kscope_common::config::IngestConfig;
use kscope_common::events::StreamMessage;
use kscope_common::CorrelationId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Polling parameters for one worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub redelivery_timeout: Duration,
    pub pending_report_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &IngestConfig, consumer: &str) -> Self {
        Self {
            group: config.consumer_group.clone(),
            consumer: consumer.to_string(),
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            redelivery_timeout: Duration::from_millis(config.redelivery_timeout_ms),
            pending_report_interval: Duration::from_millis(config.pending_report_interval_ms),
        }
    }
}

/// Reads one stream and hands each message to the dispatcher
pub struct StreamWorker {
    stream: String,
    transport: Arc<dyn StreamTransport>,
    dispatcher: Dispatcher,
    settings: WorkerSettings,
}

impl StreamWorker {
    pub fn new(
        stream: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        dispatcher: Dispatcher,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            stream: stream.into(),
            transport,
            dispatcher,
            settings,
        }
    }

    /// Ensure the consumer group exists
    pub async fn prepare(&self) -> IngestResult<()> {
        self.transport
            .create_group(&self.stream, &self.settings.group)
            .await?;
        Ok(())
    }

    /// Poll until `cancel` fires; stops at the next loop boundary
    pub async fn run(self, cancel: CancellationToken) -> IngestResult<()> {
        self.prepare().await?;
        info!(
            stream = %self.stream,
            group = %self.settings.group,
            consumer = %self.settings.consumer,
            "Stream worker started"
        );

        let mut last_report = Instant::now();

        while !cancel.is_cancelled() {
            let handled = match self.poll_once().await {
                Ok(count) => count,
                Err(err) => {
                    error!(stream = %self.stream, error = %err, "Stream poll failed");
                    0
                }
            };

            if last_report.elapsed() >= self.settings.pending_report_interval {
                self.report_pending().await;
                last_report = Instant::now();
            }

            if handled == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        info!(stream = %self.stream, "Stream worker stopped");
        Ok(())
    }

    /// Reclaim idle pending messages, then read new ones; returns how many were handled
    pub async fn poll_once(&self) -> IngestResult<usize> {
        let settings = &self.settings;

        let mut messages = self
            .transport
            .claim_idle(
                &self.stream,
                &settings.group,
                &settings.consumer,
                settings.redelivery_timeout,
                settings.batch_size,
            )
            .await?;
        if !messages.is_empty() {
            info!(stream = %self.stream, count = messages.len(), "Redelivering idle pending messages");
        }

        messages.extend(
            self.transport
                .read_group(&self.stream, &settings.group, &settings.consumer, settings.batch_size)
                .await?,
        );

        for message in &messages {
            self.handle(message).await;
        }
        Ok(messages.len())
    }

    async fn handle(&self, message: &StreamMessage) -> HandlerOutcome {
        let correlation_id = CorrelationId::from_optional(message.correlation_id());
        let span = info_span!(
            "message",
            stream = %message.stream,
            message_id = %message.id,
            correlation_id = %correlation_id
        );

        async {
            let outcome = self.dispatcher.dispatch(message, &correlation_id).await;

            match &outcome {
                HandlerOutcome::Processed => debug!("Message processed"),
                HandlerOutcome::Skip(reason) => info!(reason = %reason, "Message skipped"),
                HandlerOutcome::Retryable(err) => {
                    warn!(error = %err, "Message left pending for redelivery")
                }
                HandlerOutcome::Fatal(err) => error!(
                    error = %err,
                    "Poison message left pending, needs operator attention"
                ),
            }

            if outcome.acknowledges() {
                match self
                    .transport
                    .ack(&message.stream, &self.settings.group, &message.id)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => debug!("Message was no longer pending at ack time"),
                    Err(err) => error!(error = %err, "Acknowledge failed, message will be redelivered"),
                }
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn report_pending(&self) {
        match self
            .transport
            .pending_count(&self.stream, &self.settings.group)
            .await
        {
            Ok(0) => debug!(stream = %self.stream, "No pending messages"),
            Ok(pending) => info!(stream = %self.stream, pending, "Pending-set depth"),
            Err(err) => warn!(stream = %self.stream, error = %err, "Cannot read pending-set depth"),
        }
    }
}
