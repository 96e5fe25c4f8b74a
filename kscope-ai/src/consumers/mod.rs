//! Per-event consumers
//!
//! The [`Dispatcher`] decodes each delivered message into an
//! [`InboundEvent`] and routes it to the handler for its event type. Every
//! handler returns a [`HandlerOutcome`]; none of them acknowledges directly.

pub mod face_detection;
pub mod face_recognition;
pub mod hashtag_usage;
pub mod media_insights;
pub mod post_insights_enriched;

use crate::error::{HandlerOutcome, IngestError, IngestResult};
use crate::IngestState;
use kscope_common::events::{InboundEvent, StreamMessage};
use kscope_common::CorrelationId;
use tracing::debug;

/// Identity of the message being processed
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub stream: String,
    pub message_id: String,
    pub correlation_id: CorrelationId,
}

impl MessageContext {
    pub fn new(message: &StreamMessage, correlation_id: CorrelationId) -> Self {
        Self {
            stream: message.stream.clone(),
            message_id: message.id.clone(),
            correlation_id,
        }
    }

    /// Turn a handler result into an outcome
    ///
    /// Failures without a more specific kind become `StreamProcessing`
    /// carrying this message's stream and id.
    pub fn outcome(&self, result: IngestResult<HandlerOutcome>) -> HandlerOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(err) => self.wrap_unexpected(err).into(),
        }
    }

    fn wrap_unexpected(&self, err: IngestError) -> IngestError {
        match err {
            IngestError::Database(_) | IngestError::Common(_) | IngestError::SearchIndex(_) => {
                IngestError::processing(&self.stream, &self.message_id, err)
            }
            other => other,
        }
    }
}

/// Routes decoded events to their handlers
#[derive(Clone)]
pub struct Dispatcher {
    state: IngestState,
}

impl Dispatcher {
    pub fn new(state: IngestState) -> Self {
        Self { state }
    }

    pub async fn dispatch(&self, message: &StreamMessage, correlation_id: &CorrelationId) -> HandlerOutcome {
        let event = match InboundEvent::decode(message) {
            Ok(event) => event,
            Err(err) => return IngestError::from(err).into(),
        };

        let ctx = MessageContext::new(message, correlation_id.clone());
        debug!(kind = event.kind(), "Dispatching event");

        let state = &self.state;
        let result = match event {
            InboundEvent::MediaInsights(event) => media_insights::handle(state, &ctx, event).await,
            InboundEvent::FaceDetection(event) => face_detection::handle(state, &ctx, event).await,
            InboundEvent::FaceRecognition(event) => face_recognition::handle(state, &ctx, event).await,
            InboundEvent::PostInsightsEnriched(event) => {
                post_insights_enriched::handle(state, &ctx, event).await
            }
            InboundEvent::HashtagUsage(event) => hashtag_usage::handle(state, &ctx, event).await,
        };

        ctx.outcome(result)
    }
}
