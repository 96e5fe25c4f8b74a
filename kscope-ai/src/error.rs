//! Error types for kscope-ai
//!
//! Handlers return a [`HandlerOutcome`]; the stream worker turns it into
//! "acknowledge" or "leave pending". [`IngestError`] carries the failure
//! kinds the worker logs and alerts on.

use kscope_common::events::CodecError;
use thiserror::Error;

/// Ingestion failure
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed message shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Malformed bounding box, alerted apart from other shape errors
    #[error("Bbox parsing error: {0}")]
    BboxParsing(String),

    /// Required parent entity missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Anything unexpected while processing one message
    #[error("Stream processing failed for message {message_id} on '{stream}': {reason}")]
    StreamProcessing {
        stream: String,
        message_id: String,
        reason: String,
    },

    /// Downstream publish failed on a critical stream
    #[error("Publish to '{stream}' failed: {reason}")]
    Publish { stream: String, reason: String },

    /// Search index write failed
    #[error("Search index error: {0}")]
    SearchIndex(String),

    /// Database error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// kscope-common error
    #[error("Common error: {0}")]
    Common(kscope_common::Error),
}

impl IngestError {
    /// Wrap an unexpected failure with the message it happened on
    pub fn processing(stream: &str, message_id: &str, err: impl std::fmt::Display) -> Self {
        IngestError::StreamProcessing {
            stream: stream.to_string(),
            message_id: message_id.to_string(),
            reason: err.to_string(),
        }
    }

    /// Redelivery can never fix this message
    pub fn is_poison(&self) -> bool {
        matches!(self, IngestError::Deserialization(_) | IngestError::BboxParsing(_))
    }
}

impl From<kscope_common::Error> for IngestError {
    fn from(err: kscope_common::Error) -> Self {
        match err {
            kscope_common::Error::NotFound(what) => IngestError::NotFound(what),
            kscope_common::Error::Database(db) => IngestError::Database(db),
            other => IngestError::Common(other),
        }
    }
}

impl From<CodecError> for IngestError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BboxParsing { .. } => IngestError::BboxParsing(err.to_string()),
            other => IngestError::Deserialization(other.to_string()),
        }
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// What a handler decided about one delivered message
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Applied; acknowledge
    Processed,
    /// Nothing to do (benign race, malformed-but-harmless input); acknowledge
    Skip(String),
    /// Leave pending; redelivery is expected to succeed
    Retryable(IngestError),
    /// Leave pending; needs operator attention
    Fatal(IngestError),
}

impl HandlerOutcome {
    pub fn acknowledges(&self) -> bool {
        matches!(self, HandlerOutcome::Processed | HandlerOutcome::Skip(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            HandlerOutcome::Processed => "processed",
            HandlerOutcome::Skip(_) => "skipped",
            HandlerOutcome::Retryable(_) => "retryable",
            HandlerOutcome::Fatal(_) => "fatal",
        }
    }
}

impl From<IngestError> for HandlerOutcome {
    fn from(err: IngestError) -> Self {
        if err.is_poison() {
            HandlerOutcome::Fatal(err)
        } else {
            HandlerOutcome::Retryable(err)
        }
    }
}

impl From<IngestResult<()>> for HandlerOutcome {
    fn from(result: IngestResult<()>) -> Self {
        match result {
            Ok(()) => HandlerOutcome::Processed,
            Err(err) => err.into(),
        }
    }
}
