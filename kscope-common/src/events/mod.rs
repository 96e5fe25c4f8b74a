//! Stream event types
//!
//! Every message read from the event log is decoded into an [`InboundEvent`]
//! at the transport boundary; nothing past that point reads raw fields.
//! Outbound trigger payloads live in [`outbound`].

mod codec;
mod inbound;
pub mod outbound;

pub use codec::{
    bbox_from_json, parse_bbox, parse_string_list, to_fields, CodecError, FieldReader, Fields,
};
pub use inbound::{
    FaceDetails, FaceDetectionEvent, FaceRecognitionEvent, HashtagUsageEvent, MediaInsightsEvent,
    PostInsightsEnrichedEvent,
};
pub use outbound::{index_type_for, AggregationTriggerEvent, IndexSyncEvent, SyncOperation};

use serde::{Deserialize, Serialize};

/// Stream names on the event log
pub mod streams {
    /// Media captioning / tagging / safety results
    pub const ML_INSIGHTS: &str = "ml-insights-results";
    /// Face bounding boxes and embeddings
    pub const FACE_DETECTION: &str = "face-detection-results";
    /// Suggested identity for a detected face
    pub const FACE_RECOGNITION: &str = "face-recognition-results";
    /// Post-level aggregate computed after every media item finished
    pub const POST_INSIGHTS_ENRICHED: &str = "post-insights-enriched";
    /// Hashtag usage counter deltas
    pub const HASHTAG_USAGE_SYNC: &str = "hashtag-usage-sync-stream";

    /// Read-model rows to mirror into the search index
    pub const ES_SYNC_QUEUE: &str = "es-sync-queue";
    /// All media of a post are processed; aggregate it
    pub const POST_AGGREGATION_TRIGGER: &str = "post-aggregation-trigger";

    /// Every stream consumed by the ingestion service
    pub const INBOUND: [&str; 5] = [
        ML_INSIGHTS,
        FACE_DETECTION,
        FACE_RECOGNITION,
        POST_INSIGHTS_ENRICHED,
        HASHTAG_USAGE_SYNC,
    ];
}

/// One delivered log entry
///
/// Owned by the transport. Consumers never modify a delivered message; they
/// acknowledge it or leave it pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub stream: String,
    /// Log-assigned, strictly increasing within the log
    pub id: String,
    pub fields: Fields,
}

impl StreamMessage {
    pub fn new(stream: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        Self {
            stream: stream.into(),
            id: id.into(),
            fields,
        }
    }

    /// Producer-supplied correlation id, if any
    pub fn correlation_id(&self) -> Option<&str> {
        self.fields.get(crate::correlation::CORRELATION_ID_FIELD)
    }
}

/// A payload with a flat field encoding
pub trait StreamEvent: Sized {
    /// Decode from a delivered message
    fn decode(message: &StreamMessage) -> Result<Self, CodecError>;

    /// Encode into message fields
    fn encode(&self) -> Result<Fields, CodecError>;
}

/// Typed inbound event, one variant per consumed stream
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MediaInsights(MediaInsightsEvent),
    FaceDetection(FaceDetectionEvent),
    FaceRecognition(FaceRecognitionEvent),
    PostInsightsEnriched(PostInsightsEnrichedEvent),
    HashtagUsage(HashtagUsageEvent),
}

impl InboundEvent {
    /// Decode using the event type bound to the message's stream
    pub fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        match message.stream.as_str() {
            streams::ML_INSIGHTS => MediaInsightsEvent::decode(message).map(Self::MediaInsights),
            streams::FACE_DETECTION => FaceDetectionEvent::decode(message).map(Self::FaceDetection),
            streams::FACE_RECOGNITION => {
                FaceRecognitionEvent::decode(message).map(Self::FaceRecognition)
            }
            streams::POST_INSIGHTS_ENRICHED => {
                PostInsightsEnrichedEvent::decode(message).map(Self::PostInsightsEnriched)
            }
            streams::HASHTAG_USAGE_SYNC => HashtagUsageEvent::decode(message).map(Self::HashtagUsage),
            other => Err(CodecError::UnknownStream(other.to_string())),
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::MediaInsights(_) => "media_insights",
            InboundEvent::FaceDetection(_) => "face_detection",
            InboundEvent::FaceRecognition(_) => "face_recognition",
            InboundEvent::PostInsightsEnriched(_) => "post_insights_enriched",
            InboundEvent::HashtagUsage(_) => "hashtag_usage",
        }
    }
}
