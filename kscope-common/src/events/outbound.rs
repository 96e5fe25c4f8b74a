//! Trigger events published by the ingestion service

use super::codec::{to_fields, CodecError, FieldReader, Fields};
use super::{StreamEvent, StreamMessage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Search index operation requested for a read-model row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncOperation {
    Index,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Index => "INDEX",
            SyncOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-model tables mirrored into the search index, with their short index type
pub const INDEX_TYPES: [(&str, &str); 8] = [
    ("read_model_media_search", "media_search"),
    ("read_model_post_search", "post_search"),
    ("read_model_user_search", "user_search"),
    ("read_model_blog_search", "blog_search"),
    ("read_model_hashtag_search", "hashtag_search"),
    ("read_model_location_search", "location_search"),
    ("read_model_category_search", "category_search"),
    ("read_model_face_search", "face_search"),
];

/// Short index type for a read-model table name
pub fn index_type_for(index_name: &str) -> Option<&'static str> {
    INDEX_TYPES
        .iter()
        .find(|(table, _)| *table == index_name)
        .map(|(_, index_type)| *index_type)
}

/// Request to mirror one read-model row into the search index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSyncEvent {
    pub index_name: String,
    pub index_type: String,
    pub operation: SyncOperation,
    pub document_id: String,
    /// RFC 3339
    pub timestamp: String,
    pub correlation_id: Option<String>,
}

impl StreamEvent for IndexSyncEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        let operation = match reader.required_str("operation")?.to_ascii_uppercase().as_str() {
            "INDEX" => SyncOperation::Index,
            "DELETE" => SyncOperation::Delete,
            other => {
                return Err(reader.deserialization("operation", &format!("unknown operation '{}'", other)))
            }
        };
        Ok(Self {
            index_name: reader.required_str("indexName")?.to_string(),
            index_type: reader.required_str("indexType")?.to_string(),
            operation,
            document_id: reader.required_str("documentId")?.to_string(),
            timestamp: reader.optional_string("timestamp").unwrap_or_default(),
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        to_fields(self)
    }
}

/// Every media item of a post has been processed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationTriggerEvent {
    pub post_id: i64,
    pub total_media: i64,
    /// Comma-joined media ids
    pub all_media_ids: String,
    /// `post-<postId>-<totalMedia>`
    pub idempotency_key: String,
    /// RFC 3339
    pub timestamp: String,
    pub correlation_id: Option<String>,
}

impl AggregationTriggerEvent {
    pub fn new(post_id: i64, media_ids: &[i64], correlation_id: Option<String>) -> Self {
        let total_media = media_ids.len() as i64;
        Self {
            post_id,
            total_media,
            all_media_ids: media_ids
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(","),
            idempotency_key: Self::idempotency_key(post_id, total_media),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id,
        }
    }

    pub fn idempotency_key(post_id: i64, total_media: i64) -> String {
        format!("post-{}-{}", post_id, total_media)
    }

    /// Parsed `allMediaIds`
    pub fn media_ids(&self) -> Vec<i64> {
        self.all_media_ids
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    }
}

impl StreamEvent for AggregationTriggerEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        let post_id = reader.required_i64("postId")?;
        let total_media = reader.required_i64("totalMedia")?;
        Ok(Self {
            post_id,
            total_media,
            all_media_ids: reader.optional_string("allMediaIds").unwrap_or_default(),
            idempotency_key: reader
                .optional_string("idempotencyKey")
                .unwrap_or_else(|| Self::idempotency_key(post_id, total_media)),
            timestamp: reader.optional_string("timestamp").unwrap_or_default(),
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        to_fields(self)
    }
}
