//! Events published by the external AI services and the CRUD layer

use super::codec::{bbox_from_json, to_fields, CodecError, FieldReader, Fields};
use super::{StreamEvent, StreamMessage};
use crate::db::BoundingBox;
use serde::Serialize;
use serde_json::{json, Value};

/// Caption, tags, scenes and safety verdict for one media item
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInsightsEvent {
    pub media_id: i64,
    pub is_safe: bool,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    pub scenes: Vec<String>,
    pub image_embedding: Option<String>,
    pub correlation_id: Option<String>,
}

impl StreamEvent for MediaInsightsEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        Ok(Self {
            media_id: reader.required_i64("mediaId")?,
            is_safe: reader.bool_or("isSafe", false)?,
            caption: reader.optional_string("caption"),
            tags: reader.string_list("tags"),
            scenes: reader.string_list("scenes"),
            image_embedding: reader.optional_string("imageEmbedding"),
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        to_fields(self)
    }
}

/// One face found by the detector
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetails {
    pub bbox: BoundingBox,
    /// Opaque vector text
    pub embedding: Option<String>,
    pub confidence: Option<f64>,
}

impl FaceDetails {
    fn from_json(reader: &FieldReader<'_>, item: &Value) -> Result<Self, CodecError> {
        let bbox_value = item.get("bbox").filter(|v| !v.is_null());
        let bbox = match bbox_value {
            Some(value) => bbox_from_json(value).map_err(|reason| reader.bbox_error(&value.to_string(), &reason))?,
            None => return Err(reader.bbox_error("", "bbox is missing")),
        };

        let embedding = match item.get("embedding") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            bbox,
            embedding,
            confidence: item.get("confidence").and_then(Value::as_f64),
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "bbox": self.bbox.to_array(),
            "embedding": self.embedding,
            "confidence": self.confidence,
        })
    }
}

/// Faces detected in one media item
///
/// Accepts the flat single-face shape `{mediaId, bbox, embedding}` and the
/// batch shape `{mediaId, postId, faces: [...]}`; both decode to a face list.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetectionEvent {
    pub media_id: i64,
    pub post_id: Option<i64>,
    pub faces: Vec<FaceDetails>,
    pub correlation_id: Option<String>,
}

impl StreamEvent for FaceDetectionEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        let media_id = reader.required_i64("mediaId")?;
        let post_id = reader.optional_i64("postId")?;

        let faces = match reader.json("faces")? {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| FaceDetails::from_json(&reader, item))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(reader.deserialization("faces", "expected a JSON array")),
            None if reader.optional_str("bbox").is_some() => vec![FaceDetails {
                bbox: reader.bbox("bbox")?,
                embedding: reader.optional_string("embedding"),
                confidence: match reader.optional_str("confidence") {
                    Some(_) => Some(reader.required_f64("confidence")?),
                    None => None,
                },
            }],
            None if reader.optional_str("embedding").is_some() => {
                let raw = message.fields.get("bbox").unwrap_or_default();
                return Err(reader.bbox_error(raw, "bbox is missing"));
            }
            None => Vec::new(),
        };

        Ok(Self {
            media_id,
            post_id,
            faces,
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        let faces: Vec<Value> = self.faces.iter().map(FaceDetails::to_json).collect();
        let mut fields = Fields::new()
            .with("mediaId", self.media_id.to_string())
            .with("facesDetected", self.faces.len().to_string())
            .with("faces", Value::Array(faces).to_string());
        if let Some(post_id) = self.post_id {
            fields.insert("postId", post_id.to_string());
        }
        if let Some(correlation_id) = &self.correlation_id {
            fields.insert("correlationId", correlation_id.clone());
        }
        Ok(fields)
    }
}

/// Suggested identity for a previously detected face
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRecognitionEvent {
    pub face_id: i64,
    pub suggested_user_id: i64,
    pub confidence_score: f64,
    pub correlation_id: Option<String>,
}

impl StreamEvent for FaceRecognitionEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        Ok(Self {
            face_id: reader.required_i64("faceId")?,
            suggested_user_id: reader.required_i64("suggestedUserId")?,
            confidence_score: reader.required_f64("confidenceScore")?,
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        to_fields(self)
    }
}

/// Post-level aggregate produced after every media item of a post finished
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInsightsEnrichedEvent {
    /// Absent on malformed producer output; such messages are skipped
    pub post_id: Option<i64>,
    pub all_ai_tags: Vec<String>,
    pub all_ai_scenes: Vec<String>,
    pub inferred_event_type: Option<String>,
    pub inferred_tags: Vec<String>,
    pub timestamp: Option<String>,
    pub correlation_id: Option<String>,
}

impl StreamEvent for PostInsightsEnrichedEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        Ok(Self {
            post_id: reader.optional_i64("postId")?,
            all_ai_tags: reader.string_list("allAiTags"),
            all_ai_scenes: reader.string_list("allAiScenes"),
            inferred_event_type: reader.optional_string("inferredEventType"),
            inferred_tags: reader.string_list("inferredTags"),
            timestamp: reader.optional_string("timestamp"),
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        to_fields(self)
    }
}

/// Signed change to a hashtag's usage counter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashtagUsageEvent {
    pub hashtag_name: String,
    pub change: i32,
    /// Producer clock, epoch milliseconds
    pub timestamp: Option<i64>,
    pub correlation_id: Option<String>,
}

impl HashtagUsageEvent {
    /// Producer-side constructor; hashtag names are matched lower-cased
    pub fn new(hashtag_name: &str, change: i32) -> Self {
        Self {
            hashtag_name: hashtag_name.trim().to_lowercase(),
            change,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl StreamEvent for HashtagUsageEvent {
    fn decode(message: &StreamMessage) -> Result<Self, CodecError> {
        let reader = FieldReader::new(message);
        Ok(Self {
            hashtag_name: reader.required_str("hashtagName")?.to_string(),
            change: reader.required_i32("change")?,
            timestamp: reader.optional_i64("timestamp")?,
            correlation_id: reader.optional_string("correlationId"),
        })
    }

    fn encode(&self) -> Result<Fields, CodecError> {
        to_fields(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{streams, InboundEvent};

    fn message(stream: &str, fields: &[(&str, &str)]) -> StreamMessage {
        StreamMessage::new(stream, "1700000000000-7", fields.iter().copied().collect())
    }

    #[test]
    fn test_media_insights_tags_survive_encoding() {
        let event = MediaInsightsEvent {
            media_id: 7,
            is_safe: true,
            caption: Some("a beach".to_string()),
            tags: vec!["a".to_string(), "b".to_string()],
            scenes: vec![],
            image_embedding: Some("[0.1,0.2]".to_string()),
            correlation_id: Some("corr-1".to_string()),
        };

        let fields = event.encode().unwrap();
        let decoded =
            MediaInsightsEvent::decode(&StreamMessage::new(streams::ML_INSIGHTS, "1-1", fields)).unwrap();

        assert_eq!(decoded.tags, vec!["a", "b"]);
        assert!(decoded.scenes.is_empty());
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_media_insights_legacy_csv_and_missing_lists() {
        let msg = message(streams::ML_INSIGHTS, &[("mediaId", "7"), ("tags", "a,b"), ("isSafe", "true")]);
        let event = MediaInsightsEvent::decode(&msg).unwrap();
        assert_eq!(event.tags, vec!["a", "b"]);
        assert_eq!(event.scenes, Vec::<String>::new());
        assert!(event.is_safe);
        assert_eq!(event.caption, None);
    }

    #[test]
    fn test_media_insights_bad_media_id() {
        let msg = message(streams::ML_INSIGHTS, &[("mediaId", "x7")]);
        assert!(matches!(
            MediaInsightsEvent::decode(&msg),
            Err(CodecError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_face_detection_single_shape() {
        let msg = message(
            streams::FACE_DETECTION,
            &[("mediaId", "7"), ("bbox", "10,20,30,40"), ("embedding", "[0.5,0.25]")],
        );
        let event = FaceDetectionEvent::decode(&msg).unwrap();
        assert_eq!(event.faces.len(), 1);
        assert_eq!(event.faces[0].bbox, BoundingBox::from_array([10, 20, 30, 40]));
        assert_eq!(event.faces[0].embedding.as_deref(), Some("[0.5,0.25]"));
    }

    #[test]
    fn test_face_detection_batch_shape() {
        let faces = r#"[{"bbox":[1,2,3,4],"embedding":[0.1,0.2],"confidence":0.9},{"bbox":"5,6,7,8"}]"#;
        let msg = message(streams::FACE_DETECTION, &[("mediaId", "7"), ("postId", "3"), ("faces", faces)]);
        let event = FaceDetectionEvent::decode(&msg).unwrap();

        assert_eq!(event.post_id, Some(3));
        assert_eq!(event.faces.len(), 2);
        assert_eq!(event.faces[0].embedding.as_deref(), Some("[0.1,0.2]"));
        assert_eq!(event.faces[0].confidence, Some(0.9));
        assert_eq!(event.faces[1].bbox, BoundingBox::from_array([5, 6, 7, 8]));
        assert_eq!(event.faces[1].embedding, None);

        let reencoded = event.encode().unwrap();
        let again = FaceDetectionEvent::decode(&StreamMessage::new(streams::FACE_DETECTION, "1-2", reencoded)).unwrap();
        assert_eq!(again, event);
    }

    #[test]
    fn test_face_detection_bad_bbox_is_distinct_error() {
        let msg = message(streams::FACE_DETECTION, &[("mediaId", "7"), ("bbox", "10,20,bad")]);
        assert!(matches!(
            FaceDetectionEvent::decode(&msg),
            Err(CodecError::BboxParsing { .. })
        ));

        let batch = message(streams::FACE_DETECTION, &[("mediaId", "7"), ("faces", r#"[{"bbox":[1,2]}]"#)]);
        assert!(matches!(
            FaceDetectionEvent::decode(&batch),
            Err(CodecError::BboxParsing { .. })
        ));
    }

    #[test]
    fn test_face_detection_embedding_without_bbox_is_bbox_error() {
        for bbox in [None, Some(""), Some("null")] {
            let mut fields = vec![("mediaId", "7"), ("embedding", "[0.5,0.25]")];
            if let Some(bbox) = bbox {
                fields.push(("bbox", bbox));
            }
            let msg = message(streams::FACE_DETECTION, &fields);
            match FaceDetectionEvent::decode(&msg) {
                Err(CodecError::BboxParsing { reason, .. }) => assert_eq!(reason, "bbox is missing"),
                other => panic!("expected bbox error for {:?}, got {:?}", bbox, other),
            }
        }
    }

    #[test]
    fn test_face_detection_without_faces_is_empty() {
        let msg = message(streams::FACE_DETECTION, &[("mediaId", "7"), ("facesDetected", "0")]);
        assert!(FaceDetectionEvent::decode(&msg).unwrap().faces.is_empty());
    }

    #[test]
    fn test_face_recognition_decode() {
        let msg = message(
            streams::FACE_RECOGNITION,
            &[("faceId", "11"), ("suggestedUserId", "4"), ("confidenceScore", "0.87"), ("correlationId", "c-9")],
        );
        let event = FaceRecognitionEvent::decode(&msg).unwrap();
        assert_eq!(event.face_id, 11);
        assert_eq!(event.suggested_user_id, 4);
        assert!((event.confidence_score - 0.87).abs() < f64::EPSILON);
        assert_eq!(event.correlation_id.as_deref(), Some("c-9"));

        let bad = message(streams::FACE_RECOGNITION, &[("faceId", "11"), ("suggestedUserId", "4"), ("confidenceScore", "high")]);
        assert!(matches!(FaceRecognitionEvent::decode(&bad), Err(CodecError::Deserialization { .. })));
    }

    #[test]
    fn test_post_insights_null_post_id() {
        let msg = message(streams::POST_INSIGHTS_ENRICHED, &[("postId", "null"), ("allAiTags", r#"["x"]"#)]);
        let event = PostInsightsEnrichedEvent::decode(&msg).unwrap();
        assert_eq!(event.post_id, None);
        assert_eq!(event.all_ai_tags, vec!["x"]);
        assert!(event.inferred_tags.is_empty());
    }

    #[test]
    fn test_hashtag_usage_producer_lowercases() {
        let event = HashtagUsageEvent::new("  RustLang ", -1).with_correlation_id("c-1");
        assert_eq!(event.hashtag_name, "rustlang");

        let fields = event.encode().unwrap();
        assert_eq!(fields.get("change"), Some("-1"));
        let decoded = HashtagUsageEvent::decode(&StreamMessage::new(streams::HASHTAG_USAGE_SYNC, "1-1", fields)).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_inbound_dispatch_by_stream() {
        let msg = message(streams::HASHTAG_USAGE_SYNC, &[("hashtagName", "rust"), ("change", "2")]);
        let event = InboundEvent::decode(&msg).unwrap();
        assert_eq!(event.kind(), "hashtag_usage");

        let unknown = message("mystery", &[]);
        assert!(matches!(InboundEvent::decode(&unknown), Err(CodecError::UnknownStream(_))));
    }
}
