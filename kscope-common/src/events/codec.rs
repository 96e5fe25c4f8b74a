//! Flat field codec
//!
//! Stream messages carry an ordered list of string key/value pairs. Typed
//! events are flattened into that shape (lists and maps become embedded JSON
//! text) and read back with [`FieldReader`], which reports failures with the
//! stream name and message id of the offending message.

use super::StreamMessage;
use crate::db::BoundingBox;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Encode/decode failures
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed message shape (missing field, bad number, bad JSON)
    #[error("cannot deserialize field '{field}' of message {message_id} on '{stream}': {reason}")]
    Deserialization {
        stream: String,
        message_id: String,
        field: String,
        reason: String,
    },

    /// Malformed bounding box, reported apart from other shape errors
    #[error("cannot parse bbox '{value}' of message {message_id} on '{stream}': {reason}")]
    BboxParsing {
        stream: String,
        message_id: String,
        value: String,
        reason: String,
    },

    /// Payload could not be flattened into fields
    #[error("cannot serialize event: {0}")]
    Serialization(String),

    /// No event type is bound to this stream
    #[error("no event type is bound to stream '{0}'")]
    UnknownStream(String),
}

/// Ordered string-keyed message fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set `key`, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder form of [`Fields::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// Flatten a serializable payload into message fields
///
/// Strings are copied, numbers and booleans use their text form, lists and
/// maps become embedded JSON text and nulls are omitted. The payload must
/// serialize to a JSON object.
pub fn to_fields<T: Serialize + ?Sized>(payload: &T) -> Result<Fields, CodecError> {
    let value = serde_json::to_value(payload).map_err(|e| CodecError::Serialization(e.to_string()))?;

    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(CodecError::Serialization(format!(
                "payload must serialize to an object, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut fields = Fields::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::String(s) => fields.insert(key, s),
            Value::Bool(b) => fields.insert(key, b.to_string()),
            Value::Number(n) => fields.insert(key, n.to_string()),
            nested @ (Value::Array(_) | Value::Object(_)) => fields.insert(key, nested.to_string()),
        }
    }
    Ok(fields)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a list field: JSON array text first, comma-joined text second
///
/// Empty or missing input yields an empty list. Non-string JSON elements
/// keep their JSON text form.
pub fn parse_string_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty() && *s != "null") else {
        return Vec::new();
    };

    if raw.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<Value>>(raw) {
            return values
                .into_iter()
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect();
        }
        tracing::warn!(value = raw, "List field is not valid JSON, falling back to comma-separated parsing");
    }

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a bounding box from JSON array text or comma-joined text
///
/// The error string is the reason only; callers attach message context.
pub fn parse_bbox(raw: &str) -> Result<BoundingBox, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("bbox is empty".to_string());
    }

    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON array: {}", e))?;
        return bbox_from_values(&values);
    }

    let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected 4 coordinates, found {}", parts.len()));
    }
    let mut coords = [0i32; 4];
    for (slot, part) in coords.iter_mut().zip(&parts) {
        *slot = parse_coordinate(part)?;
    }
    Ok(BoundingBox::from_array(coords))
}

/// Bounding box from already-parsed JSON values (array or embedded text)
pub fn bbox_from_json(value: &Value) -> Result<BoundingBox, String> {
    match value {
        Value::Array(values) => bbox_from_values(values),
        Value::String(text) => parse_bbox(text),
        other => Err(format!("expected an array, found {}", json_kind(other))),
    }
}

fn bbox_from_values(values: &[Value]) -> Result<BoundingBox, String> {
    if values.len() != 4 {
        return Err(format!("expected 4 coordinates, found {}", values.len()));
    }
    let mut coords = [0i32; 4];
    for (slot, value) in coords.iter_mut().zip(values) {
        *slot = match value {
            Value::Number(n) => number_to_coordinate(n.as_f64())?,
            Value::String(s) => parse_coordinate(s)?,
            other => return Err(format!("coordinate must be a number, found {}", json_kind(other))),
        };
    }
    Ok(BoundingBox::from_array(coords))
}

fn parse_coordinate(text: &str) -> Result<i32, String> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i32>() {
        return Ok(v);
    }
    // Some detectors emit float pixel coordinates; they are truncated
    number_to_coordinate(text.parse::<f64>().ok())
        .map_err(|_| format!("'{}' is not a coordinate", text))
}

fn number_to_coordinate(value: Option<f64>) -> Result<i32, String> {
    match value {
        Some(v) if v.is_finite() && v >= i32::MIN as f64 && v <= i32::MAX as f64 => Ok(v as i32),
        _ => Err("coordinate out of range".to_string()),
    }
}

/// Typed access to the fields of one message
pub struct FieldReader<'a> {
    message: &'a StreamMessage,
}

impl<'a> FieldReader<'a> {
    pub fn new(message: &'a StreamMessage) -> Self {
        Self { message }
    }

    /// Field value, with empty text and the literal `null` treated as absent
    pub fn optional_str(&self, field: &str) -> Option<&'a str> {
        self.message
            .fields
            .get(field)
            .filter(|v| !v.trim().is_empty() && *v != "null")
    }

    pub fn required_str(&self, field: &str) -> Result<&'a str, CodecError> {
        self.optional_str(field)
            .ok_or_else(|| self.deserialization(field, "field is missing"))
    }

    pub fn optional_string(&self, field: &str) -> Option<String> {
        self.optional_str(field).map(str::to_string)
    }

    pub fn required_i64(&self, field: &str) -> Result<i64, CodecError> {
        let raw = self.required_str(field)?;
        raw.trim()
            .parse::<i64>()
            .map_err(|e| self.deserialization(field, &format!("'{}' is not an integer: {}", raw, e)))
    }

    pub fn optional_i64(&self, field: &str) -> Result<Option<i64>, CodecError> {
        match self.optional_str(field) {
            Some(_) => self.required_i64(field).map(Some),
            None => Ok(None),
        }
    }

    pub fn required_i32(&self, field: &str) -> Result<i32, CodecError> {
        let value = self.required_i64(field)?;
        i32::try_from(value)
            .map_err(|_| self.deserialization(field, &format!("{} is out of range", value)))
    }

    pub fn required_f64(&self, field: &str) -> Result<f64, CodecError> {
        let raw = self.required_str(field)?;
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            Ok(_) => Err(self.deserialization(field, &format!("'{}' is not finite", raw))),
            Err(e) => Err(self.deserialization(field, &format!("'{}' is not a number: {}", raw, e))),
        }
    }

    /// Boolean field; missing means `default`
    pub fn bool_or(&self, field: &str, default: bool) -> Result<bool, CodecError> {
        match self.optional_str(field) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.deserialization(field, &format!("'{}' is not a boolean", raw))),
            },
        }
    }

    /// List field, never fails (see [`parse_string_list`])
    pub fn string_list(&self, field: &str) -> Vec<String> {
        parse_string_list(self.message.fields.get(field))
    }

    pub fn bbox(&self, field: &str) -> Result<BoundingBox, CodecError> {
        let raw = self.message.fields.get(field).unwrap_or("");
        parse_bbox(raw).map_err(|reason| self.bbox_error(raw, &reason))
    }

    /// Embedded JSON field
    pub fn json(&self, field: &str) -> Result<Option<Value>, CodecError> {
        match self.optional_str(field) {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| self.deserialization(field, &format!("invalid JSON: {}", e))),
        }
    }

    pub fn deserialization(&self, field: &str, reason: &str) -> CodecError {
        CodecError::Deserialization {
            stream: self.message.stream.clone(),
            message_id: self.message.id.clone(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn bbox_error(&self, value: &str, reason: &str) -> CodecError {
        CodecError::BboxParsing {
            stream: self.message.stream.clone(),
            message_id: self.message.id.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
