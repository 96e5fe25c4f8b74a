//! Correlation context
//!
//! A correlation id is read from an inbound message, carried explicitly
//! through the processing of that one message, and copied onto every event
//! the processing publishes. It is never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Field name used on the wire
pub const CORRELATION_ID_FIELD: &str = "correlationId";

/// Opaque trace token shared by a chain of related events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing id; blank input yields a fresh one
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() || value == "null" {
            Self::generate()
        } else {
            Self(value)
        }
    }

    /// Fresh random id for messages that arrived without one
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use the producer's id when present, otherwise start a new chain
    pub fn from_optional(value: Option<&str>) -> Self {
        match value {
            Some(v) => Self::new(v),
            None => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
