//! Database models
//!
//! Write-model rows (canonical) and the denormalized read-model rows that
//! are mirrored into the search index.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AI processing state of one media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaAiStatus {
    Pending,
    Completed,
}

impl MediaAiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaAiStatus::Pending => "PENDING",
            MediaAiStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for MediaAiStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(MediaAiStatus::Pending),
            "COMPLETED" => Ok(MediaAiStatus::Completed),
            other => Err(Error::InvalidInput(format!("unknown media AI status '{}'", other))),
        }
    }
}

impl fmt::Display for MediaAiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identification state of a detected face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaceDetectionStatus {
    /// Detected, no identity suggested yet
    Unidentified,
    /// Recognition proposed a user
    Suggested,
}

impl FaceDetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceDetectionStatus::Unidentified => "UNIDENTIFIED",
            FaceDetectionStatus::Suggested => "SUGGESTED",
        }
    }
}

impl FromStr for FaceDetectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UNIDENTIFIED" => Ok(FaceDetectionStatus::Unidentified),
            "SUGGESTED" => Ok(FaceDetectionStatus::Suggested),
            other => Err(Error::InvalidInput(format!("unknown face status '{}'", other))),
        }
    }
}

impl fmt::Display for FaceDetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Face bounding box in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn from_array(values: [i32; 4]) -> Self {
        Self {
            x: values[0],
            y: values[1],
            width: values[2],
            height: values[3],
        }
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// JSON array text, the stored and read-model form: `[x,y,w,h]`
    pub fn to_json_text(&self) -> String {
        format!("[{},{},{},{}]", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for BoundingBox {
    type Err = Error;

    /// Parses the stored `[x,y,w,h]` form
    fn from_str(s: &str) -> Result<Self> {
        let values: Vec<i32> = serde_json::from_str(s)
            .map_err(|e| Error::InvalidInput(format!("stored bbox '{}': {}", s, e)))?;
        let array: [i32; 4] = values
            .try_into()
            .map_err(|_| Error::InvalidInput(format!("stored bbox '{}' must have 4 values", s)))?;
        Ok(Self::from_array(array))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub designation: Option<String>,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub post_id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub visibility: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMedia {
    pub media_id: i64,
    pub post_id: i64,
    pub media_url: String,
    pub position: i64,
}

/// One row per processed media item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAiInsight {
    pub media_id: i64,
    pub post_id: i64,
    pub status: MediaAiStatus,
    pub is_safe: bool,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    pub scenes: Vec<String>,
    /// Opaque vector text as produced by the AI service
    pub image_embedding: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row per bounding box found in a media item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub id: i64,
    pub media_id: i64,
    pub bbox: BoundingBox,
    pub embedding: Option<String>,
    pub status: FaceDetectionStatus,
    pub suggested_user_id: Option<i64>,
    pub confidence_score: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashtag {
    pub hashtag_id: i64,
    pub name: String,
    pub usage_count: i64,
}

/// `read_model_media_search` row, keyed by media id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSearchReadModel {
    pub media_id: i64,
    pub post_id: i64,
    pub post_title: Option<String>,
    /// Comma-joined aggregated tags of the whole post
    pub post_all_tags: Option<String>,
    pub media_url: Option<String>,
    pub ai_caption: Option<String>,
    /// Comma-joined
    pub ai_tags: Option<String>,
    /// Comma-joined
    pub ai_scenes: Option<String>,
    /// JSON array text
    pub image_embedding: Option<String>,
    pub is_safe: Option<bool>,
    /// Comma-joined
    pub detected_user_ids: Option<String>,
    /// Comma-joined
    pub detected_usernames: Option<String>,
    pub uploader_id: Option<i64>,
    pub uploader_username: Option<String>,
    pub uploader_department: Option<String>,
    pub reaction_count: i64,
    pub comment_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// `read_model_face_search` row, keyed by face id (text)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceSearchReadModel {
    pub face_id: String,
    pub media_id: i64,
    pub post_id: i64,
    pub face_embedding: Option<String>,
    /// JSON array text `[x,y,w,h]`
    pub bbox: Option<String>,
    pub identified_user_id: Option<i64>,
    pub identified_username: Option<String>,
    pub match_confidence: Option<f32>,
    pub uploader_id: Option<i64>,
    pub post_title: Option<String>,
    pub media_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// `read_model_post_search` row, keyed by post id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostSearchReadModel {
    pub post_id: i64,
    pub author_id: Option<i64>,
    pub author_username: Option<String>,
    pub author_department: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub all_ai_tags: Option<String>,
    pub all_ai_scenes: Option<String>,
    pub all_detected_user_ids: Option<String>,
    pub inferred_event_type: Option<String>,
    pub inferred_tags: Option<String>,
    pub categories: Option<String>,
    pub total_reactions: i64,
    pub total_comments: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
