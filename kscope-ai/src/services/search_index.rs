//! Search index collaborator
//!
//! The index exposes idempotent upsert and delete-by-id. [`HttpSearchIndex`]
//! speaks the document API of an Elasticsearch-compatible server;
//! [`NoopSearchIndex`] is used when no index URL is configured.

use crate::db::content::MediaContext;
use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kscope_common::db::MediaAiInsight;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Index holding one projection document per processed media item
pub const SEARCH_ASSETS_INDEX: &str = "search_assets";

const USER_AGENT: &str = "kscope-ai/0.1.0";

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or replace document `id` in `index`
    async fn upsert(&self, index: &str, id: &str, document: &Value) -> IngestResult<()>;

    /// Remove document `id`; removing a missing document succeeds
    async fn delete(&self, index: &str, id: &str) -> IngestResult<()>;
}

/// Search index reached over HTTP
pub struct HttpSearchIndex {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSearchIndex {
    pub fn new(base_url: &str) -> IngestResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::SearchIndex(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn document_url(&self, index: &str, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, index, id)
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, index: &str, id: &str, document: &Value) -> IngestResult<()> {
        let url = self.document_url(index, id);
        debug!(index, id, url = %url, "Upserting search document");

        let response = self
            .http_client
            .put(&url)
            .json(document)
            .send()
            .await
            .map_err(|e| IngestError::SearchIndex(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IngestError::SearchIndex(format!(
                "upsert {}/{} returned {}: {}",
                index,
                id,
                status.as_u16(),
                error_text
            )));
        }
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> IngestResult<()> {
        let url = self.document_url(index, id);
        debug!(index, id, url = %url, "Deleting search document");

        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(|e| IngestError::SearchIndex(e.to_string()))?;

        let status = response.status();
        if status == 404 {
            return Ok(());
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IngestError::SearchIndex(format!(
                "delete {}/{} returned {}: {}",
                index,
                id,
                status.as_u16(),
                error_text
            )));
        }
        Ok(())
    }
}

/// Accepts every write and stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearchIndex;

#[async_trait]
impl SearchIndex for NoopSearchIndex {
    async fn upsert(&self, index: &str, id: &str, _document: &Value) -> IngestResult<()> {
        debug!(index, id, "No search index configured, upsert dropped");
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> IngestResult<()> {
        debug!(index, id, "No search index configured, delete dropped");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploaderInfo {
    pub user_id: i64,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInfo {
    pub post_id: i64,
    pub title: String,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub visibility: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Denormalized media projection stored in [`SEARCH_ASSETS_INDEX`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAssetDocument {
    pub id: String,
    pub media_id: i64,
    pub post_id: i64,
    pub media_url: String,
    pub uploader_info: UploaderInfo,
    pub post_info: PostInfo,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    pub scenes: Vec<String>,
    pub image_embedding: Option<String>,
    /// Filled later by the face pipeline
    pub detected_users: serde_json::Map<String, Value>,
    pub reaction_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SearchAssetDocument {
    /// Build from a media item and its insight; interaction counters start at zero
    pub fn build(context: &MediaContext, insight: &MediaAiInsight) -> Self {
        let post = &context.post;
        let uploader = &context.uploader;

        Self {
            id: context.media.media_id.to_string(),
            media_id: context.media.media_id,
            post_id: post.post_id,
            media_url: context.media.media_url.clone(),
            uploader_info: UploaderInfo {
                user_id: uploader.user_id,
                username: uploader.username.clone(),
                profile_picture_url: uploader.profile_picture_url.clone(),
            },
            post_info: PostInfo {
                post_id: post.post_id,
                title: post.title.clone(),
                body: post.body.clone(),
                summary: post.summary.clone(),
                visibility: post.visibility.clone(),
                status: post.status.clone(),
                created_at: post.created_at,
            },
            caption: insight.caption.clone(),
            tags: insight.tags.clone(),
            scenes: insight.scenes.clone(),
            image_embedding: insight.image_embedding.clone(),
            detected_users: serde_json::Map::new(),
            reaction_count: 0,
            comment_count: 0,
            created_at: post.created_at,
            last_updated: Utc::now(),
        }
    }

    pub fn to_value(&self) -> IngestResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| IngestError::SearchIndex(format!("cannot serialize search asset: {}", e)))
    }
}
