//! Read-model synchronizer
//!
//! Builds the flattened media and face projections and writes each one in
//! its own side-effect unit of work. Failures are logged and swallowed; a
//! missed projection is rebuilt on the next ingestion of the same entity.

use super::unit_of_work::{Scope, UnitOfWork};
use crate::db::content::MediaContext;
use crate::db::read_models;
use kscope_common::db::{BoundingBox, FaceSearchReadModel, MediaAiInsight, MediaSearchReadModel};
use kscope_common::Result;
use sqlx::SqlitePool;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct ReadModelSync {
    db: SqlitePool,
}

impl ReadModelSync {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Upsert the `read_model_media_search` row for a processed media item
    ///
    /// Returns false when the write failed (already logged).
    pub async fn upsert_media_search_read_model(
        &self,
        insight: &MediaAiInsight,
        context: &MediaContext,
    ) -> bool {
        let media_id = context.media.media_id;
        debug!(media_id, "Updating media search read model");

        let row = media_search_row(insight, context);
        match self.write_media_row(&row).await {
            Ok(()) => {
                info!(media_id, "Media search read model updated");
                true
            }
            Err(err) => {
                error!(media_id, error = %err, "Failed to update media search read model");
                false
            }
        }
    }

    /// Create the `read_model_face_search` row for a newly detected face
    ///
    /// Identity columns stay empty until recognition fills them. Returns
    /// false when the write failed (already logged).
    pub async fn create_face_search_read_model(
        &self,
        face_id: i64,
        context: &MediaContext,
        bbox: &BoundingBox,
        embedding: Option<&str>,
    ) -> bool {
        debug!(face_id, "Creating face search read model");

        let row = face_search_row(face_id, context, bbox, embedding);
        match self.write_face_row(&row).await {
            Ok(()) => {
                info!(face_id, "Face search read model created");
                true
            }
            Err(err) => {
                error!(face_id, error = %err, "Failed to create face search read model");
                false
            }
        }
    }

    async fn write_media_row(&self, row: &MediaSearchReadModel) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.db, Scope::SideEffect).await?;
        read_models::upsert_media_search(uow.conn(), row).await?;
        uow.commit().await
    }

    async fn write_face_row(&self, row: &FaceSearchReadModel) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.db, Scope::SideEffect).await?;
        read_models::upsert_face_search(uow.conn(), row).await?;
        uow.commit().await
    }
}

/// Flattened media projection; `post_all_tags` and detected users are filled by later stages
pub fn media_search_row(insight: &MediaAiInsight, context: &MediaContext) -> MediaSearchReadModel {
    MediaSearchReadModel {
        media_id: context.media.media_id,
        post_id: context.post.post_id,
        post_title: Some(context.post.title.clone()),
        post_all_tags: None,
        media_url: Some(context.media.media_url.clone()),
        ai_caption: insight.caption.clone(),
        ai_tags: Some(insight.tags.join(",")),
        ai_scenes: Some(insight.scenes.join(",")),
        image_embedding: embedding_json_text(insight.image_embedding.as_deref()),
        is_safe: Some(insight.is_safe),
        detected_user_ids: None,
        detected_usernames: None,
        uploader_id: Some(context.uploader.user_id),
        uploader_username: Some(context.uploader.username.clone()),
        uploader_department: context.uploader.designation.clone(),
        reaction_count: 0,
        comment_count: 0,
        created_at: Some(context.post.created_at),
        updated_at: None,
    }
}

pub fn face_search_row(
    face_id: i64,
    context: &MediaContext,
    bbox: &BoundingBox,
    embedding: Option<&str>,
) -> FaceSearchReadModel {
    FaceSearchReadModel {
        face_id: face_id.to_string(),
        media_id: context.media.media_id,
        post_id: context.post.post_id,
        face_embedding: embedding_json_text(embedding),
        bbox: Some(bbox.to_json_text()),
        identified_user_id: None,
        identified_username: None,
        match_confidence: None,
        uploader_id: Some(context.uploader.user_id),
        post_title: Some(context.post.title.clone()),
        media_url: Some(context.media.media_url.clone()),
        created_at: None,
        updated_at: None,
    }
}

/// Embedding as JSON-array text; bare comma-separated vectors are bracketed
pub fn embedding_json_text(embedding: Option<&str>) -> Option<String> {
    let text = embedding?.trim();
    if text.is_empty() {
        None
    } else if text.starts_with('[') {
        Some(text.to_string())
    } else {
        Some(format!("[{}]", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_json_text() {
        assert_eq!(embedding_json_text(Some("[0.1,0.2]")).as_deref(), Some("[0.1,0.2]"));
        assert_eq!(embedding_json_text(Some("0.1,0.2")).as_deref(), Some("[0.1,0.2]"));
        assert_eq!(embedding_json_text(Some("  ")), None);
        assert_eq!(embedding_json_text(None), None);
    }
}
