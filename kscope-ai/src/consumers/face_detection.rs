//! Face detection ingest (`face-detection-results`)

use super::MessageContext;
use crate::db::read_models::FACE_SEARCH_TABLE;
use crate::db::{content, faces, insights};
use crate::error::{HandlerOutcome, IngestError, IngestResult};
use crate::services::{Scope, UnitOfWork};
use crate::IngestState;
use kscope_common::events::{FaceDetectionEvent, SyncOperation};
use tracing::{debug, info, warn};

/// Store every detected face as `UNIDENTIFIED`, then project each into the face read model
///
/// The parent insight must already exist; until it does the message stays
/// pending. A redelivered detection adds its faces again.
pub async fn handle(
    state: &IngestState,
    ctx: &MessageContext,
    event: FaceDetectionEvent,
) -> IngestResult<HandlerOutcome> {
    let media_id = event.media_id;
    if event.faces.is_empty() {
        return Ok(HandlerOutcome::Skip(format!("no faces detected in media {}", media_id)));
    }
    info!(media_id, faces = event.faces.len(), "Processing face detection");

    let mut uow = UnitOfWork::begin(&state.db, Scope::Primary).await?;

    if insights::find_insight(uow.conn(), media_id).await?.is_none() {
        return Err(IngestError::NotFound(format!("AI insight for media {}", media_id)));
    }
    let context = content::load_media_context(uow.conn(), media_id)
        .await?
        .ok_or_else(|| IngestError::NotFound(format!("media item {}", media_id)))?;

    if let Some(post_id) = event.post_id {
        if post_id != context.post.post_id {
            warn!(
                media_id,
                event_post_id = post_id,
                post_id = context.post.post_id,
                "Detection names a different post than the media item, using the stored one"
            );
        }
    }

    let mut face_ids = Vec::with_capacity(event.faces.len());
    for face in &event.faces {
        let face_id = faces::insert_face(uow.conn(), media_id, &face.bbox, face.embedding.as_deref()).await?;
        debug!(media_id, face_id, bbox = %face.bbox.to_json_text(), "Face saved");
        face_ids.push(face_id);
    }

    uow.commit().await?;

    for (face_id, face) in face_ids.iter().zip(&event.faces) {
        let created = state
            .read_models
            .create_face_search_read_model(*face_id, &context, &face.bbox, face.embedding.as_deref())
            .await;

        if created && state.config.index_faces_on_detection {
            state
                .search_sync
                .trigger_sync(
                    FACE_SEARCH_TABLE,
                    SyncOperation::Index,
                    &face_id.to_string(),
                    &ctx.correlation_id,
                )
                .await;
        }
    }

    info!(media_id, faces = face_ids.len(), "Face detection processed");
    Ok(HandlerOutcome::Processed)
}
