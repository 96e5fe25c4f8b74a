//! Face recognition ingest (`face-recognition-results`)
//!
//! A recognition can arrive after its face was deleted together with the
//! owning post; that is acknowledged as a skip, unlike a missing parent in
//! detection.

use super::MessageContext;
use crate::db::read_models::{self, FACE_SEARCH_TABLE, MEDIA_SEARCH_TABLE};
use crate::db::{content, faces};
use crate::error::{HandlerOutcome, IngestError, IngestResult};
use crate::services::{Scope, UnitOfWork};
use crate::IngestState;
use kscope_common::events::{FaceRecognitionEvent, SyncOperation};
use kscope_common::Result;
use tracing::{error, info};

pub async fn handle(
    state: &IngestState,
    ctx: &MessageContext,
    event: FaceRecognitionEvent,
) -> IngestResult<HandlerOutcome> {
    let face_id = event.face_id;
    let user_id = event.suggested_user_id;
    let confidence = event.confidence_score as f32;

    let mut uow = UnitOfWork::begin(&state.db, Scope::Primary).await?;

    if faces::find_face(uow.conn(), face_id).await?.is_none() {
        info!(face_id, "Face no longer exists, recognition ignored");
        return Ok(HandlerOutcome::Skip(format!("face {} no longer exists", face_id)));
    }

    let user = content::find_user(uow.conn(), user_id)
        .await?
        .ok_or_else(|| IngestError::NotFound(format!("user {}", user_id)))?;

    faces::record_suggestion(uow.conn(), face_id, user_id, confidence).await?;
    uow.commit().await?;
    info!(face_id, user_id, confidence, "Face identity suggested");

    match update_read_models(state, face_id, user_id, &user.username, confidence).await {
        Ok(Projection::Updated { media_id }) => {
            let correlation_id = &ctx.correlation_id;
            state
                .search_sync
                .trigger_sync(FACE_SEARCH_TABLE, SyncOperation::Index, &face_id.to_string(), correlation_id)
                .await;
            if let Some(media_id) = media_id {
                state
                    .search_sync
                    .trigger_sync(MEDIA_SEARCH_TABLE, SyncOperation::Index, &media_id.to_string(), correlation_id)
                    .await;
            }
        }
        Ok(Projection::NoFaceRow) => info!(face_id, "No face read model yet, nothing to project"),
        Err(err) => error!(face_id, error = %err, "Failed to update read models for recognized face"),
    }

    Ok(HandlerOutcome::Processed)
}

enum Projection {
    NoFaceRow,
    /// Face row updated; `media_id` is set when the media row exists and lists the user
    Updated { media_id: Option<i64> },
}

/// Side-effect unit of work for the face row and its media row
async fn update_read_models(
    state: &IngestState,
    face_id: i64,
    user_id: i64,
    username: &str,
    confidence: f32,
) -> Result<Projection> {
    let mut uow = UnitOfWork::begin(&state.db, Scope::SideEffect).await?;
    let face_key = face_id.to_string();

    if !read_models::set_face_identity(uow.conn(), &face_key, user_id, username, confidence).await? {
        return Ok(Projection::NoFaceRow);
    }
    let Some(face_row) = read_models::find_face_search(uow.conn(), &face_key).await? else {
        return Ok(Projection::NoFaceRow);
    };

    let media_id = face_row.media_id;
    let media_present = read_models::find_media_search(uow.conn(), media_id).await?.is_some();
    if media_present {
        read_models::add_detected_user(uow.conn(), media_id, user_id, username).await?;
    }

    uow.commit().await?;
    Ok(Projection::Updated {
        media_id: media_present.then_some(media_id),
    })
}
