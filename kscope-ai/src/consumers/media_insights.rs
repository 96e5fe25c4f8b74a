//! Media-insights ingest (`ml-insights-results`)
//!
//! Records the captioning/tagging result of one media item, writes the search
//! asset projection, refreshes the media read model and, once every media item
//! of the post is processed, triggers post aggregation.

use super::MessageContext;
use crate::db::read_models::MEDIA_SEARCH_TABLE;
use crate::db::{content, insights};
use crate::error::{HandlerOutcome, IngestError, IngestResult};
use crate::services::{SearchAssetDocument, Scope, UnitOfWork, SEARCH_ASSETS_INDEX};
use crate::IngestState;
use chrono::Utc;
use kscope_common::db::{MediaAiInsight, MediaAiStatus};
use kscope_common::events::{MediaInsightsEvent, SyncOperation};
use tracing::{debug, info};

pub async fn handle(
    state: &IngestState,
    ctx: &MessageContext,
    event: MediaInsightsEvent,
) -> IngestResult<HandlerOutcome> {
    let media_id = event.media_id;
    info!(media_id, "Processing media insights");

    let (context, existing) = {
        let mut conn = state.db.acquire().await?;
        let context = content::load_media_context(&mut conn, media_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("media item {}", media_id)))?;
        let existing = insights::find_insight(&mut conn, media_id).await?;
        (context, existing)
    };
    let post_id = context.post.post_id;

    let insight = match existing {
        Some(insight) => {
            info!(media_id, "Insight already recorded, re-running follow-up steps");
            insight
        }
        None => {
            let now = Utc::now();
            MediaAiInsight {
                media_id,
                post_id,
                status: MediaAiStatus::Completed,
                is_safe: event.is_safe,
                caption: event.caption,
                tags: event.tags,
                scenes: event.scenes,
                image_embedding: event.image_embedding,
                created_at: now,
                updated_at: now,
            }
        }
    };

    // No write transaction is open across the index call. A failure here
    // leaves nothing written and the message pending.
    let document = SearchAssetDocument::build(&context, &insight);
    state
        .search_index
        .upsert(SEARCH_ASSETS_INDEX, &document.id, &document.to_value()?)
        .await?;

    let mut uow = UnitOfWork::begin(&state.db, Scope::Primary).await?;
    let insight = if insights::insert_insight(uow.conn(), &insight).await? {
        debug!(media_id, post_id, "Insight saved");
        insight
    } else {
        insights::find_insight(uow.conn(), media_id)
            .await?
            .unwrap_or(insight)
    };
    uow.commit().await?;

    state
        .read_models
        .upsert_media_search_read_model(&insight, &context)
        .await;
    state
        .search_sync
        .trigger_sync(
            MEDIA_SEARCH_TABLE,
            SyncOperation::Index,
            &media_id.to_string(),
            &ctx.correlation_id,
        )
        .await;

    if state.completion.all_media_processed_for_post(post_id).await {
        let media_ids = {
            let mut conn = state.db.acquire().await?;
            content::media_ids_for_post(&mut conn, post_id).await?
        };
        info!(post_id, total_media = media_ids.len(), "All media processed for post");
        state
            .aggregation
            .trigger_aggregation(post_id, &media_ids, &ctx.correlation_id)
            .await;
    }

    Ok(HandlerOutcome::Processed)
}
