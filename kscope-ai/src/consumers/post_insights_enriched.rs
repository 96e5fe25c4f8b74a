//! Post-insights-enriched ingest (`post-insights-enriched`)
//!
//! Applies the post-level aggregate to the post read model and back-fills
//! `post_all_tags` on every media row of the post. Both writes share the
//! message's primary unit of work, so a failure leaves the message pending.

use super::MessageContext;
use crate::db::read_models::{self, MEDIA_SEARCH_TABLE, POST_SEARCH_TABLE};
use crate::db::content;
use crate::error::{HandlerOutcome, IngestResult};
use crate::services::{Scope, UnitOfWork};
use crate::IngestState;
use kscope_common::db::PostSearchReadModel;
use kscope_common::events::{PostInsightsEnrichedEvent, SyncOperation};
use tracing::{debug, info};

pub async fn handle(
    state: &IngestState,
    ctx: &MessageContext,
    event: PostInsightsEnrichedEvent,
) -> IngestResult<HandlerOutcome> {
    let Some(post_id) = event.post_id else {
        return Ok(HandlerOutcome::Skip("postId missing from enriched insights".to_string()));
    };
    info!(post_id, tags = event.all_ai_tags.len(), "Processing enriched post insights");

    let all_tags = event.all_ai_tags.join(",");
    let mut uow = UnitOfWork::begin(&state.db, Scope::Primary).await?;

    let mut row = match read_models::find_post_search(uow.conn(), post_id).await? {
        Some(row) => row,
        None => match content::find_post_with_author(uow.conn(), post_id).await? {
            Some((post, author)) => {
                debug!(post_id, "Creating post search read model");
                PostSearchReadModel {
                    post_id,
                    author_id: Some(author.user_id),
                    author_username: Some(author.username),
                    author_department: author.designation,
                    title: Some(post.title),
                    body: post.body,
                    created_at: Some(post.created_at),
                    ..Default::default()
                }
            }
            None => {
                return Ok(HandlerOutcome::Skip(format!("post {} no longer exists", post_id)));
            }
        },
    };

    row.all_ai_tags = Some(all_tags.clone());
    row.all_ai_scenes = Some(event.all_ai_scenes.join(","));
    row.inferred_event_type = event.inferred_event_type;
    row.inferred_tags = Some(event.inferred_tags.join(","));

    read_models::upsert_post_search(uow.conn(), &row).await?;
    let media_ids = read_models::backfill_post_all_tags(uow.conn(), post_id, &all_tags).await?;

    uow.commit().await?;
    info!(post_id, media_rows = media_ids.len(), "Post read model updated");

    let correlation_id = &ctx.correlation_id;
    state
        .search_sync
        .trigger_sync(POST_SEARCH_TABLE, SyncOperation::Index, &post_id.to_string(), correlation_id)
        .await;
    for media_id in media_ids {
        state
            .search_sync
            .trigger_sync(MEDIA_SEARCH_TABLE, SyncOperation::Index, &media_id.to_string(), correlation_id)
            .await;
    }

    Ok(HandlerOutcome::Processed)
}
