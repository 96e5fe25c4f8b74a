//! Hashtag usage ingest (`hashtag-usage-sync-stream`)

use super::MessageContext;
use crate::db::hashtags;
use crate::error::{HandlerOutcome, IngestResult};
use crate::services::{Scope, UnitOfWork};
use crate::IngestState;
use kscope_common::events::HashtagUsageEvent;
use tracing::{debug, warn};

/// Apply a signed usage delta; the counter never goes below zero
pub async fn handle(
    state: &IngestState,
    _ctx: &MessageContext,
    event: HashtagUsageEvent,
) -> IngestResult<HandlerOutcome> {
    let name = event.hashtag_name.trim().to_lowercase();
    if name.is_empty() {
        return Ok(HandlerOutcome::Skip("empty hashtag name".to_string()));
    }

    let mut uow = UnitOfWork::begin(&state.db, Scope::Primary).await?;
    let updated = hashtags::apply_usage_change(uow.conn(), &[name.clone()], event.change).await?;
    uow.commit().await?;

    if updated == 0 {
        warn!(hashtag = %name, change = event.change, "Hashtag not found, usage change dropped");
    } else {
        debug!(hashtag = %name, change = event.change, "Hashtag usage updated");
    }
    Ok(HandlerOutcome::Processed)
}
