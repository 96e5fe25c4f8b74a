//! Media-insights ingest end to end: write model, search asset, read model,
//! completion check and aggregation trigger

mod helpers;

use helpers::{field, message, seed_post_with_media, TestPipeline};
use kscope_ai::consumers::Dispatcher;
use kscope_ai::db::{insights, read_models};
use kscope_ai::services::SEARCH_ASSETS_INDEX;
use kscope_ai::{HandlerOutcome, IngestError};
use kscope_common::config::{AggregationDedup, IngestConfig};
use kscope_common::db::MediaAiStatus;
use kscope_ai::stream::StreamTransport;
use kscope_common::events::{streams, Fields};
use kscope_common::CorrelationId;
use std::time::Duration;

fn insights_message(id: &str, media_id: i64) -> kscope_common::events::StreamMessage {
    let media_id = media_id.to_string();
    message(
        streams::ML_INSIGHTS,
        id,
        &[
            ("mediaId", media_id.as_str()),
            ("isSafe", "true"),
            ("caption", "Team photo at the offsite"),
            ("tags", "[\"people\",\"outdoor\"]"),
            ("scenes", "park,lake"),
            ("imageEmbedding", "0.12,0.34,0.56"),
            ("correlationId", "corr-7"),
        ],
    )
}

async fn deliver(pipeline: &TestPipeline, id: &str, media_id: i64) -> HandlerOutcome {
    let dispatcher = Dispatcher::new(pipeline.state.clone());
    let message = insights_message(id, media_id);
    let correlation_id = CorrelationId::from_optional(message.correlation_id());
    dispatcher.dispatch(&message, &correlation_id).await
}

#[tokio::test]
async fn test_single_media_post_end_to_end() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;

    let outcome = deliver(&pipeline, "1-0", 7).await;
    assert!(matches!(outcome, HandlerOutcome::Processed), "got {:?}", outcome);

    let mut conn = pipeline.db.acquire().await.unwrap();
    let insight = insights::find_insight(&mut conn, 7).await.unwrap().unwrap();
    assert_eq!(insight.status, MediaAiStatus::Completed);
    assert_eq!(insight.post_id, 3);
    assert_eq!(insight.tags, vec!["people", "outdoor"]);
    assert_eq!(insight.scenes, vec!["park", "lake"]);

    let row = read_models::find_media_search(&mut conn, 7).await.unwrap().unwrap();
    assert_eq!(row.post_id, 3);
    assert_eq!(row.ai_tags.as_deref(), Some("people,outdoor"));
    assert_eq!(row.ai_scenes.as_deref(), Some("park,lake"));
    assert_eq!(row.image_embedding.as_deref(), Some("[0.12,0.34,0.56]"));
    assert_eq!(row.uploader_username.as_deref(), Some("alice"));
    assert_eq!(row.uploader_department.as_deref(), Some("Engineering"));
    assert_eq!(row.reaction_count, 0);
    drop(conn);

    assert_eq!(pipeline.index.upserted_ids(SEARCH_ASSETS_INDEX), vec!["7"]);

    let syncs = pipeline.drain(streams::ES_SYNC_QUEUE).await;
    assert_eq!(syncs.len(), 1);
    assert_eq!(field(&syncs[0], "indexName"), "read_model_media_search");
    assert_eq!(field(&syncs[0], "indexType"), "media_search");
    assert_eq!(field(&syncs[0], "operation"), "INDEX");
    assert_eq!(field(&syncs[0], "documentId"), "7");
    assert_eq!(field(&syncs[0], "correlationId"), "corr-7");

    assert!(pipeline.state.completion.all_media_processed_for_post(3).await);

    let triggers = pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await;
    assert_eq!(triggers.len(), 1);
    assert_eq!(field(&triggers[0], "postId"), "3");
    assert_eq!(field(&triggers[0], "totalMedia"), "1");
    assert_eq!(field(&triggers[0], "allMediaIds"), "7");
    assert_eq!(field(&triggers[0], "idempotencyKey"), "post-3-1");
    assert_eq!(field(&triggers[0], "correlationId"), "corr-7");
}

#[tokio::test]
async fn test_fan_in_triggers_only_after_last_media() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 3, &[11, 12, 13]).await;
    let completion = &pipeline.state.completion;

    assert!(!completion.all_media_processed_for_post(3).await);

    for (n, media_id) in [11, 12].into_iter().enumerate() {
        deliver(&pipeline, &format!("{}-0", n + 1), media_id).await;
        assert!(!completion.all_media_processed_for_post(3).await);
        assert!(pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await.is_empty());
    }

    deliver(&pipeline, "3-0", 13).await;
    assert!(completion.all_media_processed_for_post(3).await);

    let triggers = pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await;
    assert_eq!(triggers.len(), 1);
    assert_eq!(field(&triggers[0], "totalMedia"), "3");
    assert_eq!(field(&triggers[0], "allMediaIds"), "11,12,13");

    let status = completion.processing_status(3).await.unwrap();
    assert_eq!((status.total_media, status.processed_media), (3, 3));
}

#[tokio::test]
async fn test_post_without_media_is_never_complete() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 4, &[]).await;

    assert!(!pipeline.state.completion.all_media_processed_for_post(4).await);
    assert!(!pipeline.state.completion.all_media_processed_for_post(999).await);
}

#[tokio::test]
async fn test_redelivery_keeps_single_insight() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;

    let first = deliver(&pipeline, "1-0", 7).await;
    let second = deliver(&pipeline, "1-0", 7).await;
    assert!(first.acknowledges());
    assert!(second.acknowledges());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_ai_insights WHERE media_id = 7")
        .fetch_one(&pipeline.db)
        .await
        .unwrap();
    assert_eq!(count, 1);

    // Follow-up steps re-run on redelivery; dedup is off by default
    assert_eq!(pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await.len(), 2);
}

#[tokio::test]
async fn test_idempotency_key_mode_publishes_aggregation_once() {
    let config = IngestConfig {
        aggregation_dedup: AggregationDedup::IdempotencyKey,
        ..IngestConfig::default()
    };
    let pipeline = TestPipeline::with_config(config).await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;

    deliver(&pipeline, "1-0", 7).await;
    deliver(&pipeline, "1-0", 7).await;

    assert_eq!(pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await.len(), 1);
    let recorded: String =
        sqlx::query_scalar("SELECT idempotency_key FROM aggregation_triggers WHERE post_id = 3")
            .fetch_one(&pipeline.db)
            .await
            .unwrap();
    assert_eq!(recorded, "post-3-1");
}

#[tokio::test]
async fn test_missing_media_leaves_message_pending() {
    let pipeline = TestPipeline::new().await;

    let outcome = deliver(&pipeline, "1-0", 404).await;

    assert!(matches!(outcome, HandlerOutcome::Retryable(IngestError::NotFound(_))));
    assert!(!outcome.acknowledges());
    assert!(pipeline.drain(streams::ES_SYNC_QUEUE).await.is_empty());
}

#[tokio::test]
async fn test_search_index_failure_writes_nothing() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;
    pipeline.index.set_failing(true);

    let outcome = deliver(&pipeline, "1-0", 7).await;

    match &outcome {
        HandlerOutcome::Retryable(IngestError::StreamProcessing { stream, message_id, .. }) => {
            assert_eq!(stream, streams::ML_INSIGHTS);
            assert_eq!(message_id, "1-0");
        }
        other => panic!("expected wrapped processing error, got {:?}", other),
    }

    let mut conn = pipeline.db.acquire().await.unwrap();
    assert!(insights::find_insight(&mut conn, 7).await.unwrap().is_none());
    assert!(read_models::find_media_search(&mut conn, 7).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_media_id_is_poison() {
    let pipeline = TestPipeline::new().await;
    let dispatcher = Dispatcher::new(pipeline.state.clone());
    let bad = message(streams::ML_INSIGHTS, "1-0", &[("mediaId", "seven")]);

    let outcome = dispatcher.dispatch(&bad, &CorrelationId::generate()).await;

    assert!(matches!(outcome, HandlerOutcome::Fatal(IngestError::Deserialization(_))));
    assert!(!outcome.acknowledges());
}

#[tokio::test]
async fn test_slow_index_does_not_block_other_writers() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;
    pipeline.index.hold_upserts(true);

    let state = pipeline.state.clone();
    let handler = tokio::spawn(async move {
        let dispatcher = Dispatcher::new(state);
        let message = insights_message("1-0", 7);
        dispatcher.dispatch(&message, &CorrelationId::generate()).await
    });
    pipeline.index.entered.notified().await;

    // Handler is parked inside the index call; the log must still accept writes
    let published = tokio::time::timeout(
        Duration::from_secs(2),
        pipeline
            .log
            .publish(streams::HASHTAG_USAGE_SYNC, Fields::new().with("hashtagName", "rust").with("change", "1")),
    )
    .await
    .expect("publish blocked behind the index call");
    assert!(published.is_ok());

    pipeline.index.release.notify_one();
    let outcome = handler.await.unwrap();
    assert!(matches!(outcome, HandlerOutcome::Processed), "got {:?}", outcome);

    let mut conn = pipeline.db.acquire().await.unwrap();
    assert!(insights::find_insight(&mut conn, 7).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_aggregation_publish_is_retried_on_redelivery() {
    let config = IngestConfig {
        aggregation_dedup: AggregationDedup::IdempotencyKey,
        publish_max_attempts: 1,
        ..IngestConfig::default()
    };
    let pipeline = TestPipeline::with_config(config).await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;

    pipeline.transport.fail_stream(Some(streams::POST_AGGREGATION_TRIGGER));
    let outcome = deliver(&pipeline, "1-0", 7).await;
    assert!(matches!(outcome, HandlerOutcome::Processed), "got {:?}", outcome);
    assert!(pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await.is_empty());

    let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aggregation_triggers WHERE post_id = 3")
        .fetch_one(&pipeline.db)
        .await
        .unwrap();
    assert_eq!(recorded, 0);

    pipeline.transport.fail_stream(None);
    deliver(&pipeline, "1-0", 7).await;
    deliver(&pipeline, "1-0", 7).await;

    let triggers = pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await;
    assert_eq!(triggers.len(), 1);
    assert_eq!(field(&triggers[0], "idempotencyKey"), "post-3-1");
}

#[tokio::test]
async fn test_read_model_failure_keeps_insight_and_acks() {
    let pipeline = TestPipeline::new().await;
    seed_post_with_media(&pipeline.db, 3, &[7]).await;
    sqlx::query(
        "CREATE TRIGGER reject_media_search BEFORE INSERT ON read_model_media_search \
         BEGIN SELECT RAISE(ABORT, 'read model unavailable'); END",
    )
    .execute(&pipeline.db)
    .await
    .unwrap();

    let outcome = deliver(&pipeline, "1-0", 7).await;

    assert!(matches!(outcome, HandlerOutcome::Processed), "got {:?}", outcome);
    assert!(outcome.acknowledges());

    let mut conn = pipeline.db.acquire().await.unwrap();
    let insight = insights::find_insight(&mut conn, 7).await.unwrap().unwrap();
    assert_eq!(insight.status, MediaAiStatus::Completed);
    assert!(read_models::find_media_search(&mut conn, 7).await.unwrap().is_none());
    drop(conn);

    // Completion check still runs
    assert_eq!(pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await.len(), 1);
}
