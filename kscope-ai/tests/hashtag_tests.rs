//! Hashtag usage counters

mod helpers;

use helpers::{message, seed_hashtag, TestPipeline};
use kscope_ai::consumers::Dispatcher;
use kscope_ai::db::hashtags;
use kscope_ai::{HandlerOutcome, IngestError};
use kscope_common::events::streams;
use kscope_common::CorrelationId;

async fn change(pipeline: &TestPipeline, name: &str, delta: &str) -> HandlerOutcome {
    let dispatcher = Dispatcher::new(pipeline.state.clone());
    let msg = message(
        streams::HASHTAG_USAGE_SYNC,
        "1-0",
        &[("hashtagName", name), ("change", delta)],
    );
    dispatcher.dispatch(&msg, &CorrelationId::generate()).await
}

async fn usage(pipeline: &TestPipeline, name: &str) -> Option<i64> {
    let mut conn = pipeline.db.acquire().await.unwrap();
    hashtags::find_hashtag(&mut conn, name)
        .await
        .unwrap()
        .map(|h| h.usage_count)
}

#[tokio::test]
async fn test_usage_change_matches_case_insensitively() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 2).await;

    let outcome = change(&pipeline, "Rust", "3").await;

    assert!(matches!(outcome, HandlerOutcome::Processed));
    assert_eq!(usage(&pipeline, "rust").await, Some(5));
}

#[tokio::test]
async fn test_usage_never_goes_negative() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 2).await;

    change(&pipeline, "rust", "-10").await;
    assert_eq!(usage(&pipeline, "rust").await, Some(0));

    change(&pipeline, "rust", "1").await;
    assert_eq!(usage(&pipeline, "rust").await, Some(1));
}

#[tokio::test]
async fn test_unknown_hashtag_is_acknowledged() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 2).await;

    let outcome = change(&pipeline, "golang", "1").await;

    assert!(matches!(outcome, HandlerOutcome::Processed));
    assert_eq!(usage(&pipeline, "golang").await, None);
    assert_eq!(usage(&pipeline, "rust").await, Some(2));
}

#[tokio::test]
async fn test_non_numeric_change_is_poison() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 2).await;

    let outcome = change(&pipeline, "rust", "lots").await;

    assert!(matches!(outcome, HandlerOutcome::Fatal(IngestError::Deserialization(_))));
    assert_eq!(usage(&pipeline, "rust").await, Some(2));
}

#[tokio::test]
async fn test_batch_change_updates_each_named_tag() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 1).await;
    seed_hashtag(&pipeline.db, "tokio", 4).await;

    let mut conn = pipeline.db.acquire().await.unwrap();
    let names = vec!["Rust".to_string(), "tokio".to_string(), "missing".to_string()];
    let updated = hashtags::apply_usage_change(&mut conn, &names, -2).await.unwrap();
    drop(conn);

    assert_eq!(updated, 2);
    assert_eq!(usage(&pipeline, "rust").await, Some(0));
    assert_eq!(usage(&pipeline, "tokio").await, Some(2));
}
