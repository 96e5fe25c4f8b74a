//! Stream worker: acknowledgement by outcome, redelivery and shutdown

mod helpers;

use helpers::{seed_hashtag, seed_post_with_media, TestPipeline};
use kscope_ai::consumers::Dispatcher;
use kscope_ai::db::hashtags;
use kscope_ai::stream::{StreamTransport, StreamWorker, WorkerSettings};
use kscope_common::events::{streams, Fields};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GROUP: &str = "kscope-ai-test";

fn settings(redelivery_timeout: Duration) -> WorkerSettings {
    WorkerSettings {
        group: GROUP.to_string(),
        consumer: "worker-1".to_string(),
        batch_size: 10,
        poll_interval: Duration::from_millis(10),
        redelivery_timeout,
        pending_report_interval: Duration::from_secs(60),
    }
}

fn worker(pipeline: &TestPipeline, stream: &str, redelivery_timeout: Duration) -> StreamWorker {
    StreamWorker::new(
        stream,
        pipeline.log.clone(),
        Dispatcher::new(pipeline.state.clone()),
        settings(redelivery_timeout),
    )
}

async fn pending(pipeline: &TestPipeline, stream: &str) -> u64 {
    pipeline.log.pending_count(stream, GROUP).await.unwrap()
}

#[tokio::test]
async fn test_processed_and_skipped_are_acked_fatal_stays_pending() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 0).await;
    let stream = streams::HASHTAG_USAGE_SYNC;

    let worker = worker(&pipeline, stream, Duration::from_secs(60));
    worker.prepare().await.unwrap();

    let log = &pipeline.log;
    log.publish(stream, Fields::new().with("hashtagName", "rust").with("change", "1"))
        .await
        .unwrap();
    log.publish(stream, Fields::new().with("hashtagName", "rust").with("change", "many"))
        .await
        .unwrap();
    log.publish(stream, Fields::new().with("hashtagName", "ghost").with("change", "1"))
        .await
        .unwrap();

    assert_eq!(worker.poll_once().await.unwrap(), 3);
    assert_eq!(pending(&pipeline, stream).await, 1);

    let mut conn = pipeline.db.acquire().await.unwrap();
    let rust = hashtags::find_hashtag(&mut conn, "rust").await.unwrap().unwrap();
    assert_eq!(rust.usage_count, 1);
}

#[tokio::test]
async fn test_retryable_message_is_redelivered_and_then_acked() {
    let pipeline = TestPipeline::new().await;
    let stream = streams::ML_INSIGHTS;

    let worker = worker(&pipeline, stream, Duration::from_millis(300));
    worker.prepare().await.unwrap();
    pipeline
        .log
        .publish(stream, Fields::new().with("mediaId", "7").with("tags", "people"))
        .await
        .unwrap();

    // Media item not written yet
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(pending(&pipeline, stream).await, 1);

    seed_post_with_media(&pipeline.db, 3, &[7]).await;

    // Not idle long enough to be claimed
    assert_eq!(worker.poll_once().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(pending(&pipeline, stream).await, 0);

    let triggers = pipeline.drain(streams::POST_AGGREGATION_TRIGGER).await;
    assert_eq!(triggers.len(), 1);
}

#[tokio::test]
async fn test_poison_message_is_redelivered_but_never_acked() {
    let pipeline = TestPipeline::new().await;
    let stream = streams::FACE_DETECTION;

    let worker = worker(&pipeline, stream, Duration::from_millis(10));
    worker.prepare().await.unwrap();
    pipeline
        .log
        .publish(stream, Fields::new().with("mediaId", "7").with("bbox", "1,2,oops"))
        .await
        .unwrap();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.poll_once().await.unwrap(), 1);
        assert_eq!(pending(&pipeline, stream).await, 1);
    }
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let pipeline = TestPipeline::new().await;
    seed_hashtag(&pipeline.db, "rust", 0).await;
    let stream = streams::HASHTAG_USAGE_SYNC;
    pipeline
        .log
        .publish(stream, Fields::new().with("hashtagName", "rust").with("change", "2"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker(&pipeline, stream, Duration::from_secs(60)).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should stop promptly")
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(pending(&pipeline, stream).await, 0);
    let mut conn = pipeline.db.acquire().await.unwrap();
    let rust = hashtags::find_hashtag(&mut conn, "rust").await.unwrap().unwrap();
    assert_eq!(rust.usage_count, 2);
}
