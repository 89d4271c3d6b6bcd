//! Integration tests for UploadDispatcher.

use std::time::Duration;

use crate::integration::common::{
    MockReply, MockUploader, RecordingReporter, api_error_reply, status_reply, upload_records,
};
use opinio_core::{
    Mention, PipelineEvent, ProgressRange, RetryPolicy, Sentiment, UploadConfig, UploadDispatcher,
};
use tokio::time::Instant;

const UPLOAD_RANGE: ProgressRange = ProgressRange::new(85.0, 95.0);

fn small_chunks() -> UploadConfig {
    UploadConfig::default().with_chunk_size(10)
}

/// One chunk out of five is rate limited: the other four count right away,
/// the limited one goes out again after the 60s backoff.
#[tokio::test(start_paused = true)]
async fn test_rate_limited_chunk_retried_after_backoff() {
    let uploader = MockUploader::new().script("r20", vec![status_reply(429)]);
    let reporter = RecordingReporter::new();
    let dispatcher = UploadDispatcher::new(uploader.clone(), small_chunks());

    let started = Instant::now();
    let summary = dispatcher
        .upload_records(upload_records(50), UPLOAD_RANGE, &reporter, 0)
        .await;

    assert_eq!(summary.uploaded, 50);
    assert_eq!(summary.total, 50);
    assert_eq!(summary.dropped, 0);
    assert_eq!(summary.rounds, 2);

    assert_eq!(reporter.progress(), vec![UPLOAD_RANGE.at(40, 50), 95.0]);
    assert_eq!(reporter.backoff_waits(), vec![Duration::from_secs(60)]);

    let retried = uploader.calls_for("r20");
    assert_eq!(retried.len(), 2);
    assert_eq!((retried[1].at - started).as_secs(), 60);
    for other in ["r0", "r10", "r30", "r40"] {
        assert_eq!(uploader.calls_for(other).len(), 1);
    }
}

/// 2721 records split into 1360 + 1360 + 1, sent in one round, with a single
/// progress report at the top of the upload range.
#[tokio::test(start_paused = true)]
async fn test_default_chunking_reports_progress_once() {
    let uploader = MockUploader::new();
    let reporter = RecordingReporter::new();
    let dispatcher = UploadDispatcher::new(uploader.clone(), UploadConfig::default());

    let summary = dispatcher
        .upload_records(upload_records(2721), UPLOAD_RANGE, &reporter, 0)
        .await;

    let sizes: Vec<usize> = uploader.calls().iter().map(|c| c.len).collect();
    assert_eq!(sizes, vec![1360, 1360, 1]);
    assert_eq!(summary.uploaded, 2721);
    assert_eq!(summary.rounds, 1);
    assert_eq!(reporter.progress(), vec![95.0]);
}

/// The backoff doubles across consecutive rate-limited rounds and resets
/// after a clean round.
#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_resets() {
    let uploader = MockUploader::new()
        .script("r0", vec![status_reply(429), status_reply(429)])
        .script("r10", vec![status_reply(429)]);
    let reporter = RecordingReporter::new();
    let dispatcher = UploadDispatcher::new(uploader, small_chunks().with_max_concurrent_chunks(1));

    let summary = dispatcher
        .upload_records(upload_records(20), UPLOAD_RANGE, &reporter, 0)
        .await;

    assert_eq!(summary.uploaded, 20);
    assert_eq!(
        reporter.backoff_waits(),
        vec![
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(60)
        ]
    );
}

/// HTTP 503, a server-side timeout error and a client timeout are all
/// retried without touching the rate-limit backoff.
#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let uploader = MockUploader::new().script(
        "r0",
        vec![
            status_reply(503),
            api_error_reply(100, "Request timed out"),
            MockReply::TransportTimeout,
        ],
    );
    let reporter = RecordingReporter::new();
    let dispatcher = UploadDispatcher::new(uploader.clone(), small_chunks());

    let summary = dispatcher
        .upload_records(upload_records(10), UPLOAD_RANGE, &reporter, 0)
        .await;

    assert_eq!(summary.uploaded, 10);
    assert_eq!(uploader.calls_for("r0").len(), 4);
    assert!(reporter.backoff_waits().is_empty());
}

/// A duplicate tag error strips the tags and resends the same records.
#[tokio::test(start_paused = true)]
async fn test_duplicate_tag_retried_without_tags() {
    let mut records = upload_records(10);
    for record in &mut records {
        record.add_tag = vec!["Campaign".to_string()];
    }
    let uploader = MockUploader::new().script(
        "r0",
        vec![api_error_reply(35, "Duplicate tag on mention")],
    );
    let dispatcher = UploadDispatcher::new(uploader.clone(), small_chunks());

    let summary = dispatcher
        .upload_records(records, UPLOAD_RANGE, &RecordingReporter::new(), 0)
        .await;

    let calls = uploader.calls_for("r0");
    assert_eq!(calls.len(), 2);
    assert!(calls[0].had_tags);
    assert!(!calls[1].had_tags);
    assert_eq!(calls[1].len, 10);
    assert_eq!(summary.uploaded, 10);
}

/// Any other API error drops the chunk for good.
#[tokio::test(start_paused = true)]
async fn test_permanent_error_drops_chunk() {
    let uploader = MockUploader::new().always("r10", api_error_reply(7, "Invalid resourceId"));
    let reporter = RecordingReporter::new();
    let dispatcher = UploadDispatcher::new(uploader.clone(), small_chunks());

    let summary = dispatcher
        .upload_records(upload_records(25), UPLOAD_RANGE, &reporter, 0)
        .await;

    assert_eq!(summary.uploaded, 15);
    assert_eq!(summary.dropped, 10);
    assert_eq!(summary.rounds, 1);
    assert_eq!(uploader.calls_for("r10").len(), 1);
    assert!(reporter.events().iter().any(|e| matches!(
        e,
        PipelineEvent::UploadChunkFailed {
            chunk: 1,
            will_retry: false,
            ..
        }
    )));
}

/// A chunk that never succeeds is abandoned after the stalled-round bound.
#[tokio::test(start_paused = true)]
async fn test_stalled_chunk_is_abandoned() {
    let uploader = MockUploader::new().always("r0", status_reply(502));
    let dispatcher = UploadDispatcher::new(uploader.clone(), small_chunks());

    let summary = dispatcher
        .upload_records(upload_records(10), UPLOAD_RANGE, &RecordingReporter::new(), 0)
        .await;

    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.abandoned, 10);
    assert_eq!(uploader.calls_for("r0").len(), 5);
}

/// Rounds that make progress reset the stalled-round count.
#[tokio::test(start_paused = true)]
async fn test_stall_bound_counts_consecutive_rounds_only() {
    let uploader = MockUploader::new()
        .script("r0", vec![status_reply(503); 3])
        .script("r10", vec![status_reply(503); 3]);
    let config = small_chunks()
        .with_max_concurrent_chunks(1)
        .with_retry(RetryPolicy::upload().with_max_attempts(4));
    let dispatcher = UploadDispatcher::new(uploader, config);

    let summary = dispatcher
        .upload_records(upload_records(20), UPLOAD_RANGE, &RecordingReporter::new(), 0)
        .await;

    assert_eq!(summary.uploaded, 20);
    assert_eq!(summary.abandoned, 0);
}

/// Mentions with unusable sentiment are counted and never sent.
#[tokio::test(start_paused = true)]
async fn test_upload_mentions_excludes_invalid_sentiment() {
    let mut mentions: Vec<Mention> = (0..4)
        .map(|i| Mention::new(format!("m{}", i)).with_refs(1998, format!("r{}", i)))
        .collect();
    mentions[0].sentiment = Sentiment::Positive;
    mentions[1].sentiment = Sentiment::FinalError;
    mentions[2].sentiment = Sentiment::Negative;
    mentions[3].sentiment = Sentiment::Other("Mixed".to_string());

    let uploader = MockUploader::new();
    let dispatcher = UploadDispatcher::new(uploader.clone(), UploadConfig::default());
    let summary = dispatcher
        .upload_mentions(&mentions, UPLOAD_RANGE, &RecordingReporter::new())
        .await
        .unwrap();

    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.excluded, 2);
    let calls = uploader.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len, 2);
}

#[tokio::test]
async fn test_upload_of_nothing() {
    let uploader = MockUploader::new();
    let dispatcher = UploadDispatcher::new(uploader.clone(), UploadConfig::default());
    let summary = dispatcher
        .upload_records(Vec::new(), UPLOAD_RANGE, &RecordingReporter::new(), 0)
        .await;
    assert_eq!(summary.uploaded, 0);
    assert!(uploader.calls().is_empty());
}
