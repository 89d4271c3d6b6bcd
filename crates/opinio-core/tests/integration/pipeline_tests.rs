//! Integration tests for SentimentPipeline: the batch loop and the error
//! reprocessing pass.

use std::time::Duration;

use crate::integration::common::{
    ConstTokenCounter, MockCompletionClient, RecordingReporter, mentions, numbered_mentions,
    run_config,
};
use opinio_core::{Phase, PipelineEvent, ProgressRange, Sentiment, SentimentPipeline};
use tokio::time::Instant;

/// 12 records of 50 tokens each with a request budget of 5 give batches of
/// 5, 5 and 2, dispatched in order and spaced by the 30s cooldown.
#[tokio::test(start_paused = true)]
async fn test_twelve_records_make_three_ordered_batches() {
    let client = MockCompletionClient::new();
    let reporter = RecordingReporter::new();
    let pipeline = SentimentPipeline::new(client.clone(), ConstTokenCounter(16), run_config(1000, 5));

    let started = Instant::now();
    let output = pipeline
        .run(numbered_mentions(12), &reporter)
        .await
        .unwrap();

    assert!(output.mentions.iter().all(|m| m.token_count == 50));
    assert_eq!(reporter.batch_sizes(), vec![5, 5, 2]);
    assert_eq!(output.summary.batches, 3);
    assert_eq!(output.summary.processed, 12);
    assert!(output.mentions.iter().all(|m| m.sentiment == Sentiment::Positive));

    let expected_order: Vec<String> = (0..12).map(|i| format!("good mention {}", i)).collect();
    assert_eq!(client.calls(), expected_order);

    let batch_starts: Vec<u64> = [0, 5, 10]
        .iter()
        .map(|i| (client.call_times(&expected_order[*i])[0] - started).as_secs())
        .collect();
    assert_eq!(batch_starts, vec![0, 30, 60]);
}

/// The cooldown runs from the start of a dispatch, so slow responses
/// shorten the wait instead of adding to it.
#[tokio::test(start_paused = true)]
async fn test_cooldown_measured_from_dispatch_start() {
    let client = MockCompletionClient::new().with_default_latency(Duration::from_secs(10));
    let reporter = RecordingReporter::new();
    let pipeline = SentimentPipeline::new(client.clone(), ConstTokenCounter(1), run_config(1000, 1));

    let started = Instant::now();
    pipeline
        .run(mentions(&["good one", "good two"]), &reporter)
        .await
        .unwrap();

    let second = client.call_times("good two")[0];
    assert_eq!((second - started).as_secs(), 30);

    let waits: Vec<Duration> = reporter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::CooldownStarted { wait, .. } => Some(wait),
            _ => None,
        })
        .collect();
    assert_eq!(waits, vec![Duration::from_secs(20)]);
}

/// A record failing all six attempts in both passes ends as FinalError and
/// is reported once as a residual error.
#[tokio::test(start_paused = true)]
async fn test_persistent_failure_becomes_final_error() {
    let client = MockCompletionClient::new().fail_always("bad broken");
    let reporter = RecordingReporter::new();
    let pipeline = SentimentPipeline::new(client.clone(), ConstTokenCounter(1), run_config(1000, 10));

    let output = pipeline
        .run(mentions(&["good a", "bad broken", "bad b"]), &reporter)
        .await
        .unwrap();

    assert_eq!(output.mentions[0].sentiment, Sentiment::Positive);
    assert_eq!(output.mentions[1].sentiment, Sentiment::FinalError);
    assert_eq!(output.mentions[1].probability, None);
    assert_eq!(output.mentions[2].sentiment, Sentiment::Negative);

    assert_eq!(output.summary.main_pass_errors, 1);
    assert_eq!(output.summary.reprocessed, 1);
    assert_eq!(output.summary.residual_errors, 1);
    assert_eq!(client.call_count("bad broken"), 12);
    assert_eq!(client.call_count("good a"), 1);

    let completed: Vec<usize> = reporter
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::RunCompleted {
                residual_errors, ..
            } => Some(residual_errors),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![1]);
}

/// The reprocessing pass waits 35s, then writes recovered results back into
/// the original position.
#[tokio::test(start_paused = true)]
async fn test_reprocessing_recovers_in_place() {
    let client = MockCompletionClient::new().fail_times("good late", 6);
    let reporter = RecordingReporter::new();
    let pipeline = SentimentPipeline::new(client.clone(), ConstTokenCounter(1), run_config(1000, 10));

    let output = pipeline
        .run(mentions(&["bad x", "good late", "neutral y"]), &reporter)
        .await
        .unwrap();

    assert_eq!(output.mentions[1].sentiment, Sentiment::Positive);
    assert!(output.mentions[1].probability.is_some());
    assert_eq!(output.mentions[0].sentiment, Sentiment::Negative);
    assert_eq!(output.mentions[2].sentiment, Sentiment::Neutral);
    assert_eq!(output.summary.main_pass_errors, 1);
    assert_eq!(output.summary.residual_errors, 0);

    let times = client.call_times("good late");
    assert_eq!(times.len(), 7);
    // Sixth attempt at 25s, then 35s cooldown.
    assert_eq!((times[6] - times[5]).as_secs(), 35);

    let reprocess_batches = reporter
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::BatchStarted {
                    phase: Phase::Reprocess,
                    count: 1,
                    ..
                }
            )
        })
        .count();
    assert_eq!(reprocess_batches, 1);
}

/// Reprocessing a collection without failures sends nothing and does not wait.
#[tokio::test(start_paused = true)]
async fn test_reprocessing_without_errors_is_noop() {
    let client = MockCompletionClient::new();
    let reporter = RecordingReporter::new();
    let pipeline = SentimentPipeline::new(client.clone(), ConstTokenCounter(1), run_config(1000, 10));

    let mut records = mentions(&["good a", "bad b"]);
    records[0].sentiment = Sentiment::Positive;
    records[1].sentiment = Sentiment::FinalError;

    let started = Instant::now();
    let stats = pipeline
        .reprocess_errors(&mut records, ProgressRange::new(90.0, 95.0), &reporter)
        .await;

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.batches, 0);
    assert_eq!(client.total_calls(), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(reporter.events(), vec![PipelineEvent::ReprocessingSkipped]);
    assert_eq!(records[1].sentiment, Sentiment::FinalError);
}

/// Progress never goes backwards and stops short of the upload sub-range
/// when an upload follows.
#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_scaled() {
    let client = MockCompletionClient::new();
    let reporter = RecordingReporter::new();
    let config = opinio_core::RunConfig::builder("gpt-4o-mini")
        .with_upload(true)
        .with_limits(opinio_core::ModelLimits {
            token_budget: 1000,
            request_budget: 3,
        })
        .build(&opinio_core::ModelRegistry::default())
        .unwrap();
    let pipeline = SentimentPipeline::new(client, ConstTokenCounter(1), config);

    let records = numbered_mentions(7)
        .into_iter()
        .enumerate()
        .map(|(i, m)| m.with_refs(1998, format!("r{}", i)))
        .collect();
    pipeline.run(records, &reporter).await.unwrap();

    let progress = reporter.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.first().copied(), Some(5.0));
    assert_eq!(progress.last().copied(), Some(75.0));
}

/// Blank records are dropped before estimation; the batch loop never sees them.
#[tokio::test(start_paused = true)]
async fn test_invalid_records_never_dispatched() {
    let client = MockCompletionClient::new();
    let reporter = RecordingReporter::new();
    let pipeline = SentimentPipeline::new(client.clone(), ConstTokenCounter(1), run_config(1000, 10));

    let mut records = mentions(&["good a", "", "  ", "bad b"]);
    records.push(opinio_core::Mention::default());
    let output = pipeline.run(records, &reporter).await.unwrap();

    assert_eq!(output.summary.removed_invalid, 3);
    assert_eq!(output.mentions.len(), 2);
    assert_eq!(client.total_calls(), 2);
}
