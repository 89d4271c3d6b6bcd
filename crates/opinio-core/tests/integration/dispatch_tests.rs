//! Integration tests for CompletionDispatcher.

use std::time::Duration;

use crate::integration::common::{MockCompletionClient, label_for};
use opinio_core::{
    CompletionDispatcher, CompletionRequest, DispatchResult, GenerationParams, RetryPolicy,
};

fn request(text: &str) -> CompletionRequest {
    CompletionRequest {
        system: "Classify".to_string(),
        user: format!("Text: \"{}\"\nSentiment:", text),
        params: GenerationParams::default(),
    }
}

/// Responses arrive in reverse launch order; results must still line up
/// with the records that produced them.
#[tokio::test(start_paused = true)]
async fn test_results_follow_origin_index_under_shuffled_completion() {
    let texts: Vec<String> = (0..10)
        .map(|i| {
            if i % 3 == 0 {
                format!("bad {}", i)
            } else {
                format!("good {}", i)
            }
        })
        .collect();

    let mut client = MockCompletionClient::new();
    for (i, text) in texts.iter().enumerate() {
        client = client.with_latency(text, Duration::from_millis(100 * (10 - i as u64)));
    }
    let dispatcher = CompletionDispatcher::new(client, RetryPolicy::completion());

    let requests = texts
        .iter()
        .enumerate()
        .map(|(i, text)| (100 + i, request(text)))
        .collect();
    let results = dispatcher.dispatch(requests).await;

    assert_eq!(results.len(), 10);
    for (position, (index, result)) in results.iter().enumerate() {
        assert_eq!(*index, 100 + position);
        match result {
            DispatchResult::Success(completion) => {
                assert_eq!(completion.label, label_for(&texts[position]));
            }
            DispatchResult::Failed(e) => panic!("unexpected failure: {}", e),
        }
    }
}

/// Exactly N results for N records, failures in the right places.
#[tokio::test(start_paused = true)]
async fn test_failed_fraction_is_exact_and_isolated() {
    let texts: Vec<String> = (0..10).map(|i| format!("good {}", i)).collect();
    let failing = ["good 1", "good 4", "good 8"];

    let mut client = MockCompletionClient::new().with_default_latency(Duration::from_millis(50));
    for text in failing {
        client = client.fail_always(text);
    }
    let dispatcher = CompletionDispatcher::new(client.clone(), RetryPolicy::completion());

    let requests = texts
        .iter()
        .enumerate()
        .map(|(i, text)| (i, request(text)))
        .collect();
    let results = dispatcher.dispatch(requests).await;

    assert_eq!(results.len(), 10);
    let failed: Vec<usize> = results
        .iter()
        .filter(|(_, r)| r.is_failure())
        .map(|(i, _)| *i)
        .collect();
    assert_eq!(failed, vec![1, 4, 8]);

    for text in failing {
        assert_eq!(client.call_count(text), 6);
    }
    assert_eq!(client.call_count("good 0"), 1);
}

/// A failing record waits 1s, 3s, 5s, 7s, 9s between its six attempts.
#[tokio::test(start_paused = true)]
async fn test_linear_backoff_between_attempts() {
    let client = MockCompletionClient::new().fail_always("bad apple");
    let dispatcher = CompletionDispatcher::new(client.clone(), RetryPolicy::completion());

    let results = dispatcher.dispatch(vec![(0, request("bad apple"))]).await;
    assert!(results[0].1.is_failure());

    let times = client.call_times("bad apple");
    let gaps: Vec<u64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 3, 5, 7, 9]);
}

/// A slow failing record does not hold back its siblings' requests.
#[tokio::test(start_paused = true)]
async fn test_retries_run_independently() {
    let client = MockCompletionClient::new()
        .fail_times("bad first", 2)
        .with_latency("good second", Duration::from_secs(2));
    let dispatcher = CompletionDispatcher::new(client.clone(), RetryPolicy::completion());

    let results = dispatcher
        .dispatch(vec![(0, request("bad first")), (1, request("good second"))])
        .await;

    assert!(results.iter().all(|(_, r)| !r.is_failure()));
    assert_eq!(client.call_count("bad first"), 3);
    assert_eq!(client.call_count("good second"), 1);
    // Both records started together.
    assert_eq!(
        client.call_times("bad first")[0],
        client.call_times("good second")[0]
    );
}
