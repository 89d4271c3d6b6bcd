//! Test utilities and mock implementations for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opinio_core::traits::{CompletionClient, CompletionRequest, MentionsUploader};
use opinio_core::{
    AppError, Completion, Mention, ModelLimits, ModelRegistry, PipelineEvent, ProgressReporter,
    ProviderErrorDetails, ProviderErrorKind, RunConfig, TokenCounter, UploadRecord,
    UploadResponse,
};
use tokio::time::Instant;

// =============================================================================
// MockCompletionClient
// =============================================================================

/// Completion client with scripted failures and latencies.
///
/// Requests are keyed by the mention text found between the quotes of the
/// user prompt. Texts containing "good" are labelled Positive, "bad"
/// Negative, anything else Neutral.
#[derive(Clone, Default)]
pub struct MockCompletionClient {
    state: Arc<Mutex<CompletionState>>,
}

#[derive(Default)]
struct CompletionState {
    /// Remaining failing calls per text; `usize::MAX` fails forever.
    failures: HashMap<String, usize>,
    latencies: HashMap<String, Duration>,
    default_latency: Duration,
    calls: Vec<(String, Instant)>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call for `text` answers HTTP 500.
    pub fn fail_always(self, text: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(text.to_string(), usize::MAX);
        self
    }

    /// The first `times` calls for `text` answer HTTP 500.
    pub fn fail_times(self, text: &str, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(text.to_string(), times);
        self
    }

    pub fn with_latency(self, text: &str, latency: Duration) -> Self {
        self.state
            .lock()
            .unwrap()
            .latencies
            .insert(text.to_string(), latency);
        self
    }

    pub fn with_default_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().default_latency = latency;
        self
    }

    /// Texts in the order their requests started.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    /// Start times of every request for `text`.
    pub fn call_times(&self, text: &str) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(t, _)| t == text)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn call_count(&self, text: &str) -> usize {
        self.call_times(text).len()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

/// Extracts the mention text from `Text: "<text>"\nSentiment:`.
pub fn text_of(user_prompt: &str) -> String {
    match (user_prompt.find('"'), user_prompt.rfind('"')) {
        (Some(open), Some(close)) if close > open => user_prompt[open + 1..close].to_string(),
        _ => user_prompt.to_string(),
    }
}

pub fn label_for(text: &str) -> &'static str {
    if text.contains("good") {
        "Positive"
    } else if text.contains("bad") {
        "Negative"
    } else {
        "Neutral"
    }
}

impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AppError> {
        let text = text_of(&request.user);
        let (latency, fail) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((text.clone(), Instant::now()));
            let latency = state
                .latencies
                .get(&text)
                .copied()
                .unwrap_or(state.default_latency);
            let fail = match state.failures.get_mut(&text) {
                Some(remaining) if *remaining == usize::MAX => true,
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (latency, fail)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if fail {
            return Err(AppError::ProviderError(ProviderErrorDetails::new(
                "mock",
                ProviderErrorKind::ServerError,
                "Internal Server Error",
                500,
            )));
        }

        Ok(Completion {
            label: label_for(&text).to_string(),
            logprob: Some(-0.1),
        })
    }
}

// =============================================================================
// Token counting
// =============================================================================

/// Every piece of text costs the same number of tokens.
///
/// With the default prompt a record costs `3 * n + 2`: its text, the system
/// prompt, the empty user prompt and the padding.
pub struct ConstTokenCounter(pub usize);

impl TokenCounter for ConstTokenCounter {
    fn count(&self, _text: &str) -> usize {
        self.0
    }
}

pub fn run_config(token_budget: usize, request_budget: usize) -> RunConfig {
    RunConfig::builder("gpt-4o-mini")
        .with_limits(ModelLimits {
            token_budget,
            request_budget,
        })
        .build(&ModelRegistry::default())
        .unwrap()
}

pub fn mentions(texts: &[&str]) -> Vec<Mention> {
    texts.iter().map(|t| Mention::new(*t)).collect()
}

pub fn numbered_mentions(n: usize) -> Vec<Mention> {
    (0..n)
        .map(|i| Mention::new(format!("good mention {}", i)))
        .collect()
}

// =============================================================================
// MockUploader
// =============================================================================

/// Scripted reply for one upload request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(UploadResponse),
    TransportTimeout,
}

pub fn ok_reply() -> MockReply {
    MockReply::Response(UploadResponse {
        status: 200,
        body: "[]".to_string(),
    })
}

pub fn status_reply(status: u16) -> MockReply {
    MockReply::Response(UploadResponse {
        status,
        body: String::new(),
    })
}

pub fn api_error_reply(code: i64, message: &str) -> MockReply {
    MockReply::Response(UploadResponse {
        status: 400,
        body: serde_json::json!({ "errors": [{ "code": code, "message": message }] }).to_string(),
    })
}

/// One recorded PATCH request.
#[derive(Debug, Clone)]
pub struct UploadCall {
    pub first_resource_id: String,
    pub len: usize,
    pub had_tags: bool,
    pub at: Instant,
}

/// Uploader with per-chunk scripted replies.
///
/// Chunks are identified by the resource id of their first record. Once a
/// chunk's script is used up, it succeeds.
#[derive(Clone, Default)]
pub struct MockUploader {
    state: Arc<Mutex<UploaderState>>,
}

#[derive(Default)]
struct UploaderState {
    scripts: HashMap<String, VecDeque<MockReply>>,
    always: HashMap<String, MockReply>,
    calls: Vec<UploadCall>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, first_resource_id: &str, replies: Vec<MockReply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(first_resource_id.to_string(), replies.into());
        self
    }

    pub fn always(self, first_resource_id: &str, reply: MockReply) -> Self {
        self.state
            .lock()
            .unwrap()
            .always
            .insert(first_resource_id.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, first_resource_id: &str) -> Vec<UploadCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.first_resource_id == first_resource_id)
            .collect()
    }
}

impl MentionsUploader for MockUploader {
    async fn patch(&self, records: &[UploadRecord]) -> Result<UploadResponse, AppError> {
        let key = records
            .first()
            .map(|r| r.resource_id.clone())
            .unwrap_or_default();
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(UploadCall {
                first_resource_id: key.clone(),
                len: records.len(),
                had_tags: records.iter().any(|r| !r.add_tag.is_empty()),
                at: Instant::now(),
            });
            if let Some(reply) = state.always.get(&key) {
                reply.clone()
            } else {
                state
                    .scripts
                    .get_mut(&key)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(ok_reply)
            }
        };

        match reply {
            MockReply::Response(response) => Ok(response),
            MockReply::TransportTimeout => Err(AppError::Timeout(30)),
        }
    }
}

pub fn upload_records(n: usize) -> Vec<UploadRecord> {
    (0..n)
        .map(|i| UploadRecord {
            query_id: 1998,
            resource_id: format!("r{}", i),
            sentiment: "positive".to_string(),
            checked: true,
            date: None,
            add_tag: Vec::new(),
        })
        .collect()
}

// =============================================================================
// RecordingReporter
// =============================================================================

/// Keeps every event for later inspection.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Size of every batch, in dispatch order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::BatchStarted { count, .. } => Some(count),
                _ => None,
            })
            .collect()
    }

    pub fn backoff_waits(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::UploadBackoff { wait } => Some(wait),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
