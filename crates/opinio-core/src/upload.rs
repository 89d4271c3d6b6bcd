//! Upload of classified mentions to Brandwatch.
//!
//! Records are validated, split into fixed-size chunks and sent in rounds of
//! concurrent PATCH requests. Every chunk response is classified:
//!
//! | Response                                | Outcome          |
//! |-----------------------------------------|------------------|
//! | HTTP 429                                | `RateLimit`      |
//! | HTTP 408/502/503/504, unparsable body   | `Transient`      |
//! | transport error or client timeout       | `Transient`      |
//! | API error with the timeout code         | `Timeout`        |
//! | API error about a duplicate tag         | `DuplicateField` |
//! | any other API error                     | `PermanentDrop`  |
//! | anything else                           | `Success`        |
//!
//! Only failed chunks go into the next round. A rate-limited round doubles
//! the shared backoff (60s up to 600s); a round with successes and no rate
//! limit resets it. After `max_attempts` consecutive rounds without a single
//! successful chunk the remaining chunks are abandoned and counted.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

use crate::config::UploadConfig;
use crate::error::AppError;
use crate::models::Mention;
use crate::progress::{PipelineEvent, ProgressRange, ProgressReporter};
use crate::traits::MentionsUploader;

const TRANSIENT_STATUS_CODES: [u16; 4] = [408, 502, 503, 504];
const RATE_LIMIT_STATUS: u16 = 429;

// =============================================================================
// Wire types
// =============================================================================

/// One entry of the PATCH body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub query_id: i64,
    pub resource_id: String,
    pub sentiment: String,
    pub checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_tag: Vec<String>,
}

/// Raw HTTP response to a chunk upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

// =============================================================================
// Record preparation
// =============================================================================

/// Upload-ready records plus what was left out.
#[derive(Debug, Clone, Default)]
pub struct PreparedUpload {
    pub records: Vec<UploadRecord>,
    /// Records whose sentiment is not positive, negative or neutral.
    pub invalid_sentiment: usize,
    /// Records without query and resource identifiers.
    pub missing_refs: usize,
}

impl PreparedUpload {
    pub fn excluded(&self) -> usize {
        self.invalid_sentiment + self.missing_refs
    }
}

/// Validates mentions and converts them to upload records.
///
/// Fails only when no mention carries external identifiers, meaning the
/// input had no identifier columns at all.
pub fn prepare_upload(mentions: &[Mention]) -> Result<PreparedUpload, AppError> {
    if !mentions.is_empty() && !mentions.iter().any(|m| m.external_refs.is_some()) {
        return Err(AppError::MissingColumn("Query Id / Resource Id".to_string()));
    }

    let mut prepared = PreparedUpload::default();
    for mention in mentions {
        let Some(refs) = &mention.external_refs else {
            prepared.missing_refs += 1;
            continue;
        };
        let Some(sentiment) = mention.sentiment.upload_label() else {
            prepared.invalid_sentiment += 1;
            continue;
        };
        prepared.records.push(UploadRecord {
            query_id: refs.query_id,
            resource_id: refs.resource_id.clone(),
            sentiment: sentiment.to_string(),
            checked: true,
            date: mention.date.as_deref().and_then(normalize_date),
            add_tag: mention.tags.clone(),
        });
    }

    if prepared.invalid_sentiment > 0 {
        tracing::warn!(
            count = prepared.invalid_sentiment,
            "Excluding mentions with invalid sentiment from upload"
        );
    }
    if prepared.missing_refs > 0 {
        tracing::warn!(
            count = prepared.missing_refs,
            "Excluding mentions without Query Id / Resource Id from upload"
        );
    }

    Ok(prepared)
}

/// Normalizes a date to `YYYY-MM-DDTHH:MM:SS.ffffff+0000`.
///
/// Offsets are converted to UTC; naive timestamps are taken as UTC.
pub fn normalize_date(raw: &str) -> Option<String> {
    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f+0000";
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%d/%m/%Y %H:%M:%S",
    ];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(FORMAT).to_string());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.format(FORMAT).to_string());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(FORMAT).to_string())
}

// =============================================================================
// Response classification
// =============================================================================

/// Result of sending one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// All records accepted.
    Success(usize),
    RateLimit,
    Transient(String),
    Timeout(String),
    /// The platform rejected a tag already present on a mention.
    DuplicateField(String),
    PermanentDrop(String),
}

/// Classifies a chunk response. `chunk_len` is the success count.
pub fn classify_response(
    status: u16,
    body: &str,
    chunk_len: usize,
    config: &UploadConfig,
) -> ChunkOutcome {
    if status == RATE_LIMIT_STATUS {
        return ChunkOutcome::RateLimit;
    }
    if TRANSIENT_STATUS_CODES.contains(&status) {
        return ChunkOutcome::Transient(format!("HTTP {}", status));
    }

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return ChunkOutcome::Transient(format!("invalid JSON response: {}", e)),
    };

    let errors: Vec<ApiError> = match value.get("errors") {
        None => Vec::new(),
        Some(raw) => match serde_json::from_value(raw.clone()) {
            Ok(errors) => errors,
            Err(_) => return ChunkOutcome::PermanentDrop(raw.to_string()),
        },
    };

    if errors.is_empty() {
        if (200..300).contains(&status) {
            return ChunkOutcome::Success(chunk_len);
        }
        return ChunkOutcome::PermanentDrop(format!("HTTP {}", status));
    }

    let summary = errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{} (code {})", e.message, code),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ");

    if errors
        .iter()
        .any(|e| e.code == Some(config.timeout_error_code))
    {
        return ChunkOutcome::Timeout(summary);
    }
    if errors.iter().any(|e| is_duplicate_tag(e, config)) {
        return ChunkOutcome::DuplicateField(summary);
    }
    ChunkOutcome::PermanentDrop(summary)
}

fn is_duplicate_tag(error: &ApiError, config: &UploadConfig) -> bool {
    if let (Some(expected), Some(code)) = (config.duplicate_tag_error_code, error.code) {
        if expected == code {
            return true;
        }
    }
    let message = error.message.to_lowercase();
    message.contains("duplicate") && message.contains("tag")
}

// =============================================================================
// Upload Dispatcher
// =============================================================================

/// Counters for an upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Records handed to the dispatcher.
    pub total: usize,
    pub uploaded: usize,
    /// Records in chunks rejected permanently.
    pub dropped: usize,
    /// Records in chunks given up after too many stalled rounds.
    pub abandoned: usize,
    /// Mentions left out during preparation.
    pub excluded: usize,
    pub rounds: usize,
}

#[derive(Debug)]
struct Chunk {
    id: usize,
    records: Vec<UploadRecord>,
}

impl Chunk {
    fn len(&self) -> usize {
        self.records.len()
    }

    /// Removes every tag; false if there was nothing to remove.
    fn strip_tags(&mut self) -> bool {
        let mut stripped = false;
        for record in &mut self.records {
            if !record.add_tag.is_empty() {
                record.add_tag.clear();
                stripped = true;
            }
        }
        stripped
    }
}

/// Sends prepared records in concurrent rounds of chunks.
#[derive(Clone)]
pub struct UploadDispatcher<U: MentionsUploader> {
    uploader: U,
    config: UploadConfig,
}

impl<U: MentionsUploader> UploadDispatcher<U> {
    pub fn new(uploader: U, config: UploadConfig) -> Self {
        Self { uploader, config }
    }

    /// Prepares and uploads classified mentions.
    pub async fn upload_mentions<R: ProgressReporter>(
        &self,
        mentions: &[Mention],
        range: ProgressRange,
        reporter: &R,
    ) -> Result<UploadSummary, AppError> {
        let prepared = prepare_upload(mentions)?;
        let excluded = prepared.excluded();
        let mut summary = self.upload_records(prepared.records, range, reporter, excluded).await;
        summary.excluded = excluded;
        Ok(summary)
    }

    /// Uploads already prepared records.
    pub async fn upload_records<R: ProgressReporter>(
        &self,
        records: Vec<UploadRecord>,
        range: ProgressRange,
        reporter: &R,
        excluded: usize,
    ) -> UploadSummary {
        let total = records.len();
        let chunk_size = self.config.chunk_size.max(1);
        let mut pending: VecDeque<Chunk> = records
            .chunks(chunk_size)
            .enumerate()
            .map(|(id, records)| Chunk {
                id,
                records: records.to_vec(),
            })
            .collect();

        reporter.report(PipelineEvent::UploadPrepared {
            valid: total,
            excluded,
            chunks: pending.len(),
        });

        let mut summary = UploadSummary {
            total,
            excluded,
            ..Default::default()
        };
        let mut rate_limit_streak = 0;
        let mut stalled_rounds = 0;

        while !pending.is_empty() {
            summary.rounds += 1;
            let take = pending.len().min(self.config.max_concurrent_chunks.max(1));
            let round: Vec<Chunk> = pending.drain(..take).collect();
            reporter.report(PipelineEvent::UploadRoundStarted {
                round: summary.rounds,
                chunks: round.len(),
                pending: pending.len(),
            });

            let outcomes = join_all(round.iter().map(|chunk| self.send_chunk(chunk))).await;

            let mut retry = Vec::new();
            let mut rate_limited = false;
            let mut progressed = false;
            for (mut chunk, outcome) in round.into_iter().zip(outcomes) {
                match outcome {
                    ChunkOutcome::Success(count) => {
                        summary.uploaded += count;
                        progressed = true;
                    }
                    ChunkOutcome::RateLimit => {
                        rate_limited = true;
                        report_retry(reporter, &chunk, "rate limited (HTTP 429)".to_string());
                        retry.push(chunk);
                    }
                    ChunkOutcome::Transient(reason) => {
                        report_retry(reporter, &chunk, reason);
                        retry.push(chunk);
                    }
                    ChunkOutcome::Timeout(reason) => {
                        report_retry(reporter, &chunk, format!("server timeout: {}", reason));
                        retry.push(chunk);
                    }
                    ChunkOutcome::DuplicateField(reason) => {
                        if chunk.strip_tags() {
                            report_retry(
                                reporter,
                                &chunk,
                                format!("duplicate tag, retrying without tags: {}", reason),
                            );
                            retry.push(chunk);
                        } else {
                            summary.dropped += chunk.len();
                            report_drop(reporter, &chunk, reason);
                        }
                    }
                    ChunkOutcome::PermanentDrop(reason) => {
                        summary.dropped += chunk.len();
                        report_drop(reporter, &chunk, reason);
                    }
                }
            }

            if progressed {
                stalled_rounds = 0;
                reporter.report(PipelineEvent::Progress(range.at(summary.uploaded, total)));
            } else if !retry.is_empty() {
                stalled_rounds += 1;
            }

            let had_failures = !retry.is_empty();
            for chunk in retry.into_iter().rev() {
                pending.push_front(chunk);
            }
            if pending.is_empty() {
                break;
            }

            if stalled_rounds >= self.config.retry.max_attempts {
                summary.abandoned = pending.iter().map(Chunk::len).sum();
                tracing::error!(
                    rounds = stalled_rounds,
                    chunks = pending.len(),
                    records = summary.abandoned,
                    "Giving up on upload after repeated failed rounds"
                );
                break;
            }

            if rate_limited {
                rate_limit_streak += 1;
                let wait = self.config.retry.delay_for_attempt(rate_limit_streak);
                reporter.report(PipelineEvent::UploadBackoff { wait });
                sleep(wait).await;
            } else {
                if progressed {
                    rate_limit_streak = 0;
                }
                if had_failures {
                    sleep(self.config.transient_pause).await;
                }
            }
        }

        reporter.report(PipelineEvent::UploadCompleted {
            uploaded: summary.uploaded,
            total,
            dropped: summary.dropped,
            abandoned: summary.abandoned,
        });
        summary
    }

    async fn send_chunk(&self, chunk: &Chunk) -> ChunkOutcome {
        let started = Instant::now();
        match self.uploader.patch(&chunk.records).await {
            Ok(response) => {
                tracing::debug!(
                    chunk = chunk.id,
                    status = response.status,
                    records = chunk.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upload request finished"
                );
                classify_response(response.status, &response.body, chunk.len(), &self.config)
            }
            Err(e) => {
                tracing::debug!(chunk = chunk.id, error = %e, "Upload request failed");
                ChunkOutcome::Transient(e.to_string())
            }
        }
    }
}

fn report_retry<R: ProgressReporter>(reporter: &R, chunk: &Chunk, reason: String) {
    reporter.report(PipelineEvent::UploadChunkFailed {
        chunk: chunk.id,
        reason,
        will_retry: true,
    });
}

fn report_drop<R: ProgressReporter>(reporter: &R, chunk: &Chunk, reason: String) {
    tracing::warn!(
        chunk = chunk.id,
        records = chunk.len(),
        reason = reason.as_str(),
        "Dropping upload chunk"
    );
    reporter.report(PipelineEvent::UploadChunkFailed {
        chunk: chunk.id,
        reason,
        will_retry: false,
    });
}
