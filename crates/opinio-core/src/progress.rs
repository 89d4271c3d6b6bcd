//! Progress reporting for classification and upload runs.
//!
//! The pipeline never touches caller-owned state. It emits owned
//! [`PipelineEvent`] values through a [`ProgressReporter`]; a CLI turns them
//! into log lines with [`TracingReporter`], a UI thread receives them over a
//! channel with [`ChannelReporter`].

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Which loop produced a batch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Main,
    Reprocess,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Reprocess => write!(f, "reprocess"),
        }
    }
}

/// Events emitted while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Overall progress in percent, 0 to 100.
    Progress(f64),
    TokensEstimated {
        kept: usize,
        removed: usize,
        prompt_overhead: usize,
        total_tokens: usize,
    },
    BatchStarted {
        phase: Phase,
        batch: usize,
        /// Positions within the phase, `first..=last`, 1-based.
        first: usize,
        last: usize,
        count: usize,
        tokens: usize,
    },
    BatchCompleted {
        phase: Phase,
        batch: usize,
        processed: usize,
        total: usize,
        failed: usize,
    },
    RecordFailed {
        index: usize,
        error: String,
    },
    CooldownStarted {
        phase: Phase,
        wait: Duration,
    },
    ReprocessingStarted {
        count: usize,
        cooldown: Duration,
    },
    ReprocessingSkipped,
    RunCompleted {
        processed: usize,
        residual_errors: usize,
    },
    UploadPrepared {
        valid: usize,
        excluded: usize,
        chunks: usize,
    },
    UploadRoundStarted {
        round: usize,
        chunks: usize,
        pending: usize,
    },
    UploadChunkFailed {
        chunk: usize,
        reason: String,
        will_retry: bool,
    },
    UploadBackoff {
        wait: Duration,
    },
    UploadCompleted {
        uploaded: usize,
        total: usize,
        dropped: usize,
        abandoned: usize,
    },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress(p) => write!(f, "Progress: {:.0}%", p),
            Self::TokensEstimated {
                kept,
                removed,
                prompt_overhead,
                total_tokens,
            } => write!(
                f,
                "Token estimate: {} tokens for {} mentions ({} per prompt, {} invalid rows removed)",
                total_tokens, kept, prompt_overhead, removed
            ),
            Self::BatchStarted {
                phase,
                batch,
                first,
                last,
                count,
                tokens,
            } => write!(
                f,
                "[{}] Batch {}: mentions {}-{} ({} requests, {} tokens)",
                phase, batch, first, last, count, tokens
            ),
            Self::BatchCompleted {
                phase,
                batch,
                processed,
                total,
                failed,
            } => write!(
                f,
                "[{}] Batch {} done: {}/{} processed, {} failed",
                phase, batch, processed, total, failed
            ),
            Self::RecordFailed { index, error } => {
                write!(f, "Mention {} failed: {}", index + 1, error)
            }
            Self::CooldownStarted { phase, wait } => write!(
                f,
                "[{}] Waiting {:.1}s for the rate limit window",
                phase,
                wait.as_secs_f64()
            ),
            Self::ReprocessingStarted { count, cooldown } => write!(
                f,
                "Reprocessing {} failed mentions after {}s",
                count,
                cooldown.as_secs()
            ),
            Self::ReprocessingSkipped => write!(f, "No failed mentions to reprocess"),
            Self::RunCompleted {
                processed,
                residual_errors,
            } => write!(
                f,
                "Run complete: {} mentions processed, {} could not be classified",
                processed, residual_errors
            ),
            Self::UploadPrepared {
                valid,
                excluded,
                chunks,
            } => write!(
                f,
                "Uploading {} mentions in {} chunks ({} excluded)",
                valid, chunks, excluded
            ),
            Self::UploadRoundStarted {
                round,
                chunks,
                pending,
            } => write!(
                f,
                "Upload round {}: sending {} chunks ({} pending)",
                round, chunks, pending
            ),
            Self::UploadChunkFailed {
                chunk,
                reason,
                will_retry,
            } => write!(
                f,
                "Upload chunk {} failed: {}{}",
                chunk + 1,
                reason,
                if *will_retry { " (will retry)" } else { "" }
            ),
            Self::UploadBackoff { wait } => {
                write!(f, "Upload rate limited, waiting {}s", wait.as_secs())
            }
            Self::UploadCompleted {
                uploaded,
                total,
                dropped,
                abandoned,
            } => write!(
                f,
                "Upload complete: {}/{} mentions uploaded, {} dropped, {} abandoned",
                uploaded, total, dropped, abandoned
            ),
        }
    }
}

/// Sink for pipeline events.
///
/// Reporting is fire-and-forget: implementations must not block and cannot
/// influence the run. The default implementation does nothing.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PipelineEvent) {
        let _ = event;
    }
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Progress(percent) => debug!(percent, "Progress"),
            PipelineEvent::RecordFailed { index, error } => {
                debug!(index, error = error.as_str(), "Mention failed")
            }
            PipelineEvent::UploadChunkFailed { .. } | PipelineEvent::UploadBackoff { .. } => {
                warn!("{}", event)
            }
            PipelineEvent::RunCompleted {
                residual_errors, ..
            } if *residual_errors > 0 => warn!("{}", event),
            _ => info!("{}", event),
        }
    }
}

/// Forwards events to another task or thread over an unbounded channel.
///
/// Send failures (receiver dropped) are ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<PipelineEvent>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for &R {
    fn report(&self, event: PipelineEvent) {
        (**self).report(event)
    }
}

// =============================================================================
// Progress ranges
// =============================================================================

/// A slice of the overall 0-100 progress scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Position of `done` out of `total` within the range.
    pub fn at(&self, done: usize, total: usize) -> f64 {
        if total == 0 {
            return self.end;
        }
        let fraction = (done as f64 / total as f64).clamp(0.0, 1.0);
        self.start + (self.end - self.start) * fraction
    }
}

/// How the progress scale is split between the phases of a run.
///
/// With an upload phase the model passes leave room at the top of the scale
/// for the upload sub-range. Writing the output and finishing take the last
/// steps, up to 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPlan {
    pub estimated: f64,
    pub main: ProgressRange,
    pub reprocess: ProgressRange,
    pub upload: ProgressRange,
    /// Results persisted (and uploaded, when requested).
    pub written: f64,
    pub done: f64,
}

impl ProgressPlan {
    pub fn new(upload: bool) -> Self {
        if upload {
            Self {
                estimated: 5.0,
                main: ProgressRange::new(5.0, 75.0),
                reprocess: ProgressRange::new(75.0, 85.0),
                upload: ProgressRange::new(85.0, 95.0),
                written: 98.0,
                done: 100.0,
            }
        } else {
            Self {
                estimated: 5.0,
                main: ProgressRange::new(5.0, 90.0),
                reprocess: ProgressRange::new(90.0, 95.0),
                upload: ProgressRange::new(95.0, 95.0),
                written: 98.0,
                done: 100.0,
            }
        }
    }

    /// Reports the closing steps once every output of the run is handled.
    pub fn finish<R: ProgressReporter + ?Sized>(&self, reporter: &R) {
        reporter.report(PipelineEvent::Progress(self.written));
        reporter.report(PipelineEvent::Progress(self.done));
    }
}
