//! Batch processing loop and error reprocessing pass.
//!
//! # Flow
//!
//! 1. Drop unusable records and estimate token costs
//! 2. Main pass: partition into batches, dispatch each, merge results back
//! 3. Reprocessing pass: after a cooldown, retry every record left at
//!    `Error` or unset, exactly once; leftovers become `FinalError`
//!
//! Batches run strictly one after another. Consecutive batch dispatches are
//! spaced by the batch cooldown, measured from the start of the previous
//! dispatch, so result handling overlaps with the wait.

use chrono::{DateTime, Utc};
use tokio::time::{Instant, sleep, sleep_until};

use crate::batch::next_batch_end;
use crate::config::RunConfig;
use crate::dispatch::{CompletionDispatcher, build_request};
use crate::error::AppError;
use crate::models::{DispatchResult, Mention, Sentiment};
use crate::progress::{Phase, PipelineEvent, ProgressPlan, ProgressRange, ProgressReporter};
use crate::tokens::{TokenCounter, estimate_tokens};
use crate::traits::CompletionClient;

/// Counters for one pass over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    pub batches: usize,
    pub processed: usize,
    pub failed: usize,
    /// Wall-clock time the first batch of the pass was dispatched.
    pub first_dispatch: Option<DateTime<Utc>>,
}

/// Summary of a complete run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub first_batch_started_at: Option<DateTime<Utc>>,
    pub removed_invalid: usize,
    pub total_tokens: usize,
    pub batches: usize,
    pub processed: usize,
    pub main_pass_errors: usize,
    pub reprocessed: usize,
    /// Records still at `Error` or `FinalError` at the end of the run.
    pub residual_errors: usize,
}

/// Records and summary returned by [`SentimentPipeline::run`].
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub mentions: Vec<Mention>,
    pub summary: RunSummary,
}

/// Drives estimation, the main pass and the reprocessing pass.
pub struct SentimentPipeline<C: CompletionClient, T: TokenCounter> {
    dispatcher: CompletionDispatcher<C>,
    counter: T,
    config: RunConfig,
}

impl<C: CompletionClient, T: TokenCounter> SentimentPipeline<C, T> {
    pub fn new(client: C, counter: T, config: RunConfig) -> Self {
        let dispatcher = CompletionDispatcher::new(client, config.completion_retry);
        Self {
            dispatcher,
            counter,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Classifies every mention.
    ///
    /// Per-record failures never surface as `Err`; they end up as `Error` or
    /// `FinalError` sentinels counted in the summary. An `Err` means the
    /// dataset cannot be processed at all and no request was sent.
    pub async fn run<R: ProgressReporter>(
        &self,
        mut mentions: Vec<Mention>,
        reporter: &R,
    ) -> Result<RunOutput, AppError> {
        if self.config.upload && !mentions.iter().any(|m| m.external_refs.is_some()) {
            return Err(AppError::MissingColumn("Query Id / Resource Id".to_string()));
        }

        let plan = ProgressPlan::new(self.config.upload);
        let estimate = estimate_tokens(&mut mentions, &self.config.prompt, &self.counter);
        reporter.report(PipelineEvent::TokensEstimated {
            kept: estimate.kept,
            removed: estimate.removed,
            prompt_overhead: estimate.prompt_overhead,
            total_tokens: estimate.total_tokens,
        });
        reporter.report(PipelineEvent::Progress(plan.estimated));

        let all: Vec<usize> = (0..mentions.len()).collect();
        let main = self
            .process_indices(&mut mentions, &all, Phase::Main, plan.main, reporter)
            .await;
        let reprocess = self
            .reprocess_errors(&mut mentions, plan.reprocess, reporter)
            .await;

        let residual_errors = mentions
            .iter()
            .filter(|m| matches!(m.sentiment, Sentiment::Error | Sentiment::FinalError))
            .count();
        reporter.report(PipelineEvent::RunCompleted {
            processed: main.processed,
            residual_errors,
        });

        let summary = RunSummary {
            first_batch_started_at: main.first_dispatch,
            removed_invalid: estimate.removed,
            total_tokens: estimate.total_tokens,
            batches: main.batches + reprocess.batches,
            processed: main.processed,
            main_pass_errors: main.failed,
            reprocessed: reprocess.processed,
            residual_errors,
        };
        Ok(RunOutput { mentions, summary })
    }

    /// Retries every record at `Error` or unset, once, after the
    /// reprocessing cooldown. Records that fail again become `FinalError`.
    ///
    /// Does nothing, and does not wait, when there is nothing to retry.
    pub async fn reprocess_errors<R: ProgressReporter>(
        &self,
        mentions: &mut [Mention],
        range: ProgressRange,
        reporter: &R,
    ) -> PassStats {
        let pending: Vec<usize> = mentions
            .iter()
            .enumerate()
            .filter(|(_, m)| m.sentiment.needs_reprocessing())
            .map(|(i, _)| i)
            .collect();

        if pending.is_empty() {
            reporter.report(PipelineEvent::ReprocessingSkipped);
            return PassStats::default();
        }

        let cooldown = self.config.pacing.reprocess_cooldown;
        reporter.report(PipelineEvent::ReprocessingStarted {
            count: pending.len(),
            cooldown,
        });
        sleep(cooldown).await;

        self.process_indices(mentions, &pending, Phase::Reprocess, range, reporter)
            .await
    }

    /// Runs the batch loop over `indices`, writing results back into
    /// `mentions` at those positions.
    async fn process_indices<R: ProgressReporter>(
        &self,
        mentions: &mut [Mention],
        indices: &[usize],
        phase: Phase,
        range: ProgressRange,
        reporter: &R,
    ) -> PassStats {
        let failure = match phase {
            Phase::Main => Sentiment::Error,
            Phase::Reprocess => Sentiment::FinalError,
        };
        let token_counts: Vec<usize> = indices.iter().map(|&i| mentions[i].token_count).collect();
        let total = indices.len();
        let cooldown = self.config.pacing.batch_cooldown;
        let mut stats = PassStats::default();
        let mut start = 0;

        while start < total {
            let end = next_batch_end(&token_counts, start, self.config.limits);
            stats.batches += 1;
            reporter.report(PipelineEvent::BatchStarted {
                phase,
                batch: stats.batches,
                first: start + 1,
                last: end,
                count: end - start,
                tokens: token_counts[start..end].iter().sum(),
            });

            let dispatch_started = Instant::now();
            stats.first_dispatch.get_or_insert_with(Utc::now);

            let requests = indices[start..end]
                .iter()
                .map(|&i| (i, build_request(&mentions[i], &self.config)))
                .collect();
            let results = self.dispatcher.dispatch(requests).await;

            let mut failed = 0;
            for (index, result) in results {
                let mention = &mut mentions[index];
                match result {
                    DispatchResult::Success(completion) => mention.apply_completion(&completion),
                    DispatchResult::Failed(error) => {
                        failed += 1;
                        mention.sentiment = failure.clone();
                        mention.probability = None;
                        reporter.report(PipelineEvent::RecordFailed { index, error });
                    }
                }
            }

            stats.processed += end - start;
            stats.failed += failed;
            reporter.report(PipelineEvent::BatchCompleted {
                phase,
                batch: stats.batches,
                processed: stats.processed,
                total,
                failed: stats.failed,
            });
            reporter.report(PipelineEvent::Progress(range.at(stats.processed, total)));

            start = end;
            if start < total {
                let resume_at = dispatch_started + cooldown;
                reporter.report(PipelineEvent::CooldownStarted {
                    phase,
                    wait: resume_at.saturating_duration_since(Instant::now()),
                });
                sleep_until(resume_at).await;
            }
        }

        stats
    }
}
