//! Concurrent per-record completion dispatch.
//!
//! One request per record is launched at once for the whole batch. Each
//! record retries on its own schedule and a record that exhausts its
//! attempts becomes a [`DispatchResult::Failed`]; siblings are never
//! cancelled or delayed by it.

use futures::stream::{FuturesUnordered, StreamExt};

use crate::config::RunConfig;
use crate::models::{DispatchResult, Mention};
use crate::retry::RetryPolicy;
use crate::traits::{CompletionClient, CompletionRequest};

/// Issues completion requests for a batch and collects one result per record.
#[derive(Clone)]
pub struct CompletionDispatcher<C: CompletionClient> {
    client: C,
    retry: RetryPolicy,
}

impl<C: CompletionClient> CompletionDispatcher<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Sends every request concurrently and returns `(index, result)` pairs
    /// in submission order, whatever order the responses arrive in.
    pub async fn dispatch(
        &self,
        requests: Vec<(usize, CompletionRequest)>,
    ) -> Vec<(usize, DispatchResult)> {
        let mut slots: Vec<Option<DispatchResult>> = vec![None; requests.len()];
        let indices: Vec<usize> = requests.iter().map(|(index, _)| *index).collect();

        let mut in_flight: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(slot, (index, request))| async move {
                let result = self.complete_with_retry(index, &request).await;
                (slot, result)
            })
            .collect();

        while let Some((slot, result)) = in_flight.next().await {
            slots[slot] = Some(result);
        }

        indices
            .into_iter()
            .zip(slots)
            .map(|(index, result)| {
                // Every future resolves exactly once, so every slot is filled.
                let result = result
                    .unwrap_or_else(|| DispatchResult::Failed("request was not awaited".into()));
                (index, result)
            })
            .collect()
    }

    async fn complete_with_retry(&self, index: usize, request: &CompletionRequest) -> DispatchResult {
        let outcome = self
            .retry
            .run("completion", |_| self.client.complete(request), |_| true)
            .await;

        match outcome {
            Ok(completion) => DispatchResult::Success(completion),
            Err(e) => {
                tracing::warn!(
                    index,
                    attempts = self.retry.max_attempts,
                    error = %e,
                    "Completion failed after all attempts"
                );
                DispatchResult::Failed(e.to_string())
            }
        }
    }
}

/// Builds the request for one mention.
///
/// Records without text get an empty user message; the estimator removes
/// them before a run, so this only matters for direct callers.
pub fn build_request(mention: &Mention, config: &RunConfig) -> CompletionRequest {
    CompletionRequest {
        system: config
            .prompt
            .system_prompt(mention.analyzed_company.as_deref()),
        user: config
            .prompt
            .user_prompt(mention.valid_text().unwrap_or_default()),
        params: config.generation,
    }
}
