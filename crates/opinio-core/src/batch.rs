//! Greedy batch partitioning against token and request budgets.

use crate::config::ModelLimits;

/// Returns the exclusive end of the batch starting at `start`.
///
/// The batch grows while it holds fewer than `request_budget` records and
/// the next record still fits in `token_budget`. A batch always contains at
/// least one record, even when that record alone exceeds the token budget,
/// so the result is `> start` whenever `start < token_counts.len()`.
pub fn next_batch_end(token_counts: &[usize], start: usize, limits: ModelLimits) -> usize {
    let len = token_counts.len();
    if start >= len {
        return len;
    }

    let request_budget = limits.request_budget.max(1);
    let mut end = start + 1;
    let mut tokens = token_counts[start];

    while end < len && end - start < request_budget {
        let next = token_counts[end];
        if tokens + next > limits.token_budget {
            break;
        }
        tokens += next;
        end += 1;
    }

    end
}

/// Splits `token_counts` into consecutive `(start, end)` ranges.
pub fn partition(token_counts: &[usize], limits: ModelLimits) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < token_counts.len() {
        let end = next_batch_end(token_counts, start, limits);
        ranges.push((start, end));
        start = end;
    }
    ranges
}
