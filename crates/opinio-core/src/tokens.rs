//! Token cost estimation.
//!
//! Every record is charged for its own text plus the fixed cost of the prompt
//! around it, so the partitioner can pack batches against a token budget.

use std::collections::BTreeSet;

use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base};

use crate::config::{ModelFamily, PromptTemplate, RunConfig};
use crate::error::AppError;
use crate::models::Mention;

/// Added to every record's count for the message framing tokens.
pub const TOKEN_PADDING: usize = 2;

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Local BPE tokenizer backed by tiktoken-rs.
///
/// OpenAI models use their own encoding when tiktoken knows the name. Other
/// families have no local tokenizer, so counts are approximated with
/// `o200k_base` (Gemini) or `cl100k_base` (DeepSeek and unknown OpenAI names).
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn for_model(model: &str, family: ModelFamily) -> Result<Self, AppError> {
        let lower = model.to_ascii_lowercase();
        let loaded = match family {
            ModelFamily::OpenAI => get_bpe_from_model(&lower).or_else(|_| cl100k_base()),
            ModelFamily::Gemini => o200k_base(),
            ModelFamily::DeepSeek => cl100k_base(),
        };
        let bpe = loaded.map_err(|e| {
            AppError::ConfigError(format!("Failed to load tokenizer for '{}': {}", model, e))
        })?;
        Ok(Self { bpe })
    }

    pub fn for_config(config: &RunConfig) -> Result<Self, AppError> {
        Self::for_model(&config.model, config.family)
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Outcome of [`estimate_tokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenEstimate {
    /// Records dropped because their text was missing or blank.
    pub removed: usize,
    /// Records kept.
    pub kept: usize,
    /// Cost of the prompt around an empty text.
    pub prompt_overhead: usize,
    /// Sum of all kept records' token counts.
    pub total_tokens: usize,
}

/// Fixed prompt cost. When the system prompt is filled per record, the most
/// expensive company in the dataset is charged to every record.
pub fn prompt_overhead<T>(mentions: &[Mention], prompt: &PromptTemplate, counter: &T) -> usize
where
    T: TokenCounter + ?Sized,
{
    let mut system_tokens = counter.count(&prompt.system_prompt(None));
    if prompt.uses_company_placeholder() {
        let companies: BTreeSet<&str> = mentions
            .iter()
            .filter_map(|m| m.analyzed_company.as_deref())
            .collect();
        for company in companies {
            system_tokens = system_tokens.max(counter.count(&prompt.system_prompt(Some(company))));
        }
    }

    system_tokens + counter.count(&prompt.user_prompt(""))
}

/// Drops records without usable text and fills `token_count` on the rest.
///
/// Order of the surviving records is preserved.
pub fn estimate_tokens<T>(
    mentions: &mut Vec<Mention>,
    prompt: &PromptTemplate,
    counter: &T,
) -> TokenEstimate
where
    T: TokenCounter + ?Sized,
{
    let before = mentions.len();
    mentions.retain(|m| m.valid_text().is_some());
    let removed = before - mentions.len();
    if removed > 0 {
        tracing::warn!(removed, "Dropped records with empty or non-text content");
    }

    let overhead = prompt_overhead(mentions, prompt, counter);
    let mut total_tokens = 0;
    for mention in mentions.iter_mut() {
        let text_tokens = mention.valid_text().map_or(0, |t| counter.count(t));
        mention.token_count = text_tokens + overhead + TOKEN_PADDING;
        total_tokens += mention.token_count;
    }

    TokenEstimate {
        removed,
        kept: mentions.len(),
        prompt_overhead: overhead,
        total_tokens,
    }
}
