//! Data model for a classification run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentiment label attached to a mention.
///
/// `Error` marks a record whose completion failed in the main pass,
/// `FinalError` one that also failed in the reprocessing pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Error,
    FinalError,
    #[default]
    Unset,
    /// A label the model returned that is not one of the three classes.
    Other(String),
}

impl Sentiment {
    /// Parses a label as written in a dataset or returned by a model.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace and
    /// trailing punctuation, so `" positive."` becomes `Positive`.
    pub fn parse_label(label: &str) -> Self {
        let trimmed = label
            .trim()
            .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
        match trimmed.to_ascii_lowercase().as_str() {
            "positive" => Self::Positive,
            "neutral" => Self::Neutral,
            "negative" => Self::Negative,
            "error" => Self::Error,
            "final error" => Self::FinalError,
            "" => Self::Unset,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// True for records the reprocessing pass should pick up.
    pub fn needs_reprocessing(&self) -> bool {
        matches!(self, Self::Error | Self::Unset)
    }

    /// Lower-case label accepted by the upload target, if any.
    pub fn upload_label(&self) -> Option<&'static str> {
        match self {
            Self::Positive => Some("positive"),
            Self::Neutral => Some("neutral"),
            Self::Negative => Some("negative"),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "Positive"),
            Self::Neutral => write!(f, "Neutral"),
            Self::Negative => write!(f, "Negative"),
            Self::Error => write!(f, "Error"),
            Self::FinalError => write!(f, "Final Error"),
            Self::Unset => Ok(()),
            Self::Other(label) => write!(f, "{}", label),
        }
    }
}

/// Identifiers linking a mention back to the upload target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRefs {
    pub query_id: i64,
    pub resource_id: String,
}

/// One social-media or web text record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Content to classify. `None` when the source cell was not text.
    pub text: Option<String>,
    /// Token cost including prompt overhead, filled by the estimator.
    pub token_count: usize,
    pub sentiment: Sentiment,
    /// `exp(logprob)` of the returned label, when log-probabilities were requested.
    pub probability: Option<f64>,
    pub external_refs: Option<ExternalRefs>,
    /// Publication date as it appeared in the source file.
    pub date: Option<String>,
    /// Company the sentiment is measured toward, for per-record company prompts.
    pub analyzed_company: Option<String>,
    /// Tags to add on upload.
    pub tags: Vec<String>,
}

impl Mention {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_refs(mut self, query_id: i64, resource_id: impl Into<String>) -> Self {
        self.external_refs = Some(ExternalRefs {
            query_id,
            resource_id: resource_id.into(),
        });
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.analyzed_company = Some(company.into());
        self
    }

    /// Text usable for classification: present and not blank.
    pub fn valid_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Stores a successful completion on the record.
    pub fn apply_completion(&mut self, completion: &Completion) {
        self.sentiment = Sentiment::parse_label(&completion.label);
        self.probability = completion.logprob.map(f64::exp);
    }
}

/// Parsed answer from a completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub label: String,
    pub logprob: Option<f64>,
}

/// Per-record outcome of a dispatched completion request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Success(Completion),
    /// All attempts failed; carries the last error message.
    Failed(String),
}

impl DispatchResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
