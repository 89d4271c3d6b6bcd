//! Google Gemini `generateContent` backend.
//!
//! # Security
//!
//! The API key is sent in the `x-goog-api-key` header, not in the URL, so it
//! does not end up in logs and proxies.

use opinio_core::Completion;
use opinio_core::error::AppError;
use opinio_core::traits::{CompletionRequest, ModelBackend};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::{completion_from, provider_error};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini wire format.
#[derive(Clone)]
pub struct GeminiBackend {
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    logprobs_result: Option<LogprobsResult>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogprobsResult {
    #[serde(default)]
    chosen_candidates: Vec<ChosenCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChosenCandidate {
    log_probability: Option<f64>,
}

// =============================================================================
// Trait Implementation: ModelBackend
// =============================================================================

impl ModelBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model)
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![("x-goog-api-key".to_string(), self.api_key.clone())]
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "parts": [{ "text": request.user }] }],
            "generationConfig": {
                "temperature": request.params.temperature,
                "maxOutputTokens": request.params.max_output_tokens,
                "responseLogprobs": request.params.logprobs,
            },
        })
    }

    fn parse_response(&self, status: u16, body: &str) -> Result<Completion, AppError> {
        if !(200..300).contains(&status) {
            return Err(provider_error(self.name(), status, body));
        }

        let response: GenerateResponse = serde_json::from_str(body)?;
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or(AppError::EmptyResponse)?;

        let label = candidate
            .content
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text);
        let logprob = candidate
            .logprobs_result
            .and_then(|r| r.chosen_candidates.into_iter().next())
            .and_then(|c| c.log_probability);

        completion_from(label.as_deref(), logprob)
    }
}
