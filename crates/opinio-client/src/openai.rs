//! OpenAI chat completions backend.
//!
//! Sends one system and one user message per record and asks for at most
//! `max_output_tokens` tokens back. When log-probabilities are requested,
//! the logprob of the first answer token is returned with the label.
//!
//! # Examples
//!
//! ```no_run
//! use opinio_client::{HttpCompletionClient, OpenAiBackend};
//! use opinio_core::HttpConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = OpenAiBackend::new("sk-your-api-key", "gpt-4o-mini");
//! let client = HttpCompletionClient::new(backend, &HttpConfig::default())?;
//! # Ok(())
//! # }
//! ```

use opinio_core::Completion;
use opinio_core::error::AppError;
use opinio_core::traits::{CompletionRequest, ModelBackend};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::{completion_from, provider_error};

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI wire format.
#[derive(Clone)]
pub struct OpenAiBackend {
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_endpoint(api_key, model, OPENAI_ENDPOINT)
    }

    /// Uses a custom endpoint (Azure OpenAI, proxies).
    pub fn with_endpoint(api_key: &str, model: &str, endpoint: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

/// System and user message pair of a chat completions request.
pub(crate) fn chat_messages(request: &CompletionRequest) -> Value {
    json!([
        { "role": "system", "content": request.system },
        { "role": "user", "content": request.user },
    ])
}

// =============================================================================
// Response parsing (shared with OpenAI-compatible APIs)
// =============================================================================

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Option<Vec<TokenLogprob>>,
}

#[derive(Deserialize)]
struct TokenLogprob {
    logprob: f64,
}

/// Parses a chat completions response body.
///
/// `choices[0].message.content` is the label; the logprob comes from
/// `choices[0].logprobs.content[0].logprob` when present.
pub(crate) fn parse_chat_completion(
    provider: &'static str,
    status: u16,
    body: &str,
) -> Result<Completion, AppError> {
    if !(200..300).contains(&status) {
        return Err(provider_error(provider, status, body));
    }

    let response: ChatResponse = serde_json::from_str(body)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(AppError::EmptyResponse)?;
    let logprob = choice
        .logprobs
        .and_then(|l| l.content)
        .and_then(|tokens| tokens.first().map(|t| t.logprob));

    completion_from(choice.message.content.as_deref(), logprob)
}

// =============================================================================
// Trait Implementation: ModelBackend
// =============================================================================

impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        )]
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "messages": chat_messages(request),
            "temperature": request.params.temperature,
            "max_completion_tokens": request.params.max_output_tokens,
            "logprobs": request.params.logprobs,
            "store": true,
        })
    }

    fn parse_response(&self, status: u16, body: &str) -> Result<Completion, AppError> {
        parse_chat_completion(self.name(), status, body)
    }
}
