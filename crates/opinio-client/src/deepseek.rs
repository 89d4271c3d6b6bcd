//! DeepSeek chat completions backend.
//!
//! OpenAI-compatible wire format with two differences: the output limit is
//! `max_tokens`, and it is sent one higher than configured because DeepSeek's
//! tokenizer needs two tokens for "Neutral".

use opinio_core::Completion;
use opinio_core::error::AppError;
use opinio_core::traits::{CompletionRequest, ModelBackend};
use serde_json::{Value, json};

use crate::openai::{chat_messages, parse_chat_completion};

pub const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/chat/completions";

/// DeepSeek wire format.
#[derive(Clone)]
pub struct DeepSeekBackend {
    api_key: String,
    model: String,
}

impl DeepSeekBackend {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

impl ModelBackend for DeepSeekBackend {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn endpoint(&self) -> String {
        DEEPSEEK_ENDPOINT.to_string()
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ]
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "messages": chat_messages(request),
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_output_tokens.saturating_add(1),
            "logprobs": request.params.logprobs,
        })
    }

    fn parse_response(&self, status: u16, body: &str) -> Result<Completion, AppError> {
        parse_chat_completion(self.name(), status, body)
    }
}
