//! Backend factory and dynamic dispatch.
//!
//! [`ModelBackend`] is used as a generic bound, so runtime selection goes
//! through the [`ModelBackendEnum`] enum rather than a trait object.
//!
//! # Usage
//!
//! ```no_run
//! use opinio_client::provider::{ApiKeys, completion_client};
//! use opinio_core::{ModelRegistry, RunConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::builder("gemini-2.0-flash").build(&ModelRegistry::default())?;
//! let keys = ApiKeys {
//!     gemini: Some("your-api-key".to_string()),
//!     ..Default::default()
//! };
//! let client = completion_client(&config, &keys)?;
//! # Ok(())
//! # }
//! ```

use opinio_core::error::AppError;
use opinio_core::traits::{CompletionRequest, ModelBackend};
use opinio_core::{Completion, ModelFamily, RunConfig};

use crate::http::HttpCompletionClient;
use crate::{DeepSeekBackend, GeminiBackend, OpenAiBackend};

/// Runtime-selected backend.
#[derive(Clone)]
pub enum ModelBackendEnum {
    OpenAI(OpenAiBackend),
    Gemini(GeminiBackend),
    DeepSeek(DeepSeekBackend),
}

impl ModelBackendEnum {
    /// Creates the backend for a model family.
    pub fn for_family(family: ModelFamily, api_key: &str, model: &str) -> Self {
        match family {
            ModelFamily::OpenAI => Self::OpenAI(OpenAiBackend::new(api_key, model)),
            ModelFamily::Gemini => Self::Gemini(GeminiBackend::new(api_key, model)),
            ModelFamily::DeepSeek => Self::DeepSeek(DeepSeekBackend::new(api_key, model)),
        }
    }
}

impl ModelBackend for ModelBackendEnum {
    fn name(&self) -> &'static str {
        match self {
            Self::OpenAI(b) => b.name(),
            Self::Gemini(b) => b.name(),
            Self::DeepSeek(b) => b.name(),
        }
    }

    fn endpoint(&self) -> String {
        match self {
            Self::OpenAI(b) => b.endpoint(),
            Self::Gemini(b) => b.endpoint(),
            Self::DeepSeek(b) => b.endpoint(),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::OpenAI(b) => b.headers(),
            Self::Gemini(b) => b.headers(),
            Self::DeepSeek(b) => b.headers(),
        }
    }

    fn build_payload(&self, request: &CompletionRequest) -> serde_json::Value {
        match self {
            Self::OpenAI(b) => b.build_payload(request),
            Self::Gemini(b) => b.build_payload(request),
            Self::DeepSeek(b) => b.build_payload(request),
        }
    }

    fn parse_response(&self, status: u16, body: &str) -> Result<Completion, AppError> {
        match self {
            Self::OpenAI(b) => b.parse_response(status, body),
            Self::Gemini(b) => b.parse_response(status, body),
            Self::DeepSeek(b) => b.parse_response(status, body),
        }
    }
}

/// API keys per vendor. Only the one for the selected model is required.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub gemini: Option<String>,
    pub deepseek: Option<String>,
}

impl ApiKeys {
    /// Returns the key for `family` or a configuration error naming the
    /// environment variable to set.
    pub fn for_family(&self, family: ModelFamily) -> Result<&str, AppError> {
        let (key, var) = match family {
            ModelFamily::OpenAI => (&self.openai, "OPENAI_API_KEY"),
            ModelFamily::Gemini => (&self.gemini, "GEMINI_API_KEY"),
            ModelFamily::DeepSeek => (&self.deepseek, "DEEPSEEK_API_KEY"),
        };
        key.as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError(format!("{} is not set", var)))
    }
}

/// Builds the HTTP completion client for a resolved run configuration.
pub fn completion_client(
    config: &RunConfig,
    keys: &ApiKeys,
) -> Result<HttpCompletionClient<ModelBackendEnum>, AppError> {
    let api_key = keys.for_family(config.family)?;
    let backend = ModelBackendEnum::for_family(config.family, api_key, &config.model);
    HttpCompletionClient::new(backend, &config.http)
}
