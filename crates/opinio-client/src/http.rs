//! Shared HTTP plumbing for the completion backends.
//!
//! [`HttpCompletionClient`] owns the `reqwest` client and performs exactly
//! one POST per call. Everything vendor-specific lives behind
//! [`ModelBackend`]: URL, headers, payload and response parsing.

use std::time::Instant;

use opinio_core::error::{AppError, ProviderErrorDetails, ProviderErrorKind};
use opinio_core::traits::{CompletionClient, CompletionRequest, ModelBackend};
use opinio_core::{Completion, HttpConfig};
use reqwest::Client;
use serde::Deserialize;

/// Completion client for any [`ModelBackend`].
#[derive(Clone)]
pub struct HttpCompletionClient<B: ModelBackend> {
    client: Client,
    backend: B,
    timeout_secs: u64,
}

impl<B: ModelBackend> HttpCompletionClient<B> {
    /// Creates a client with the given per-request timeout.
    pub fn new(backend: B, http: &HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            backend,
            timeout_secs: http.timeout.as_secs(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: ModelBackend> CompletionClient for HttpCompletionClient<B> {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AppError> {
        let started = Instant::now();
        let mut builder = self
            .client
            .post(self.backend.endpoint())
            .json(&self.backend.build_payload(request));
        for (name, value) in self.backend.headers() {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        tracing::trace!(
            provider = self.backend.name(),
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completion request finished"
        );

        self.backend.parse_response(status, &body)
    }
}

/// Maps a `reqwest` failure to the error taxonomy.
pub(crate) fn map_transport_error(error: reqwest::Error, timeout_secs: u64) -> AppError {
    if error.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if error.is_connect() {
        AppError::NetworkError(format!("Connection failed: {}", error))
    } else {
        AppError::ClientError(error.to_string())
    }
}

/// Error body shared by OpenAI-compatible APIs and Gemini:
/// `{"error": {"message": "..."}}`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Classify a provider error based on status code and message.
pub(crate) fn classify_error(status_code: u16, message: &str) -> ProviderErrorKind {
    match status_code {
        401 | 403 => ProviderErrorKind::Authentication,
        429 => {
            if message.contains("insufficient_quota") || message.contains("quota") {
                ProviderErrorKind::QuotaExceeded
            } else {
                ProviderErrorKind::RateLimit
            }
        }
        500..=599 => ProviderErrorKind::ServerError,
        _ => {
            if message.contains("API key") || message.contains("Unauthorized") {
                ProviderErrorKind::Authentication
            } else if message.contains("rate") {
                ProviderErrorKind::RateLimit
            } else if message.contains("quota") {
                ProviderErrorKind::QuotaExceeded
            } else if status_code == 400 || status_code == 404 || status_code == 422 {
                ProviderErrorKind::InvalidRequest
            } else {
                ProviderErrorKind::Unknown
            }
        }
    }
}

/// Builds the error for a non-2xx response.
pub(crate) fn provider_error(provider: &'static str, status_code: u16, body: &str) -> AppError {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => format!("HTTP {}: {}", status_code, body),
    };
    let kind = classify_error(status_code, &message);
    AppError::ProviderError(ProviderErrorDetails::new(
        provider,
        kind,
        message,
        status_code,
    ))
}

/// Trims the model answer, rejecting an empty one.
pub(crate) fn completion_from(
    label: Option<&str>,
    logprob: Option<f64>,
) -> Result<Completion, AppError> {
    match label.map(str::trim) {
        Some(label) if !label.is_empty() => Ok(Completion {
            label: label.to_string(),
            logprob,
        }),
        _ => Err(AppError::EmptyResponse),
    }
}
