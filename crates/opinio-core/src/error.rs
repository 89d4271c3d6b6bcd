use thiserror::Error;

/// Provider error classification.
///
/// Completion backends map HTTP status codes and error bodies onto these
/// categories so the retry layer can reason about them uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Authentication failure (401/403, invalid API key)
    Authentication,
    /// Rate limit exceeded (429)
    RateLimit,
    /// Quota exhausted (insufficient_quota, billing)
    QuotaExceeded,
    /// Request rejected as malformed (400, 404, 422)
    InvalidRequest,
    /// Server error (5xx)
    ServerError,
    /// Unknown or unclassified error
    Unknown,
}

/// Structured error details returned by a completion provider.
#[derive(Debug, Clone)]
pub struct ProviderErrorDetails {
    /// Backend that produced the error ("openai", "gemini", ...).
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status_code: u16,
}

impl ProviderErrorDetails {
    pub fn new(
        provider: &'static str,
        kind: ProviderErrorKind,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self {
            provider,
            kind,
            message: message.into(),
            status_code,
        }
    }
}

impl std::fmt::Display for ProviderErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} API error (HTTP {}): {}",
            self.provider, self.status_code, self.message
        )
    }
}

/// Application-wide error types.
///
/// Only configuration and dataset-level problems are returned to callers of
/// the pipeline. Per-record completion failures and per-chunk upload failures
/// are folded into sentinels and summary counts instead.
///
/// ```no_run
/// use opinio_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::UnsupportedModel("gpt-2".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP client request failed before a response was received.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// The completion provider answered with an error status.
    #[error("Provider error: {0}")]
    ProviderError(ProviderErrorDetails),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// API response contained no usable content.
    #[error("Empty response from API")]
    EmptyResponse,

    /// API response was well-formed JSON but did not have the expected shape.
    #[error("Invalid response from API: {0}")]
    InvalidResponse(String),

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// The model identifier has no entry in the model registry.
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// A column required by the requested operation is missing from the dataset.
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ClientError(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The API may be slow or unreachable.\n   Try again later."
                        .to_string()
                } else if msg.contains("connect") {
                    format!(
                        "Cannot connect to API: {}\n   Check your internet connection.",
                        msg
                    )
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::ProviderError(details) => match details.kind {
                ProviderErrorKind::Authentication => format!(
                    "Invalid {} API key.\n   Check the API key flag or environment variable.",
                    details.provider
                ),
                ProviderErrorKind::RateLimit => format!(
                    "{} rate limit reached.\n   Wait a moment and try again.",
                    details.provider
                ),
                ProviderErrorKind::QuotaExceeded => format!(
                    "{} quota exceeded.\n   Check your account billing.",
                    details.provider
                ),
                ProviderErrorKind::ServerError => format!(
                    "{} server error (HTTP {}).\n   Please try again later.",
                    details.provider, details.status_code
                ),
                ProviderErrorKind::InvalidRequest | ProviderErrorKind::Unknown => {
                    format!("{} error: {}", details.provider, details.message)
                }
            },
            AppError::UnsupportedModel(model) => format!(
                "Unsupported model: {}\n   Run `opinio models` to list configured models.",
                model
            ),
            AppError::MissingColumn(column) => format!(
                "The input file has no '{}' column.\n   Check the export settings.",
                column
            ),
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => format!(
                "Request timed out after {} seconds.\n   The server may be overloaded. Try again later.",
                secs
            ),
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::EmptyResponse => "The API returned no data.".to_string(),
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// ```
    /// use opinio_core::error::AppError;
    ///
    /// assert!(AppError::NetworkError("connection reset".to_string()).is_retryable());
    /// assert!(AppError::Timeout(30).is_retryable());
    /// assert!(!AppError::UnsupportedModel("gpt-2".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::ClientError(_)
            | AppError::EmptyResponse
            | AppError::InvalidResponse(_)
            | AppError::SerializationError(_) => true,
            AppError::ProviderError(details) => matches!(
                details.kind,
                ProviderErrorKind::RateLimit
                    | ProviderErrorKind::ServerError
                    | ProviderErrorKind::Unknown
            ),
            _ => false,
        }
    }

    /// Returns true for the fatal tier: errors that must abort a run before
    /// any network call is made.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AppError::UnsupportedModel(_) | AppError::MissingColumn(_) | AppError::ConfigError(_)
        )
    }
}
