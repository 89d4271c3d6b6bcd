//! Trait definitions for external dependencies.
//!
//! The dispatch engine never talks HTTP directly. Completion backends and the
//! mentions upload target are reached through these traits, which lets the
//! tests drive the full pipeline with scripted mocks.
//!
//! # Example
//!
//! ```
//! use opinio_core::traits::{CompletionClient, CompletionRequest};
//! use opinio_core::AppError;
//!
//! async fn classify<C: CompletionClient>(
//!     client: &C,
//!     request: &CompletionRequest,
//! ) -> Result<String, AppError> {
//!     Ok(client.complete(request).await?.label)
//! }
//! ```

use std::future::Future;

use crate::config::GenerationParams;
use crate::error::AppError;
use crate::models::Completion;
use crate::upload::{UploadRecord, UploadResponse};

/// Everything a backend needs to classify one record.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub params: GenerationParams,
}

/// Sends one completion request and returns the parsed answer.
///
/// Implementations make exactly one attempt; retries belong to the
/// dispatcher.
pub trait CompletionClient: Send + Sync + Clone {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<Completion, AppError>> + Send;
}

/// Wire format of one model vendor.
///
/// A backend is pure: it knows where to send a request and how to encode and
/// decode it, but performs no I/O. Adding a vendor means adding a backend,
/// nothing in the dispatcher changes.
pub trait ModelBackend: Send + Sync + Clone {
    /// Short vendor name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Full URL for a completion request.
    fn endpoint(&self) -> String;

    /// Extra request headers, including authentication.
    fn headers(&self) -> Vec<(String, String)>;

    /// JSON body for a completion request.
    fn build_payload(&self, request: &CompletionRequest) -> serde_json::Value;

    /// Turns an HTTP status and body into a completion or a classified error.
    fn parse_response(&self, status: u16, body: &str) -> Result<Completion, AppError>;
}

/// Sends one chunk of prepared records to the mentions platform.
///
/// Returns the raw status and body for any HTTP response; only transport
/// failures (connect errors, timeouts) are returned as `Err`.
pub trait MentionsUploader: Send + Sync + Clone {
    fn patch(
        &self,
        records: &[UploadRecord],
    ) -> impl Future<Output = Result<UploadResponse, AppError>> + Send;
}
