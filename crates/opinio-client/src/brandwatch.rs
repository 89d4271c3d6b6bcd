//! Brandwatch mentions API client.
//!
//! Implements [`MentionsUploader`] with one `PATCH /projects/{id}/data/mentions`
//! per chunk. Any HTTP response, error or not, is handed back raw so the
//! upload dispatcher can classify it; only transport failures are errors.

use opinio_core::error::AppError;
use opinio_core::traits::MentionsUploader;
use opinio_core::{HttpConfig, UploadRecord, UploadResponse};
use reqwest::Client;

use crate::http::map_transport_error;

pub const BRANDWATCH_BASE_URL: &str = "https://api.brandwatch.com";

/// HTTP client for the Brandwatch mentions endpoint.
///
/// # Examples
///
/// ```no_run
/// use opinio_client::BrandwatchClient;
/// use opinio_core::HttpConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BrandwatchClient::new("api-token", "1998281989", &HttpConfig::default())?;
/// println!("{}", client.mentions_url());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrandwatchClient {
    client: Client,
    token: String,
    mentions_url: String,
    timeout_secs: u64,
}

impl BrandwatchClient {
    pub fn new(token: &str, project_id: &str, http: &HttpConfig) -> Result<Self, AppError> {
        Self::with_base_url(token, project_id, BRANDWATCH_BASE_URL, http)
    }

    /// Uses a custom API root, e.g. a local stub server.
    pub fn with_base_url(
        token: &str,
        project_id: &str,
        base_url: &str,
        http: &HttpConfig,
    ) -> Result<Self, AppError> {
        if project_id.trim().is_empty() {
            return Err(AppError::ConfigError(
                "BRANDWATCH_PROJECT_ID is not set".to_string(),
            ));
        }
        if token.trim().is_empty() {
            return Err(AppError::ConfigError(
                "BRANDWATCH_API_TOKEN is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            token: token.to_string(),
            mentions_url: format!(
                "{}/projects/{}/data/mentions",
                base_url.trim_end_matches('/'),
                project_id.trim()
            ),
            timeout_secs: http.timeout.as_secs(),
        })
    }

    pub fn mentions_url(&self) -> &str {
        &self.mentions_url
    }
}

impl MentionsUploader for BrandwatchClient {
    async fn patch(&self, records: &[UploadRecord]) -> Result<UploadResponse, AppError> {
        let response = self
            .client
            .patch(&self.mentions_url)
            .bearer_auth(&self.token)
            .json(records)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        Ok(UploadResponse { status, body })
    }
}
