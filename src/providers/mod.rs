pub mod google;
pub mod mbta;
pub mod ors;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ProvidersConfig;
use crate::models::{Coordinates, NearbyStop, Place, ProviderId, RouteEstimate, TripQuery};

const INITIAL_RETRY_DELAY_MS: u64 = 250;

/// A source of travel-time estimates for one or more transport modes
#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn fetch_estimates(&self, query: &TripQuery) -> Result<Vec<RouteEstimate>, ProviderError>;
}

/// Turns free-text destinations into coordinates, best match first
#[async_trait]
pub trait Geocoder: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn geocode(&self, text: &str) -> Result<Vec<Place>, ProviderError>;
}

/// Transit stops around a point, nearest first
#[async_trait]
pub trait StopsProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn nearby_stops(
        &self,
        origin: Coordinates,
        radius_miles: f64,
    ) -> Result<Vec<NearbyStop>, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Retryable error: {0}")]
    RetryableError(String),
    #[error("Provider returned status {0}")]
    StatusError(String),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("Provider returned no results")]
    Empty,
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Provider task failed: {0}")]
    TaskFailed(String),
}

impl ProviderError {
    /// Check if this error is transient and should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::NetworkError(_) | ProviderError::RetryableError(_)
        )
    }
}

/// Shared HTTP plumbing for all adapters: client timeouts and retry with
/// exponential backoff on transient failures
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(5)))
            .build()
            .map_err(|e| {
                ProviderError::NetworkError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Execute a request built by `build`, retrying transient failures.
    /// Returns the response body of the first successful attempt.
    pub async fn execute_with_retry<F>(&self, build: F) -> Result<String, ProviderError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = INITIAL_RETRY_DELAY_MS * 2_u64.pow(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay, "Retrying provider request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.execute_request(build(&self.client)).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(attempt, error = %e, "Transient error, will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::NetworkError("Max retries exceeded".to_string())))
    }

    async fn execute_request(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<String, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            tracing::debug!(status = %status, body_preview = %preview(&text), "Provider HTTP error");

            // 429 (Too Many Requests) and 5xx errors are retryable
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(ProviderError::RetryableError(format!("HTTP {}", status)));
            }

            return Err(ProviderError::StatusError(format!(
                "HTTP {}: {}",
                status,
                preview(&text)
            )));
        }

        Ok(text)
    }
}

/// Deserialize a provider body, logging a preview when it does not match
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(
    provider: ProviderId,
    body: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        tracing::debug!(
            provider = %provider,
            error = %e,
            body_preview = %preview(body),
            "Failed to parse provider response"
        );
        ProviderError::ParseError(e.to_string())
    })
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_retry() {
        assert!(ProviderError::NetworkError("reset".into()).is_retryable());
        assert!(ProviderError::RetryableError("HTTP 503".into()).is_retryable());
        assert!(!ProviderError::StatusError("REQUEST_DENIED".into()).is_retryable());
        assert!(!ProviderError::ParseError("eof".into()).is_retryable());
        assert!(!ProviderError::Empty.is_retryable());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn parse_body_reports_parse_errors() {
        let result: Result<serde_json::Value, _> = parse_body(ProviderId::Mbta, "{not json");
        assert!(matches!(result, Err(ProviderError::ParseError(_))));
    }
}
