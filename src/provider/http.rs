//! JSON REST transport shared by the provider clients.
//!
//! Handles bearer authentication, status code mapping and bounded retries
//! of transient failures (rate limiting, network errors).

use reqwest::{Client, Method, header};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{FerraformError, ProviderError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Longest wait before a retry, whatever the server asks for.
const MAX_RETRY_DELAY_SECS: u64 = 30;

/// Authenticated JSON client for one provider API.
#[derive(Debug, Clone)]
pub struct RestClient {
    /// HTTP client.
    client: Client,
    /// Provider name used in errors.
    provider: &'static str,
    /// API base URL without trailing slash.
    base_url: String,
    /// Bearer token.
    token: String,
    /// Base delay between retries.
    retry_delay: Duration,
    /// Cap on any single retry delay.
    max_retry_delay: Duration,
}

impl RestClient {
    /// Creates a new REST client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(provider: &'static str, base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("ferraform/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ProviderError::network(provider, format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            max_retry_delay: Duration::from_secs(MAX_RETRY_DELAY_SECS),
        })
    }

    /// Overrides the base delay between retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Overrides the cap on a single retry delay.
    #[must_use]
    pub const fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Provider name.
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None).await
    }

    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Sends a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Sends a PATCH request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// Sends a DELETE request, optionally with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request(Method::DELETE, path, body).await
    }

    /// Sends a request, retrying transient failures.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut last_error = None;
        let mut delay = Duration::ZERO;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for {method} {path} in {delay:?}");
                tokio::time::sleep(delay).await;
            }

            match self.request_once(method.clone(), path, body).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if e.is_retryable() {
                        delay = self.backoff(&e, attempt + 1);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FerraformError::Provider(ProviderError::network(self.provider, "Max retries exceeded"))
        }))
    }

    /// Delay before retry number `attempt`: the server's `Retry-After` when
    /// it sent one, linear backoff otherwise, never above the cap.
    fn backoff(&self, error: &FerraformError, attempt: u32) -> Duration {
        error
            .retry_delay_secs()
            .map_or(self.retry_delay * attempt, Duration::from_secs)
            .min(self.max_retry_delay)
    }

    /// Sends a single request.
    async fn request_once(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            FerraformError::Provider(ProviderError::network(
                self.provider,
                format!("Request failed: {e}"),
            ))
        })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(FerraformError::Provider(ProviderError::RateLimited {
                provider: self.provider.to_string(),
                retry_after_secs: retry_after,
            }));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FerraformError::Provider(ProviderError::AuthenticationFailed {
                provider: self.provider.to_string(),
                message: String::from("Invalid API credentials"),
            }));
        }

        if status.as_u16() == 404 {
            return Err(FerraformError::Provider(ProviderError::NotFound {
                kind: self.provider.to_string(),
                id: path.to_string(),
            }));
        }

        let text = response.text().await.map_err(|e| {
            FerraformError::Provider(ProviderError::network(
                self.provider,
                format!("Failed to read response: {e}"),
            ))
        })?;

        if !status.is_success() {
            return Err(FerraformError::Provider(ProviderError::api_error(
                self.provider,
                status.as_u16(),
                error_message(&text),
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| {
            FerraformError::Provider(ProviderError::invalid_response(
                self.provider,
                format!("Failed to parse response: {e}"),
            ))
        })
    }
}

/// Extracts the human message from an error body, falling back to the raw
/// text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
