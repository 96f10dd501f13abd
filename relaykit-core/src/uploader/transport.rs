//! Upload transport abstraction and the HTTP implementation
//!
//! The core does not assume a wire protocol; it only needs a collaborator
//! that consumes a serialized batch and eventually reports success or
//! failure. [`HttpTransport`] is the production implementation, POSTing the
//! batch to the configured collector endpoint.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::uploader::SerializedBatch;

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// External transport collaborator.
///
/// `send` takes ownership of the serialized batch and resolves once the
/// remote collector has acknowledged or rejected it. Timeout policy lives in
/// the implementation; the core never cancels an in-flight send.
pub trait Transport: Send + Sync {
    fn send(&self, payload: SerializedBatch) -> TransportFuture<'_>;
}

/// HTTP transport to the remote collector.
pub struct HttpTransport {
    config: AgentConfig,
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a transport from agent configuration.
    ///
    /// Fails if any upload credential is unset or a header value is invalid.
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate_upload()?;

        let account = config
            .account_identifier
            .clone()
            .ok_or_else(|| Error::Config("agent.account_identifier is required".to_string()))?;
        let template = config
            .server_url_template
            .clone()
            .ok_or_else(|| Error::Config("agent.server_url_template is required".to_string()))?;
        let endpoint = template.replace("{account}", &urlencoding::encode(&account));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(auth_key) = &config.auth_key {
            let auth_value = format!("Bearer {}", auth_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid auth_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            endpoint,
        })
    }

    /// The resolved upload endpoint (template with `{account}` substituted).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one batch without retries.
    async fn post_batch(&self, payload: &SerializedBatch) -> Result<()> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Transport(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }

    /// Send a batch, retrying transient failures with exponential backoff.
    ///
    /// Retries stay inside this one dispatch; once they are exhausted the
    /// error propagates and the uploader keeps the batch for the next cycle.
    pub async fn send_with_retry(&self, payload: &SerializedBatch) -> Result<()> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying batch upload (attempt {}/{}), waiting {:?}",
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.post_batch(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if is_retryable_error(&e) {
                        tracing::warn!(batch_id = %payload.batch_id, "Transient upload error: {}", e);
                        last_error = Some(e);
                        continue;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Transport("max retries exceeded".to_string())))
    }

    /// Check whether the collector endpoint is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint URL: {}", e)))?;
        url.set_path("/health");
        url.set_query(None);

        match self.http_client.get(url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: SerializedBatch) -> TransportFuture<'_> {
        Box::pin(async move { self.send_with_retry(&payload).await })
    }
}

/// Check if an error is retryable (transient)
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Transport(msg) => {
            // Retry on 5xx errors
            msg.contains("API error (5")
                // Retry on network/timeout errors
                || msg.contains("timeout")
                || msg.contains("connection")
                || msg.contains("request failed")
        }
        _ => false,
    }
}
