//! Batch delivery transport
//!
//! The flush worker hands each serialized batch to a [`Transport`] and acts
//! on the returned [`DeliveryOutcome`]. [`HttpTransport`] is the production
//! implementation; tests substitute scripted fakes.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};

use super::events::BatchPayload;

/// Route the batch endpoint is served from
pub const BATCH_EVENTS_ROUTE: &str = "/api/sdk/v1/batch_events";

/// Header carrying the SDK version
pub const SDK_VERSION_HEADER: &str = "x-sdk-version";

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collector accepted the batch
    Delivered,
    /// The collector refused the batch and always will; drop it
    Rejected { status: u16 },
    /// Anything else; keep the batch for the next flush
    Failed { reason: String },
}

impl DeliveryOutcome {
    /// Classify an HTTP status.
    ///
    /// 2xx is delivered. Only statuses saying the batch itself is
    /// unacceptable (400, 413, 422) reject it; every other status, including
    /// 408 and 429, leaves it for a later flush.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => DeliveryOutcome::Delivered,
            400 | 413 | 422 => DeliveryOutcome::Rejected { status },
            other => DeliveryOutcome::Failed {
                reason: format!("unexpected status {}", other),
            },
        }
    }

    /// Whether the batch should be removed from the store
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failed { .. })
    }
}

/// Delivers one batch. Called only from the flush worker thread.
///
/// Implementations must bound their own run time; a call that never
/// returns stalls every later add and flush.
pub trait Transport: Send + 'static {
    fn deliver(&self, payload: &BatchPayload<'_>) -> DeliveryOutcome;
}

impl Transport for Box<dyn Transport> {
    fn deliver(&self, payload: &BatchPayload<'_>) -> DeliveryOutcome {
        (**self).deliver(payload)
    }
}

/// HTTP transport posting JSON batches to the collector server
pub struct HttpTransport {
    http_client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// Returns an error if the server URL is missing or a header value is invalid.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let base_url = config
            .server_url
            .as_deref()
            .ok_or_else(|| Error::Config("collector.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("beacon/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            SDK_VERSION_HEADER,
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );

        if let Some(secret) = &config.secret_key {
            let auth_value = format!("Bearer {}", secret);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid secret_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;

        // The worker thread is synchronous; give the async client a private
        // runtime to block on.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            http_client,
            runtime,
            endpoint: format!("{}{}", base_url, BATCH_EVENTS_ROUTE),
        })
    }

    /// Full URL batches are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, payload: &BatchPayload<'_>) -> DeliveryOutcome {
        let response = match self
            .http_client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    reason: format!("HTTP request failed: {}", e),
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            tracing::debug!(status = status.as_u16(), body = %body, "Collector refused batch");
        }

        DeliveryOutcome::from_status(status.as_u16())
    }
}

impl Transport for HttpTransport {
    fn deliver(&self, payload: &BatchPayload<'_>) -> DeliveryOutcome {
        self.runtime.block_on(self.post(payload))
    }
}
