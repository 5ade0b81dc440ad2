//! HTTP event publisher implementation

use crate::error::{HttpPublisherError, classify_status, classify_transport_error};
use reqwest::Client;
use salus_core::{
    ConfigurationState, EventPublisher, PublishError, PublishEvent, PublishResult, PublishSuccess,
    PublisherConfig, TransportFactory,
};
use std::future::Future;
use std::time::Duration;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "api-key";

/// Publishes batches with a single `POST {host}/multi`
#[derive(Clone, Debug)]
pub struct HttpEventPublisher {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl HttpEventPublisher {
    /// Create a publisher for `config`
    ///
    /// # Errors
    ///
    /// Returns `HttpPublisherError::InvalidConfiguration` if the config fails validation, or
    /// `HttpPublisherError::Client` if the HTTP client cannot be built
    pub fn new(config: &PublisherConfig) -> Result<Self, HttpPublisherError> {
        let mut builder = Client::builder();
        if let Some(timeout_ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder
            .build()
            .map_err(|e| HttpPublisherError::Client(e.to_string()))?;

        Self::with_client(config, client)
    }

    /// Create a publisher for `config` using an existing client
    ///
    /// # Errors
    ///
    /// Returns `HttpPublisherError::InvalidConfiguration` if the config fails validation
    pub fn with_client(
        config: &PublisherConfig,
        client: Client,
    ) -> Result<Self, HttpPublisherError> {
        match config.validate() {
            ConfigurationState::Success => Ok(Self {
                client,
                api_key: config.api_key.clone(),
                endpoint: config.endpoint(),
            }),
            state => Err(HttpPublisherError::InvalidConfiguration(state)),
        }
    }

    /// URL batches are posted to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post `events` as one JSON array
    ///
    /// # Errors
    ///
    /// Returns a [`PublishError`] classified from the response status, or `FetchError`/`Timeout`
    /// when no response arrives
    pub async fn send(&self, events: &[PublishEvent]) -> PublishResult {
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(events)
            .send()
            .await
            .map_err(|e| {
                let error = classify_transport_error(&e);
                tracing::warn!(
                    endpoint = %self.endpoint,
                    kind = %error.kind,
                    "Request failed: {e}"
                );
                error
            })?;

        let status = response.status();
        match classify_status(status) {
            None => {
                tracing::debug!(status = status.as_u16(), count = events.len(), "Batch accepted");
                Ok(PublishSuccess::new(events.len()))
            }
            Some(kind) => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), %kind, "Batch rejected");
                Err(PublishError::new(
                    kind,
                    format!("HTTP {}: {}", status.as_u16(), body.trim()),
                ))
            }
        }
    }
}

impl EventPublisher for HttpEventPublisher {
    fn publish(&self, events: &[PublishEvent]) -> impl Future<Output = PublishResult> + Send {
        self.send(events)
    }
}

/// Builds an [`HttpEventPublisher`] from the configure request
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    type Transport = HttpEventPublisher;

    fn build(&self, config: &PublisherConfig) -> Result<HttpEventPublisher, ConfigurationState> {
        HttpEventPublisher::new(config).map_err(|e| {
            tracing::warn!(error = %e, "Cannot build HTTP transport");
            e.configuration_state()
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_endpoint_from_config() {
        let publisher =
            HttpEventPublisher::new(&PublisherConfig::new("abc-xyz", "https://ingest.example.com/"))
                .unwrap();
        assert_eq!(publisher.endpoint(), "https://ingest.example.com/multi");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = HttpEventPublisher::new(&PublisherConfig::new("abc-xyz", "ingest.example.com"))
            .unwrap_err();
        assert!(matches!(
            err,
            HttpPublisherError::InvalidConfiguration(ConfigurationState::InvalidHost)
        ));

        assert_eq!(
            HttpTransportFactory
                .build(&PublisherConfig::new(" ", "http://localhost:3000"))
                .unwrap_err(),
            ConfigurationState::InvalidApiKey
        );
    }
}
