//! Publisher contract: ship a batch of wire events as a unit.

use crate::config::{ConfigurationState, PublisherConfig};
use crate::wire::PublishEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Successful publish of a whole batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSuccess {
    /// Number of events accepted
    pub count: usize,
}

impl PublishSuccess {
    /// Success for `count` events.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self { count }
    }
}

/// Classification of a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishErrorKind {
    /// The endpoint rejected the batch
    BadRequest,
    /// The publisher is not (or not correctly) configured
    #[serde(rename = "ConfigurationError")]
    Configuration,
    /// The endpoint failed while handling the batch
    InternalServerError,
    /// Timed out, or an unclassified response status
    Timeout,
    /// The request never produced a response
    #[serde(rename = "FetchError")]
    Fetch,
}

impl PublishErrorKind {
    /// Name used in the worker protocol and as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Configuration => "ConfigurationError",
            Self::InternalServerError => "InternalServerError",
            Self::Timeout => "Timeout",
            Self::Fetch => "FetchError",
        }
    }
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed publish: the whole batch failed with a single classification.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct PublishError {
    /// Classification
    pub kind: PublishErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl PublishError {
    /// Build an error of `kind`.
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`PublishErrorKind::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::BadRequest, message)
    }

    /// Shorthand for [`PublishErrorKind::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Configuration, message)
    }

    /// Shorthand for [`PublishErrorKind::Fetch`].
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Fetch, message)
    }
}

/// Outcome of a publish.
pub type PublishResult = Result<PublishSuccess, PublishError>;

/// Something that ships wire events.
///
/// Implementations must not partially publish: a batch either succeeds with a single count or
/// fails with a single [`PublishError`].
pub trait EventPublisher {
    /// Publish `events` as one batch.
    fn publish(&self, events: &[PublishEvent]) -> impl Future<Output = PublishResult> + Send;
}

/// Builds the transport owned by the background publisher.
pub trait TransportFactory {
    /// Transport type produced.
    type Transport: EventPublisher + Send + Sync + 'static;

    /// Build a transport for `config`.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigurationState`] describing why the configuration is unusable.
    fn build(&self, config: &PublisherConfig) -> Result<Self::Transport, ConfigurationState>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_error_kind_protocol_names() {
        let kinds = [
            PublishErrorKind::BadRequest,
            PublishErrorKind::Configuration,
            PublishErrorKind::InternalServerError,
            PublishErrorKind::Timeout,
            PublishErrorKind::Fetch,
        ];

        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_error_display() {
        let err = PublishError::bad_request("Request to publish empty set of events");
        assert_eq!(
            err.to_string(),
            "BadRequest: Request to publish empty set of events"
        );
    }
}
