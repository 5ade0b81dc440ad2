//! Error types and status classification for the HTTP transport

use reqwest::StatusCode;
use salus_core::{ConfigurationState, PublishError, PublishErrorKind};
use thiserror::Error;

/// Errors constructing an [`HttpEventPublisher`](crate::HttpEventPublisher)
#[derive(Debug, Error)]
pub enum HttpPublisherError {
    /// The configuration failed validation
    #[error("Invalid publisher configuration: {0:?}")]
    InvalidConfiguration(ConfigurationState),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl HttpPublisherError {
    /// The configuration state reported to the gateway for this error.
    #[must_use]
    pub const fn configuration_state(&self) -> ConfigurationState {
        match self {
            Self::InvalidConfiguration(state) => *state,
            Self::Client(_) => ConfigurationState::Invalid,
        }
    }
}

/// Classify a response status; `None` means the batch was accepted.
///
/// | Status              | Kind                  |
/// |---------------------|-----------------------|
/// | 2xx                 | accepted              |
/// | 400                 | `BadRequest`          |
/// | 401, 403            | `ConfigurationError`  |
/// | 408, 504            | `Timeout`             |
/// | 500 and other 5xx   | `InternalServerError` |
/// | anything else       | `Timeout`             |
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<PublishErrorKind> {
    if status.is_success() {
        return None;
    }
    let kind = match status {
        StatusCode::BAD_REQUEST => PublishErrorKind::BadRequest,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishErrorKind::Configuration,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => PublishErrorKind::Timeout,
        status if status.is_server_error() => PublishErrorKind::InternalServerError,
        _ => PublishErrorKind::Timeout,
    };
    Some(kind)
}

/// Classify a failure to obtain a response.
#[must_use]
pub fn classify_transport_error(error: &reqwest::Error) -> PublishError {
    if error.is_timeout() {
        PublishError::new(PublishErrorKind::Timeout, error.to_string())
    } else {
        PublishError::fetch(error.to_string())
    }
}
