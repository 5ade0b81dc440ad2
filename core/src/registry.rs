//! Caller-facing registration contract and its error taxonomy.

use crate::publisher::{PublishError, PublishErrorKind, PublishSuccess};
use std::future::Future;
use thiserror::Error;

/// Errors surfaced by an [`EventRegistry`].
///
/// A deliberate collapse of [`PublishErrorKind`]: timeouts, fetch failures and server errors all
/// become [`RegistryError::Internal`], as do site-state failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The endpoint rejected the batch
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The publisher is misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Site state could not be loaded or committed, or the publish failed
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PublishError> for RegistryError {
    fn from(error: PublishError) -> Self {
        match error.kind {
            PublishErrorKind::BadRequest => Self::BadRequest(error.message),
            PublishErrorKind::Configuration => Self::Configuration(error.message),
            PublishErrorKind::InternalServerError
            | PublishErrorKind::Timeout
            | PublishErrorKind::Fetch => Self::Internal(error.to_string()),
        }
    }
}

/// Outcome of a registry operation.
pub type RegistryResult = Result<PublishSuccess, RegistryError>;

/// The seven tracker operations.
///
/// Every operation commits site state and flushes pending events before resolving. Operations take
/// `&mut self`: a second call cannot start before the previous one completes.
pub trait EventRegistry {
    /// Start a new visitor, discarding the current session and section.
    fn register_visitor(&mut self) -> impl Future<Output = RegistryResult> + Send;

    /// Forget the visitor and everything under it. Emits no event.
    fn deregister_visitor(&mut self) -> impl Future<Output = RegistryResult> + Send;

    /// Start a new session, creating a visitor first if none is active.
    fn register_session(&mut self) -> impl Future<Output = RegistryResult> + Send;

    /// Forget the session and section. Emits no event.
    fn deregister_session(&mut self) -> impl Future<Output = RegistryResult> + Send;

    /// Start a new section, creating a session (and visitor) first if needed.
    fn register_section(&mut self) -> impl Future<Output = RegistryResult> + Send;

    /// Forget the section. Emits no event.
    fn deregister_section(&mut self) -> impl Future<Output = RegistryResult> + Send;

    /// Record a click in the active section, creating ancestors if needed.
    fn register_click(&mut self) -> impl Future<Output = RegistryResult> + Send;
}
