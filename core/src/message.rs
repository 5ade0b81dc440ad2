//! Messages exchanged between the publishing gateway and the background publisher.
//!
//! Every response carries the `id` of the request that caused it. Id matching is the only
//! correlation; responses may arrive in any order.

use crate::config::{ConfigurationState, PublisherConfig};
use crate::publisher::{PublishErrorKind, PublishResult, PublishSuccess};
use crate::wire::PublishEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum WorkerRequest {
    /// Build the worker's transport
    ConfigureRequest {
        /// Correlation id
        id: Uuid,
        /// Transport configuration
        config: PublisherConfig,
    },
    /// Publish a batch through the configured transport
    PublishRequest {
        /// Correlation id
        id: Uuid,
        /// Batch to publish
        events: Vec<PublishEvent>,
    },
}

impl WorkerRequest {
    /// Correlation id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::ConfigureRequest { id, .. } | Self::PublishRequest { id, .. } => *id,
        }
    }
}

/// Worker → gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum WorkerResponse {
    /// Outcome of a [`WorkerRequest::ConfigureRequest`]
    ConfigureResult {
        /// Correlation id
        id: Uuid,
        /// Resulting state
        #[serde(rename = "configurationState")]
        configuration_state: ConfigurationState,
    },
    /// Successful [`WorkerRequest::PublishRequest`]
    PublishResult {
        /// Correlation id
        id: Uuid,
        /// Accepted count
        result: PublishSuccess,
    },
    /// Failed [`WorkerRequest::PublishRequest`]
    PublishError {
        /// Correlation id
        id: Uuid,
        /// Failure classification
        #[serde(rename = "errorType")]
        error_type: PublishErrorKind,
        /// Failure detail
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl WorkerResponse {
    /// Response to publish request `id` carrying `result`.
    #[must_use]
    pub fn publish_outcome(id: Uuid, result: PublishResult) -> Self {
        match result {
            Ok(result) => Self::PublishResult { id, result },
            Err(error) => Self::PublishError {
                id,
                error_type: error.kind,
                error_message: error.message,
            },
        }
    }

    /// Correlation id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::ConfigureResult { id, .. }
            | Self::PublishResult { id, .. }
            | Self::PublishError { id, .. } => *id,
        }
    }
}
