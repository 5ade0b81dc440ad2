//! In-process message channel between the publishing gateway and the background publisher.
//!
//! Two one-way unbounded channels: requests flow gateway → worker, responses flow back.

use salus_core::{WorkerRequest, WorkerResponse};
use tokio::sync::mpsc;

/// Gateway side of a worker channel.
#[derive(Debug)]
pub struct GatewayEndpoint {
    /// Requests to the worker
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    /// Responses from the worker
    pub responses: mpsc::UnboundedReceiver<WorkerResponse>,
}

/// Worker side of a worker channel.
#[derive(Debug)]
pub struct WorkerEndpoint {
    /// Requests from the gateway
    pub requests: mpsc::UnboundedReceiver<WorkerRequest>,
    /// Responses to the gateway
    pub responses: mpsc::UnboundedSender<WorkerResponse>,
}

/// Create a connected pair of endpoints.
#[must_use]
pub fn worker_channel() -> (GatewayEndpoint, WorkerEndpoint) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    (
        GatewayEndpoint {
            requests: request_tx,
            responses: response_rx,
        },
        WorkerEndpoint {
            requests: request_rx,
            responses: response_tx,
        },
    )
}
