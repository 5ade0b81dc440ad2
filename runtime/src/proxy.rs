//! The background publisher: owns the real transport and answers gateway requests.
//!
//! The transport is built once, on the first [`WorkerRequest::ConfigureRequest`], and shared by
//! every later publish. Publishes run concurrently; each answers with a response carrying its
//! request's id, so completion order is unspecified.

use crate::channel::WorkerEndpoint;
use crate::metrics::PublishMetrics;
use salus_core::{
    ConfigurationState, EventPublisher, PublishError, PublishEvent, PublisherConfig,
    TransportFactory, WorkerRequest, WorkerResponse,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Reply to a publish that arrives before the transport is configured.
pub const NOT_CONFIGURED_MESSAGE: &str = "Publish event request received prior to configuration";
/// Reply to a publish with no events.
pub const EMPTY_BATCH_MESSAGE: &str = "Request to publish empty set of events";

/// Background side of the publishing pipeline.
pub struct PublisherProxy<F: TransportFactory> {
    factory: F,
    transport: Option<Arc<F::Transport>>,
    tasks: JoinSet<()>,
}

impl<F: TransportFactory> PublisherProxy<F> {
    /// Create an unconfigured proxy.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            transport: None,
            tasks: JoinSet::new(),
        }
    }

    /// Whether a transport has been built.
    pub const fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    /// Serve requests until the gateway side of `endpoint` closes, then wait for in-flight
    /// publishes to answer.
    pub async fn run(mut self, mut endpoint: WorkerEndpoint) {
        tracing::info!("Background publisher started");

        while let Some(request) = endpoint.requests.recv().await {
            self.handle(request, &endpoint.responses);
            while let Some(joined) = self.tasks.try_join_next() {
                log_join(joined);
            }
        }

        let remaining = self.tasks.len();
        if remaining > 0 {
            tracing::debug!(remaining, "Waiting for in-flight publishes");
        }
        while let Some(joined) = self.tasks.join_next().await {
            log_join(joined);
        }

        tracing::info!("Background publisher stopped");
    }

    /// Handle one request, posting any response to `responses`.
    ///
    /// Publishes through a configured transport answer asynchronously from a spawned task, so this
    /// must be called within a Tokio runtime.
    pub fn handle(&mut self, request: WorkerRequest, responses: &UnboundedSender<WorkerResponse>) {
        match request {
            WorkerRequest::ConfigureRequest { id, config } => {
                let response = self.configure(id, &config);
                post(responses, response);
            }
            WorkerRequest::PublishRequest { id, events } => self.publish(id, events, responses),
        }
    }

    fn configure(&mut self, id: Uuid, config: &PublisherConfig) -> WorkerResponse {
        let configuration_state = if self.transport.is_some() {
            tracing::warn!(
                request_id = %id,
                "Publisher already configured, keeping existing transport"
            );
            ConfigurationState::Invalid
        } else {
            match self.factory.build(config) {
                Ok(transport) => {
                    self.transport = Some(Arc::new(transport));
                    tracing::info!(request_id = %id, host = %config.host, "Publisher configured");
                    ConfigurationState::Success
                }
                Err(state) => {
                    tracing::warn!(request_id = %id, ?state, "Publisher configuration rejected");
                    state
                }
            }
        };

        WorkerResponse::ConfigureResult {
            id,
            configuration_state,
        }
    }

    fn publish(
        &mut self,
        id: Uuid,
        events: Vec<PublishEvent>,
        responses: &UnboundedSender<WorkerResponse>,
    ) {
        let Some(transport) = &self.transport else {
            reject(responses, id, PublishError::configuration(NOT_CONFIGURED_MESSAGE));
            return;
        };
        if events.is_empty() {
            reject(responses, id, PublishError::bad_request(EMPTY_BATCH_MESSAGE));
            return;
        }

        let transport = Arc::clone(transport);
        let responses = responses.clone();
        self.tasks.spawn(async move {
            let started = Instant::now();
            let result = transport.publish(&events).await;

            match &result {
                Ok(success) => {
                    PublishMetrics::record_success(started.elapsed());
                    tracing::debug!(request_id = %id, count = success.count, "Batch published");
                }
                Err(error) => {
                    PublishMetrics::record_failure(error.kind);
                    tracing::warn!(
                        request_id = %id,
                        kind = %error.kind,
                        message = %error.message,
                        "Batch failed"
                    );
                }
            }
            post(&responses, WorkerResponse::publish_outcome(id, result));
        });
    }
}

fn reject(responses: &UnboundedSender<WorkerResponse>, id: Uuid, error: PublishError) {
    PublishMetrics::record_failure(error.kind);
    tracing::warn!(request_id = %id, kind = %error.kind, "{}", error.message);
    post(responses, WorkerResponse::publish_outcome(id, Err(error)));
}

fn post(responses: &UnboundedSender<WorkerResponse>, response: WorkerResponse) {
    let id = response.id();
    if responses.send(response).is_err() {
        tracing::debug!(request_id = %id, "Gateway gone, dropping response");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        tracing::error!(error = %error, "Publish task failed");
    }
}
