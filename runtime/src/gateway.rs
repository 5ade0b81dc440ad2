//! The publishing gateway: the caller-side [`EventPublisher`] backed by a background worker.
//!
//! Every publish gets a fresh UUIDv7 correlation id and a pending entry holding a oneshot sender.
//! A router task reads worker responses and completes the entry with the matching id, removing it.
//! When the worker side closes, every pending entry is completed with a
//! [`PublishErrorKind::Fetch`](salus_core::PublishErrorKind::Fetch) error.

use crate::channel::{GatewayEndpoint, worker_channel};
use crate::metrics::GatewayMetrics;
use crate::proxy::PublisherProxy;
use salus_core::{
    ConfigurationState, EventPublisher, PublishError, PublishEvent, PublishResult,
    PublisherConfig, TransportFactory, WorkerRequest, WorkerResponse,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback for failures that have no caller to report to.
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

const WORKER_UNAVAILABLE: &str = "Worker publisher is unavailable";

/// Errors constructing a [`PublisherGateway`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    /// The configuration failed validation; no worker was started
    #[error("Invalid event publisher configuration: {0:?}")]
    InvalidConfiguration(ConfigurationState),
}

#[derive(Default)]
struct PendingRequests {
    senders: HashMap<Uuid, oneshot::Sender<PublishResult>>,
    closed: bool,
}

type PendingTable = Arc<Mutex<PendingRequests>>;

fn lock(pending: &Mutex<PendingRequests>) -> MutexGuard<'_, PendingRequests> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report(handler: Option<&ErrorHandler>, message: &str) {
    if let Some(handler) = handler {
        handler(message);
    }
}

/// Caller-side publisher that forwards batches to a background worker.
pub struct PublisherGateway {
    requests: Option<mpsc::UnboundedSender<WorkerRequest>>,
    pending: PendingTable,
    configuration: watch::Receiver<Option<ConfigurationState>>,
    router: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PublisherGateway {
    /// Validate `config`, start a [`PublisherProxy`] over `factory` on a Tokio task, and
    /// configure it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidConfiguration`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F>(
        config: PublisherConfig,
        factory: F,
        error_handler: Option<ErrorHandler>,
    ) -> Result<Self, GatewayError>
    where
        F: TransportFactory + Send + 'static,
    {
        validate(&config, error_handler.as_ref())?;

        let (gateway_end, worker_end) = worker_channel();
        let worker = tokio::spawn(PublisherProxy::new(factory).run(worker_end));

        let mut gateway = Self::start(config, gateway_end, error_handler);
        gateway.worker = Some(worker);
        Ok(gateway)
    }

    /// Validate `config` and attach to a worker already serving the other end of `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidConfiguration`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(
        config: PublisherConfig,
        endpoint: GatewayEndpoint,
        error_handler: Option<ErrorHandler>,
    ) -> Result<Self, GatewayError> {
        validate(&config, error_handler.as_ref())?;
        Ok(Self::start(config, endpoint, error_handler))
    }

    fn start(
        config: PublisherConfig,
        endpoint: GatewayEndpoint,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        let GatewayEndpoint {
            requests,
            responses,
        } = endpoint;
        let pending = PendingTable::default();
        let (configuration_tx, configuration) = watch::channel(None);

        let router = Router {
            pending: Arc::clone(&pending),
            configuration: configuration_tx,
            error_handler,
        };
        let router = tokio::spawn(router.run(responses));

        let id = Uuid::now_v7();
        if requests
            .send(WorkerRequest::ConfigureRequest { id, config })
            .is_err()
        {
            tracing::warn!(request_id = %id, "Worker closed before configuration");
        } else {
            tracing::debug!(request_id = %id, "Posted configure request");
        }

        Self {
            requests: Some(requests),
            pending,
            configuration,
            router: Some(router),
            worker: None,
        }
    }

    /// The worker's answer to the configure request, once it has arrived.
    #[must_use]
    pub fn configuration_state(&self) -> Option<ConfigurationState> {
        *self.configuration.borrow()
    }

    /// Wait for the worker's answer to the configure request.
    ///
    /// Resolves to [`ConfigurationState::Invalid`] if the worker goes away without answering.
    #[tracing::instrument(skip(self), name = "gateway_configured")]
    pub async fn configured(&self) -> ConfigurationState {
        let mut configuration = self.configuration.clone();
        let state = match configuration.wait_for(Option::is_some).await {
            Ok(state) => *state,
            Err(_) => None,
        };
        state.unwrap_or(ConfigurationState::Invalid)
    }

    /// Number of publishes awaiting a response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).senders.len()
    }

    /// Close the request channel and wait for the worker to answer everything in flight.
    #[tracing::instrument(skip(self), name = "gateway_shutdown")]
    pub async fn shutdown(mut self) {
        tracing::info!(in_flight = self.in_flight(), "Shutting down publisher gateway");
        self.requests = None;

        if let Some(worker) = self.worker.take() {
            if let Err(error) = worker.await {
                tracing::error!(error = %error, "Worker task failed");
            }
        }
        if let Some(router) = self.router.take() {
            if let Err(error) = router.await {
                tracing::error!(error = %error, "Router task failed");
            }
        }
    }

    /// Register a pending entry and post the request.
    fn dispatch(
        &self,
        events: Vec<PublishEvent>,
    ) -> Result<oneshot::Receiver<PublishResult>, PublishError> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| PublishError::fetch(WORKER_UNAVAILABLE))?;

        let id = Uuid::now_v7();
        let count = events.len();
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(PublishError::fetch(WORKER_UNAVAILABLE));
            }
            pending.senders.insert(id, sender);
            GatewayMetrics::record_in_flight(pending.senders.len());
        }

        if requests
            .send(WorkerRequest::PublishRequest { id, events })
            .is_err()
        {
            let mut pending = lock(&self.pending);
            pending.senders.remove(&id);
            GatewayMetrics::record_in_flight(pending.senders.len());
            tracing::warn!(request_id = %id, "Worker closed, publish request not posted");
            return Err(PublishError::fetch(WORKER_UNAVAILABLE));
        }

        tracing::debug!(request_id = %id, count, "Posted publish request");
        Ok(receiver)
    }
}

impl EventPublisher for PublisherGateway {
    fn publish(&self, events: &[PublishEvent]) -> impl Future<Output = PublishResult> + Send {
        let dispatched = self.dispatch(events.to_vec());
        async move {
            match dispatched {
                Ok(receiver) => receiver
                    .await
                    .unwrap_or_else(|_| Err(PublishError::fetch(WORKER_UNAVAILABLE))),
                Err(error) => Err(error),
            }
        }
    }
}

impl Drop for PublisherGateway {
    fn drop(&mut self) {
        if let Some(router) = &self.router {
            router.abort();
        }
        if let Some(worker) = &self.worker {
            worker.abort();
        }
    }
}

fn validate(config: &PublisherConfig, handler: Option<&ErrorHandler>) -> Result<(), GatewayError> {
    match config.validate() {
        ConfigurationState::Success => Ok(()),
        state => {
            tracing::error!(?state, "Invalid event publisher configuration");
            report(
                handler,
                "Error constructing publisher gateway: invalid configuration",
            );
            Err(GatewayError::InvalidConfiguration(state))
        }
    }
}

/// Routes worker responses to pending publishes.
struct Router {
    pending: PendingTable,
    configuration: watch::Sender<Option<ConfigurationState>>,
    error_handler: Option<ErrorHandler>,
}

impl Router {
    async fn run(self, mut responses: mpsc::UnboundedReceiver<WorkerResponse>) {
        while let Some(response) = responses.recv().await {
            self.route(response);
        }
        self.close();
    }

    fn route(&self, response: WorkerResponse) {
        match response {
            WorkerResponse::ConfigureResult {
                id,
                configuration_state,
            } => {
                if configuration_state.is_success() {
                    tracing::info!(request_id = %id, "Worker publisher configured");
                } else {
                    tracing::error!(
                        request_id = %id,
                        state = ?configuration_state,
                        "Worker publisher configuration failed"
                    );
                    report(self.error_handler.as_ref(), "Worker event publisher failed");
                }
                self.configuration.send_replace(Some(configuration_state));
            }
            WorkerResponse::PublishResult { id, result } => self.resolve(id, Ok(result)),
            WorkerResponse::PublishError {
                id,
                error_type,
                error_message,
            } => self.resolve(id, Err(PublishError::new(error_type, error_message))),
        }
    }

    fn resolve(&self, id: Uuid, result: PublishResult) {
        let sender = {
            let mut pending = lock(&self.pending);
            let sender = pending.senders.remove(&id);
            GatewayMetrics::record_in_flight(pending.senders.len());
            sender
        };

        match sender {
            Some(sender) => {
                if sender.send(result).is_err() {
                    tracing::debug!(
                        request_id = %id,
                        "Publish caller went away before the response"
                    );
                }
            }
            None => {
                tracing::warn!(request_id = %id, "Publish response had no matching request");
                report(
                    self.error_handler.as_ref(),
                    "Event publish result had no matching request",
                );
            }
        }
    }

    /// Fail everything still pending and refuse new entries.
    fn close(&self) {
        let orphaned: Vec<_> = {
            let mut pending = lock(&self.pending);
            pending.closed = true;
            pending.senders.drain().collect()
        };
        GatewayMetrics::record_in_flight(0);

        if orphaned.is_empty() {
            tracing::debug!("Worker channel closed");
            return;
        }

        tracing::error!(
            orphaned = orphaned.len(),
            "Worker channel closed with publishes in flight"
        );
        report(
            self.error_handler.as_ref(),
            "Worker publisher stopped with publishes in flight",
        );
        for (_, sender) in orphaned {
            let _ = sender.send(Err(PublishError::fetch(WORKER_UNAVAILABLE)));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use salus_core::{PublishErrorKind, PublishSuccess, Visitor};
    use salus_testing::{RecordingPublisher, StaticTransportFactory};

    fn config() -> PublisherConfig {
        PublisherConfig::new("abc-xyz", "http://localhost:3000")
    }

    fn batch(len: usize) -> Vec<PublishEvent> {
        (0..len).map(|_| Visitor::new(()).to_publish_event()).collect()
    }

    fn recording_handler() -> (ErrorHandler, Arc<Mutex<Vec<String>>>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let handler: ErrorHandler = Arc::new(move |message: &str| {
            sink.lock().unwrap().push(message.to_string());
        });
        (handler, messages)
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected_before_spawning() {
        let (handler, messages) = recording_handler();
        let result = PublisherGateway::spawn(
            PublisherConfig::new("", "http://localhost:3000"),
            StaticTransportFactory::new(RecordingPublisher::new()),
            Some(handler),
        );

        assert!(matches!(
            result,
            Err(GatewayError::InvalidConfiguration(
                ConfigurationState::InvalidApiKey
            ))
        ));
        assert_eq!(messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_round_trip_through_worker() {
        let publisher = RecordingPublisher::new();
        let gateway =
            PublisherGateway::spawn(config(), StaticTransportFactory::new(publisher.clone()), None)
                .unwrap();

        assert_eq!(gateway.configured().await, ConfigurationState::Success);
        let result = gateway.publish(&batch(2)).await.unwrap();

        assert_eq!(result, PublishSuccess::new(2));
        assert_eq!(publisher.batches().len(), 1);
        assert_eq!(gateway.in_flight(), 0);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_errors_reject_the_matching_publish() {
        let publisher = RecordingPublisher::new();
        publisher.respond_with(Err(PublishError::bad_request("nope")));
        let gateway =
            PublisherGateway::spawn(config(), StaticTransportFactory::new(publisher), None)
                .unwrap();

        let err = gateway.publish(&batch(1)).await.unwrap_err();

        assert_eq!(err.kind, PublishErrorKind::BadRequest);
        assert_eq!(err.message, "nope");
        assert_eq!(gateway.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_responses_matched_by_id_not_order() {
        let (endpoint, mut worker) = worker_channel();
        let gateway = PublisherGateway::connect(config(), endpoint, None).unwrap();

        let (one, two) = (batch(1), batch(2));
        let first = gateway.publish(&one);
        let second = gateway.publish(&two);

        let _configure = worker.requests.recv().await.unwrap();
        let first_id = worker.requests.recv().await.unwrap().id();
        let second_id = worker.requests.recv().await.unwrap().id();

        // Answer out of order.
        worker
            .responses
            .send(WorkerResponse::publish_outcome(second_id, Ok(PublishSuccess::new(2))))
            .unwrap();
        worker
            .responses
            .send(WorkerResponse::publish_outcome(first_id, Ok(PublishSuccess::new(1))))
            .unwrap();

        let (first, second) = futures::join!(first, second);
        assert_eq!(first.unwrap().count, 1);
        assert_eq!(second.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_unmatched_response_reaches_error_handler() {
        let (handler, messages) = recording_handler();
        let (endpoint, worker) = worker_channel();
        let gateway = PublisherGateway::connect(config(), endpoint, Some(handler)).unwrap();

        worker
            .responses
            .send(WorkerResponse::publish_outcome(Uuid::now_v7(), Ok(PublishSuccess::new(1))))
            .unwrap();
        worker
            .responses
            .send(WorkerResponse::ConfigureResult {
                id: Uuid::now_v7(),
                configuration_state: ConfigurationState::Success,
            })
            .unwrap();

        // Responses are routed in order, so the unmatched one has been handled by now.
        assert_eq!(gateway.configured().await, ConfigurationState::Success);
        assert_eq!(
            messages.lock().unwrap().as_slice(),
            ["Event publish result had no matching request"]
        );
    }

    #[tokio::test]
    async fn test_failed_configuration_reaches_error_handler() {
        let (handler, messages) = recording_handler();
        let gateway = PublisherGateway::spawn(
            config(),
            StaticTransportFactory::failing(ConfigurationState::Invalid),
            Some(handler),
        )
        .unwrap();

        assert_eq!(gateway.configured().await, ConfigurationState::Invalid);
        assert_eq!(
            messages.lock().unwrap().as_slice(),
            ["Worker event publisher failed"]
        );

        let err = gateway.publish(&batch(1)).await.unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_configured_is_invalid_when_worker_never_answers() {
        let (endpoint, mut worker) = worker_channel();
        let gateway = PublisherGateway::connect(config(), endpoint, None).unwrap();
        assert_eq!(gateway.configuration_state(), None);

        let _configure = worker.requests.recv().await.unwrap();
        drop(worker);

        assert_eq!(gateway.configured().await, ConfigurationState::Invalid);
        assert_eq!(gateway.configuration_state(), None);
    }

    #[tokio::test]
    async fn test_worker_loss_fails_pending_publishes() {
        let (endpoint, mut worker) = worker_channel();
        let gateway = PublisherGateway::connect(config(), endpoint, None).unwrap();

        let events = batch(1);
        let pending = gateway.publish(&events);
        let _configure = worker.requests.recv().await.unwrap();
        let _publish = worker.requests.recv().await.unwrap();
        drop(worker);

        let err = pending.await.unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::Fetch);
        assert_eq!(gateway.in_flight(), 0);

        let err = gateway.publish(&batch(1)).await.unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::Fetch);
    }
}
