//! In-memory collaborators for tracker tests
//!
//! - [`InMemorySiteStateStore`]: site-state store with fault injection and call counts
//! - [`RecordingPublisher`]: publisher that records batches and returns scripted results
//! - [`StaticTransportFactory`]: hands out a prepared transport, or a prepared failure

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only a poisoned lock panics

use futures::future::ready;
use salus_core::{
    ConfigurationState, EventPublisher, PublishEvent, PublishResult, PublishSuccess,
    PublisherConfig, SiteState, SiteStateError, SiteStateStore, TransportFactory,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct StoreInner {
    state: SiteState,
    get_fault: Option<SiteStateError>,
    set_fault: Option<SiteStateError>,
    clear_fault: Option<SiteStateError>,
    get_calls: usize,
    set_calls: usize,
    clear_calls: usize,
}

/// In-memory site-state store for fast, deterministic tests.
///
/// Clones share state, so a test can keep a handle after moving one into a manager. `get` reports
/// [`SiteStateError::NotFound`] while nothing is stored.
///
/// # Example
///
/// ```
/// use salus_core::{SiteStateError, SiteStateStore};
/// use salus_testing::InMemorySiteStateStore;
///
/// let store = InMemorySiteStateStore::new();
/// assert_eq!(store.get(), Err(SiteStateError::NotFound));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySiteStateStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemorySiteStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `state`.
    #[must_use]
    pub fn with_state(state: SiteState) -> Self {
        let store = Self::new();
        store.seed(state);
        store
    }

    /// Overwrite the stored state without counting a `set` call.
    pub fn seed(&self, state: SiteState) {
        self.inner.lock().unwrap().state = state;
    }

    /// The last committed state.
    #[must_use]
    pub fn committed(&self) -> SiteState {
        self.inner.lock().unwrap().state
    }

    /// Make every later `get` fail with `error`.
    pub fn fail_get(&self, error: SiteStateError) {
        self.inner.lock().unwrap().get_fault = Some(error);
    }

    /// Make every later `set` fail with `error`, leaving the stored state untouched.
    pub fn fail_set(&self, error: SiteStateError) {
        self.inner.lock().unwrap().set_fault = Some(error);
    }

    /// Make every later `clear` fail with `error`, leaving the stored state untouched.
    pub fn fail_clear(&self, error: SiteStateError) {
        self.inner.lock().unwrap().clear_fault = Some(error);
    }

    /// Remove every injected fault.
    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.get_fault = None;
        inner.set_fault = None;
        inner.clear_fault = None;
    }

    /// Number of `get` calls so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.inner.lock().unwrap().get_calls
    }

    /// Number of `set` calls so far.
    #[must_use]
    pub fn set_calls(&self) -> usize {
        self.inner.lock().unwrap().set_calls
    }

    /// Number of `clear` calls so far.
    #[must_use]
    pub fn clear_calls(&self) -> usize {
        self.inner.lock().unwrap().clear_calls
    }
}

impl SiteStateStore for InMemorySiteStateStore {
    fn get(&self) -> Result<SiteState, SiteStateError> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_calls += 1;
        if let Some(error) = &inner.get_fault {
            return Err(error.clone());
        }
        if inner.state.is_empty() {
            return Err(SiteStateError::NotFound);
        }
        Ok(inner.state)
    }

    fn set(&mut self, state: &SiteState) -> Result<SiteState, SiteStateError> {
        let mut inner = self.inner.lock().unwrap();
        inner.set_calls += 1;
        if let Some(error) = &inner.set_fault {
            return Err(error.clone());
        }
        inner.state = *state;
        Ok(inner.state)
    }

    fn clear(&mut self) -> Result<SiteState, SiteStateError> {
        let mut inner = self.inner.lock().unwrap();
        inner.clear_calls += 1;
        if let Some(error) = &inner.clear_fault {
            return Err(error.clone());
        }
        inner.state = SiteState::EMPTY;
        Ok(inner.state)
    }
}

#[derive(Debug, Default)]
struct PublisherInner {
    batches: Vec<Vec<PublishEvent>>,
    scripted: VecDeque<PublishResult>,
    fallback: Option<PublishResult>,
}

/// Publisher that records every batch it is given.
///
/// Results come from, in order: results queued with [`RecordingPublisher::respond_once`], the
/// result set with [`RecordingPublisher::respond_with`], and finally success with the batch length.
#[derive(Clone, Debug, Default)]
pub struct RecordingPublisher {
    inner: Arc<Mutex<PublisherInner>>,
}

impl RecordingPublisher {
    /// Create a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every later publish with `result`.
    pub fn respond_with(&self, result: PublishResult) {
        self.inner.lock().unwrap().fallback = Some(result);
    }

    /// Answer the next unscripted publish with `result`.
    pub fn respond_once(&self, result: PublishResult) {
        self.inner.lock().unwrap().scripted.push_back(result);
    }

    /// Every batch published so far, oldest first.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<PublishEvent>> {
        self.inner.lock().unwrap().batches.clone()
    }

    /// Every event published so far, flattened.
    #[must_use]
    pub fn events(&self) -> Vec<PublishEvent> {
        self.batches().into_iter().flatten().collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, events: &[PublishEvent]) -> impl Future<Output = PublishResult> + Send {
        let mut inner = self.inner.lock().unwrap();
        inner.batches.push(events.to_vec());
        let result = inner
            .scripted
            .pop_front()
            .or_else(|| inner.fallback.clone())
            .unwrap_or(Ok(PublishSuccess::new(events.len())));
        ready(result)
    }
}

/// Transport factory returning a prepared transport, or a prepared configuration failure.
#[derive(Clone, Debug)]
pub struct StaticTransportFactory<T> {
    outcome: Result<T, ConfigurationState>,
}

impl<T> StaticTransportFactory<T> {
    /// Hand out clones of `transport`.
    pub const fn new(transport: T) -> Self {
        Self {
            outcome: Ok(transport),
        }
    }
}

impl StaticTransportFactory<RecordingPublisher> {
    /// Reject every configuration with `state`.
    #[must_use]
    pub const fn failing(state: ConfigurationState) -> Self {
        Self { outcome: Err(state) }
    }
}

impl<T> TransportFactory for StaticTransportFactory<T>
where
    T: EventPublisher + Clone + Send + Sync + 'static,
{
    type Transport = T;

    fn build(&self, _config: &PublisherConfig) -> Result<T, ConfigurationState> {
        self.outcome.clone()
    }
}
