//! The event manager: the tracker's state machine.
//!
//! Each operation follows the same shape:
//!
//! 1. Stage: read site state lazily into the write buffer, create any missing ancestors top-down
//!    and the requested event, appending each to the pending queue.
//! 2. Commit: write the buffer to the store (`clear` if it is empty, `set` otherwise).
//! 3. Publish: send the whole queue as one batch and map the result onto [`RegistryError`].
//!
//! The queue and the buffer are reset on every call, whatever the outcome. A commit failure
//! resolves to [`RegistryError::Internal`] without publishing; a publish failure does not roll
//! back the committed state.

use crate::metrics::ManagerMetrics;
use salus_core::event::{ClickKind, Event, Kind, ParentLink, SectionKind, SessionKind, VisitorKind};
use salus_core::{
    EventPublisher, EventRegistry, PublishEvent, PublishSuccess, Reference, RegistryError,
    RegistryResult, Retained, SiteState, SiteStateError, SiteStateStore, TrackedEvent,
};
use smallvec::SmallVec;
use std::future::Future;

/// Pending events of one call; the deepest cascade is visitor, session, section, click.
type PendingQueue = SmallVec<[TrackedEvent; 4]>;

/// Owns the site-state write buffer and the pending-event queue.
///
/// Operations take `&mut self`, so a manager can never run two operations at once.
pub struct EventManager<P, S> {
    publisher: P,
    store: S,
    queue: PendingQueue,
    buffer: Option<SiteState>,
}

impl<P, S> EventManager<P, S>
where
    P: EventPublisher,
    S: SiteStateStore,
{
    /// Create a manager. Nothing is read from `store` until the first operation needs it.
    pub fn new(publisher: P, store: S) -> Self {
        Self {
            publisher,
            store,
            queue: SmallVec::new(),
            buffer: None,
        }
    }

    /// The publisher events are sent through.
    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// The site-state store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Release the collaborators.
    pub fn into_parts(self) -> (P, S) {
        (self.publisher, self.store)
    }

    /// Read the committed site state.
    ///
    /// Absent state reads as [`SiteState::EMPTY`]; orphaned fields are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SiteStateError::Internal`] or [`SiteStateError::MalformedData`] from the store.
    pub fn site_state(&self) -> Result<SiteState, SiteStateError> {
        match self.store.get() {
            Ok(state) => Ok(state.normalized()),
            Err(SiteStateError::NotFound) => Ok(SiteState::EMPTY),
            Err(error) => Err(error),
        }
    }

    /// Start a new visitor; session and section are discarded.
    #[tracing::instrument(skip(self), name = "register_visitor")]
    pub async fn register_visitor(&mut self) -> RegistryResult {
        let staged = self.open::<VisitorKind>().map(drop);
        self.complete(staged).await
    }

    /// Clear the whole site state. Emits no event.
    #[tracing::instrument(skip(self), name = "deregister_visitor")]
    pub async fn deregister_visitor(&mut self) -> RegistryResult {
        let staged = self.stage::<VisitorKind>(None);
        self.complete(staged).await
    }

    /// Start a new session under the current (or a new) visitor.
    #[tracing::instrument(skip(self), name = "register_session")]
    pub async fn register_session(&mut self) -> RegistryResult {
        let staged = self.open::<SessionKind>().map(drop);
        self.complete(staged).await
    }

    /// Clear session and section, keeping the visitor. Emits no event.
    #[tracing::instrument(skip(self), name = "deregister_session")]
    pub async fn deregister_session(&mut self) -> RegistryResult {
        let staged = self.stage::<SessionKind>(None);
        self.complete(staged).await
    }

    /// Start a new section under the current (or a new) session.
    #[tracing::instrument(skip(self), name = "register_section")]
    pub async fn register_section(&mut self) -> RegistryResult {
        let staged = self.open::<SectionKind>().map(drop);
        self.complete(staged).await
    }

    /// Clear the section only. Emits no event.
    #[tracing::instrument(skip(self), name = "deregister_section")]
    pub async fn deregister_section(&mut self) -> RegistryResult {
        let staged = self.stage::<SectionKind>(None);
        self.complete(staged).await
    }

    /// Record a click in the current (or a new) section. Clicks are never retained.
    #[tracing::instrument(skip(self), name = "register_click")]
    pub async fn register_click(&mut self) -> RegistryResult {
        let staged = self.create::<ClickKind>().map(drop);
        self.complete(staged).await
    }

    /// Write buffer, loading it from the store on first use.
    fn buffer(&mut self) -> Result<&mut SiteState, SiteStateError> {
        let state = match self.buffer {
            Some(state) => state,
            None => self.site_state()?,
        };
        Ok(self.buffer.insert(state))
    }

    /// Current reference of kind `K`, creating it (and its ancestors) if absent.
    fn obtain<K>(&mut self) -> Result<Reference<K>, SiteStateError>
    where
        K: Retained,
        K::Parent: Ancestry,
    {
        match K::current(self.buffer()?) {
            Some(reference) => Ok(reference),
            None => self.open::<K>(),
        }
    }

    /// Create a new event of kind `K` and make it current.
    fn open<K>(&mut self) -> Result<Reference<K>, SiteStateError>
    where
        K: Retained,
        K::Parent: Ancestry,
    {
        let reference = self.create::<K>()?;
        self.stage::<K>(Some(reference))?;
        Ok(reference)
    }

    /// Create a new event of kind `K` under the current parent and enqueue it.
    fn create<K>(&mut self) -> Result<Reference<K>, SiteStateError>
    where
        K: Kind,
        K::Parent: Ancestry,
    {
        let parent = <K::Parent as Ancestry>::resolve(self)?;
        let event = Event::<K>::new(parent);
        self.queue.push(event.into());

        ManagerMetrics::record_enqueued(K::EVENT_TYPE);
        tracing::debug!(
            event_type = %K::EVENT_TYPE,
            id = %event.id(),
            parent_id = ?parent.parent_id(),
            "Enqueued event"
        );
        Ok(event.reference())
    }

    /// Assign the current reference of kind `K` in the write buffer.
    ///
    /// The root kind replaces the whole state, so the store is not read for it.
    fn stage<K: Retained>(
        &mut self,
        reference: Option<Reference<K>>,
    ) -> Result<(), SiteStateError> {
        let state = if K::EVENT_TYPE.is_root() {
            self.buffer.insert(SiteState::EMPTY)
        } else {
            self.buffer()?
        };
        K::assign(state, reference);
        Ok(())
    }

    async fn complete(&mut self, staged: Result<(), SiteStateError>) -> RegistryResult {
        let result = match staged {
            Ok(()) => self.flush().await,
            Err(error) => Err(self.abort(&error)),
        };

        match &result {
            Ok(success) => ManagerMetrics::record_flush(success.count),
            Err(error) => ManagerMetrics::record_flush_failure(error),
        }
        result
    }

    /// Drop the pending queue and the write buffer after a site-state failure.
    fn abort(&mut self, error: &SiteStateError) -> RegistryError {
        let dropped = self.queue.len();
        self.queue.clear();
        self.buffer = None;

        ManagerMetrics::record_dropped(dropped);
        tracing::error!(error = %error, dropped, "Site state failure, pending events dropped");
        RegistryError::Internal(error.to_string())
    }

    async fn flush(&mut self) -> RegistryResult {
        if let Err(error) = self.commit() {
            return Err(self.abort(&error));
        }

        let queue = std::mem::take(&mut self.queue);
        if queue.is_empty() {
            tracing::debug!("Nothing to publish");
            return Ok(PublishSuccess::new(0));
        }

        let events: Vec<PublishEvent> = queue.iter().map(TrackedEvent::to_publish_event).collect();
        match self.publisher.publish(&events).await {
            Ok(success) => {
                tracing::info!(count = success.count, "Published events");
                Ok(success)
            }
            Err(error) => {
                tracing::warn!(kind = %error.kind, message = %error.message, "Publish failed");
                Err(RegistryError::from(error))
            }
        }
    }

    /// Write the buffer to the store and release it.
    fn commit(&mut self) -> Result<SiteState, SiteStateError> {
        match self.buffer.take() {
            Some(state) if !state.is_empty() => self.store.set(&state),
            _ => self.store.clear(),
        }
    }
}

/// A parent slot the manager can fill from site state.
trait Ancestry: ParentLink {
    fn resolve<P, S>(manager: &mut EventManager<P, S>) -> Result<Self, SiteStateError>
    where
        P: EventPublisher,
        S: SiteStateStore;
}

impl Ancestry for () {
    fn resolve<P, S>(_manager: &mut EventManager<P, S>) -> Result<Self, SiteStateError>
    where
        P: EventPublisher,
        S: SiteStateStore,
    {
        Ok(())
    }
}

impl<K> Ancestry for Reference<K>
where
    K: Retained,
    K::Parent: Ancestry,
{
    fn resolve<P, S>(manager: &mut EventManager<P, S>) -> Result<Self, SiteStateError>
    where
        P: EventPublisher,
        S: SiteStateStore,
    {
        manager.obtain::<K>()
    }
}

impl<P, S> EventRegistry for EventManager<P, S>
where
    P: EventPublisher + Send + Sync,
    S: SiteStateStore + Send,
{
    fn register_visitor(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::register_visitor(self)
    }

    fn deregister_visitor(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::deregister_visitor(self)
    }

    fn register_session(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::register_session(self)
    }

    fn deregister_session(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::deregister_session(self)
    }

    fn register_section(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::register_section(self)
    }

    fn deregister_section(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::deregister_section(self)
    }

    fn register_click(&mut self) -> impl Future<Output = RegistryResult> + Send {
        Self::register_click(self)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use salus_core::{EventType, PublishError, PublishErrorKind};
    use salus_testing::{InMemorySiteStateStore, RecordingPublisher, assert_lineage};

    type TestManager = EventManager<RecordingPublisher, InMemorySiteStateStore>;

    fn manager() -> (TestManager, RecordingPublisher, InMemorySiteStateStore) {
        let publisher = RecordingPublisher::new();
        let store = InMemorySiteStateStore::new();
        (
            EventManager::new(publisher.clone(), store.clone()),
            publisher,
            store,
        )
    }

    fn types(batch: &[PublishEvent]) -> Vec<EventType> {
        batch.iter().map(|event| event.t).collect()
    }

    #[tokio::test]
    async fn test_register_section_on_empty_state_cascades() {
        let (mut manager, publisher, store) = manager();

        let result = manager.register_section().await.unwrap();

        assert_eq!(result.count, 3);
        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(
            types(batch),
            vec![EventType::Visitor, EventType::Session, EventType::Section]
        );
        assert_lineage(batch);

        let committed = store.committed();
        assert_eq!(committed.visitor.map(|r| r.id()), Some(batch[0].i));
        assert_eq!(committed.session.map(|r| r.id()), Some(batch[1].i));
        assert_eq!(committed.section.map(|r| r.id()), Some(batch[2].i));
    }

    #[tokio::test]
    async fn test_register_visitor_replaces_descendants() {
        let (mut manager, publisher, store) = manager();
        manager.register_section().await.unwrap();

        manager.register_visitor().await.unwrap();

        let committed = store.committed();
        assert!(committed.visitor.is_some());
        assert!(committed.session.is_none());
        assert!(committed.section.is_none());
        assert_eq!(types(&publisher.batches()[1]), vec![EventType::Visitor]);
    }

    #[tokio::test]
    async fn test_register_visitor_ignores_unreadable_state() {
        let (mut manager, publisher, store) = manager();
        store.fail_get(SiteStateError::MalformedData("bad visitor".into()));

        manager.register_visitor().await.unwrap();

        assert_eq!(store.get_calls(), 0);
        assert_eq!(publisher.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_register_session_reuses_visitor() {
        let (mut manager, publisher, store) = manager();
        manager.register_visitor().await.unwrap();
        let visitor = store.committed().visitor.unwrap();

        manager.register_session().await.unwrap();

        let batch = &publisher.batches()[1];
        assert_eq!(types(batch), vec![EventType::Session]);
        assert_eq!(batch[0].parent_id(), Some(visitor.id()));
        assert_eq!(store.committed().visitor, Some(visitor));
    }

    #[tokio::test]
    async fn test_register_session_clears_section() {
        let (mut manager, _publisher, store) = manager();
        manager.register_section().await.unwrap();

        manager.register_session().await.unwrap();

        let committed = store.committed();
        assert!(committed.session.is_some());
        assert!(committed.section.is_none());
    }

    #[tokio::test]
    async fn test_register_click_is_not_retained() {
        let (mut manager, publisher, store) = manager();
        manager.register_section().await.unwrap();
        let before = store.committed();

        manager.register_click().await.unwrap();

        assert_eq!(store.committed(), before);
        let batch = &publisher.batches()[1];
        assert_eq!(types(batch), vec![EventType::Click]);
        assert_eq!(batch[0].parent_id(), before.section.map(|r| r.id()));
    }

    #[tokio::test]
    async fn test_register_click_on_empty_state_cascades() {
        let (mut manager, publisher, store) = manager();

        manager.register_click().await.unwrap();

        let batch = &publisher.batches()[0];
        assert_eq!(
            types(batch),
            vec![
                EventType::Visitor,
                EventType::Session,
                EventType::Section,
                EventType::Click
            ]
        );
        assert_lineage(batch);
        assert_eq!(store.committed().section.map(|r| r.id()), Some(batch[2].i));
    }

    #[tokio::test]
    async fn test_deregister_section_is_idempotent() {
        let (mut manager, publisher, store) = manager();
        manager.register_section().await.unwrap();
        let before = store.committed();

        let first = manager.deregister_section().await.unwrap();
        let after_first = store.committed();
        let second = manager.deregister_section().await.unwrap();
        let after_second = store.committed();

        assert_eq!(first.count, 0);
        assert_eq!(second.count, 0);
        assert_eq!(after_first, after_second);
        assert_eq!(after_first.visitor, before.visitor);
        assert_eq!(after_first.session, before.session);
        assert!(after_first.section.is_none());
        assert_eq!(publisher.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_deregister_visitor_clears_store() {
        let (mut manager, publisher, store) = manager();
        manager.register_section().await.unwrap();

        manager.deregister_visitor().await.unwrap();

        assert_eq!(store.committed(), SiteState::EMPTY);
        assert_eq!(store.clear_calls(), 1);
        assert_eq!(publisher.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_deregister_session_keeps_visitor() {
        let (mut manager, _publisher, store) = manager();
        manager.register_section().await.unwrap();
        let visitor = store.committed().visitor;

        manager.deregister_session().await.unwrap();

        assert_eq!(
            store.committed(),
            SiteState {
                visitor,
                ..SiteState::EMPTY
            }
        );
    }

    #[tokio::test]
    async fn test_commit_failure_skips_publisher() {
        let (mut manager, publisher, store) = manager();
        store.fail_set(SiteStateError::Internal("disk full".into()));

        let err = manager.register_session().await.unwrap_err();

        assert!(matches!(err, RegistryError::Internal(_)));
        assert!(publisher.batches().is_empty());

        // The dropped batch is not replayed on the next call.
        store.heal();
        manager.register_session().await.unwrap();
        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(types(&batches[0]), vec![EventType::Visitor, EventType::Session]);
    }

    #[tokio::test]
    async fn test_malformed_state_is_fatal() {
        let (mut manager, publisher, store) = manager();
        store.fail_get(SiteStateError::MalformedData("session".into()));

        let err = manager.register_click().await.unwrap_err();

        assert!(matches!(err, RegistryError::Internal(_)));
        assert!(publisher.batches().is_empty());
        assert_eq!(store.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_committed_state() {
        let (mut manager, publisher, store) = manager();
        publisher.respond_with(Err(PublishError::bad_request("rejected")));

        let err = manager.register_section().await.unwrap_err();

        assert_eq!(err, RegistryError::BadRequest("rejected".into()));
        assert!(store.committed().section.is_some());
    }

    #[tokio::test]
    async fn test_publish_errors_are_collapsed() {
        let (mut manager, publisher, _store) = manager();
        publisher.respond_with(Err(PublishError::new(PublishErrorKind::Timeout, "slow")));

        let err = manager.register_visitor().await.unwrap_err();

        assert!(matches!(err, RegistryError::Internal(_)));
    }

    #[tokio::test]
    async fn test_orphaned_state_is_normalized() {
        let (mut manager, publisher, store) = manager();
        manager.register_section().await.unwrap();
        let orphan = SiteState {
            visitor: None,
            ..store.committed()
        };
        store.seed(orphan);

        manager.register_click().await.unwrap();

        let batch = &publisher.batches()[1];
        assert_eq!(batch.len(), 4);
        assert_lineage(batch);
        assert!(store.committed().is_consistent());
    }

    #[tokio::test]
    async fn test_works_through_registry_trait() {
        async fn drive<R: EventRegistry>(registry: &mut R) -> RegistryResult {
            registry.register_session().await?;
            registry.register_click().await
        }

        let (mut manager, publisher, _store) = manager();
        let result = drive(&mut manager).await.unwrap();

        assert_eq!(result.count, 2);
        assert_eq!(publisher.batches().len(), 2);
    }
}
