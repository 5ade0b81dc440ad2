//! # Salus Testing
//!
//! Testing utilities for the Salus tracker.
//!
//! This crate provides:
//! - In-memory collaborators: a site-state store with fault injection, a recording publisher and
//!   a static transport factory
//! - Assertion helpers for published batches
//! - Property-based testing strategies over tracker operations
//!
//! ## Example
//!
//! ```ignore
//! use salus_runtime::EventManager;
//! use salus_testing::{InMemorySiteStateStore, RecordingPublisher, assert_lineage};
//!
//! #[tokio::test]
//! async fn test_section_cascade() {
//!     let publisher = RecordingPublisher::new();
//!     let mut manager = EventManager::new(publisher.clone(), InMemorySiteStateStore::new());
//!
//!     manager.register_section().await.unwrap();
//!
//!     assert_lineage(&publisher.batches()[0]);
//! }
//! ```

/// In-memory collaborators
pub mod mocks;

/// Test helpers and assertions.
pub mod helpers {
    use salus_core::PublishEvent;
    use tracing_subscriber::EnvFilter;

    /// Assert that every event after the first is the child of the event before it.
    ///
    /// # Panics
    ///
    /// Panics if an event's parent is not the preceding event or its rank is not one higher.
    #[track_caller]
    pub fn assert_lineage(batch: &[PublishEvent]) {
        for pair in batch.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            assert_eq!(
                child.parent_id(),
                Some(parent.i),
                "{} {} is not a child of {} {}",
                child.t,
                child.i,
                parent.t,
                parent.i
            );
            assert_eq!(child.t.rank(), parent.t.rank() + 1, "rank must increase by one");
        }
    }

    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`, defaulting to `warn`.
    pub fn init_test_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use salus_core::{EventRegistry, RegistryResult};

    /// One of the seven tracker operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Operation {
        /// `register_visitor`
        RegisterVisitor,
        /// `deregister_visitor`
        DeregisterVisitor,
        /// `register_session`
        RegisterSession,
        /// `deregister_session`
        DeregisterSession,
        /// `register_section`
        RegisterSection,
        /// `deregister_section`
        DeregisterSection,
        /// `register_click`
        RegisterClick,
    }

    impl Operation {
        /// Every operation.
        pub const ALL: [Self; 7] = [
            Self::RegisterVisitor,
            Self::DeregisterVisitor,
            Self::RegisterSession,
            Self::DeregisterSession,
            Self::RegisterSection,
            Self::DeregisterSection,
            Self::RegisterClick,
        ];

        /// Whether this operation creates an event of its own.
        #[must_use]
        pub const fn emits(self) -> bool {
            !matches!(
                self,
                Self::DeregisterVisitor | Self::DeregisterSession | Self::DeregisterSection
            )
        }

        /// Run this operation against `registry`.
        pub async fn apply<R: EventRegistry>(self, registry: &mut R) -> RegistryResult {
            match self {
                Self::RegisterVisitor => registry.register_visitor().await,
                Self::DeregisterVisitor => registry.deregister_visitor().await,
                Self::RegisterSession => registry.register_session().await,
                Self::DeregisterSession => registry.deregister_session().await,
                Self::RegisterSection => registry.register_section().await,
                Self::DeregisterSection => registry.deregister_section().await,
                Self::RegisterClick => registry.register_click().await,
            }
        }
    }

    /// Any single operation.
    pub fn operation() -> impl Strategy<Value = Operation> {
        proptest::sample::select(Operation::ALL.to_vec())
    }

    /// Sequences of up to `max_len` operations.
    pub fn operations(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
        proptest::collection::vec(operation(), 0..=max_len)
    }
}

pub use helpers::{assert_lineage, init_test_tracing};
pub use mocks::{InMemorySiteStateStore, RecordingPublisher, StaticTransportFactory};
pub use properties::{Operation, operation, operations};
