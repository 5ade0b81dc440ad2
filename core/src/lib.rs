//! # Salus Core
//!
//! Types and contracts for the Salus analytics tracker.
//!
//! The tracker emits hierarchical events (visitor, session, section, click), keeps the active
//! visitor/session/section as [`SiteState`](site_state::SiteState), and ships events through an
//! [`EventPublisher`](publisher::EventPublisher). This crate holds no I/O: storage and transport
//! live in `salus-storage` and `salus-http`, the state machine and the background publishing
//! pipeline in `salus-runtime`.
//!
//! ## Modules
//!
//! - [`event`]: event kinds, typed references and the parent-rank rules
//! - [`wire`]: the serialized event sent to the collection endpoint
//! - [`site_state`]: the visitor/session/section cursor and the store contract
//! - [`publisher`]: publish results, error taxonomy and the publisher contract
//! - [`registry`]: the seven caller-facing operations
//! - [`config`]: publisher configuration and validation
//! - [`message`]: the gateway/worker message protocol

pub mod config;
pub mod event;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod site_state;
pub mod wire;

pub use config::{ConfigError, ConfigurationState, PublisherConfig};
pub use event::{
    Click, ClickReference, Event, EventReference, EventType, Kind, Reference, ReferenceError,
    Section, SectionReference, Session, SessionReference, TrackedEvent, Visitor,
    VisitorReference,
};
pub use message::{WorkerRequest, WorkerResponse};
pub use publisher::{
    EventPublisher, PublishError, PublishErrorKind, PublishResult, PublishSuccess,
    TransportFactory,
};
pub use registry::{EventRegistry, RegistryError, RegistryResult};
pub use site_state::{Retained, SiteState, SiteStateError, SiteStateStore};
pub use wire::PublishEvent;
