//! # Salus Runtime
//!
//! The tracker's state machine and its background publishing pipeline.
//!
//! ## Components
//!
//! - **[`EventManager`]**: stages site state, creates missing ancestors, commits and flushes on
//!   every operation
//! - **[`PublisherGateway`]**: caller-side [`EventPublisher`](salus_core::EventPublisher) that
//!   correlates requests and responses by id
//! - **[`PublisherProxy`]**: background worker that owns the transport
//! - **[`channel`]**: the in-process message channel between the two
//!
//! ## Example
//!
//! ```ignore
//! use salus_http::HttpTransportFactory;
//! use salus_runtime::{EventManager, PublisherGateway};
//!
//! let gateway = PublisherGateway::spawn(config, HttpTransportFactory, None)?;
//! let mut manager = EventManager::new(gateway, store);
//!
//! manager.register_section().await?;
//! manager.register_click().await?;
//! ```

/// In-process gateway/worker channel
pub mod channel;

/// Caller-side publishing gateway
pub mod gateway;

/// The event manager state machine
pub mod manager;

/// Tracker metrics
pub mod metrics;

/// Background publisher
pub mod proxy;

pub use channel::{GatewayEndpoint, WorkerEndpoint, worker_channel};
pub use gateway::{ErrorHandler, GatewayError, PublisherGateway};
pub use manager::EventManager;
pub use proxy::PublisherProxy;
