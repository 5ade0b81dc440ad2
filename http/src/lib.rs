//! # Salus HTTP Transport
//!
//! Ships event batches to the collection endpoint: one `POST {host}/multi` per batch, with the
//! API key in the `api-key` header and the events as a JSON array.
//!
//! ## Example
//!
//! ```no_run
//! use salus_core::{EventPublisher, PublisherConfig, Visitor};
//! use salus_http::HttpEventPublisher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PublisherConfig::new("abc-xyz", "http://localhost:3000");
//!     let publisher = HttpEventPublisher::new(&config)?;
//!
//!     let result = publisher.publish(&[Visitor::new(()).to_publish_event()]).await?;
//!     println!("Published {} events", result.count);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;

pub use client::{API_KEY_HEADER, HttpEventPublisher, HttpTransportFactory};
pub use error::{HttpPublisherError, classify_status, classify_transport_error};
