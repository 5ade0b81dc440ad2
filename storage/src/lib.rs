//! # Salus Storage
//!
//! Persists the tracker's site state across page loads and process restarts.
//!
//! - [`FileStorage`] - durable key-value backend (JSON object file)
//! - [`MemoryStorage`] - session-scoped key-value backend
//! - [`WebStorageSiteStateStore`] - [`SiteStateStore`](salus_core::SiteStateStore) keeping the
//!   visitor in the durable backend, the session in the session-scoped backend, and the section in
//!   memory only
//!
//! ## Example
//!
//! ```no_run
//! use salus_core::SiteStateStore;
//! use salus_storage::{FileStorage, MemoryStorage, WebStorageSiteStateStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = WebStorageSiteStateStore::new(
//!     "abc-xyz",
//!     FileStorage::new("/var/lib/salus/state.json"),
//!     MemoryStorage::new(),
//! )?;
//! println!("{:?}", store.get());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod web_storage;

pub use backend::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use web_storage::{KEY_PREFIX, STORAGE_FAILURES, WebStorageSiteStateStore};
