//! Tracker Demo
//!
//! Registers a section and a click against a collection endpoint, creating the visitor and
//! session on first run. The visitor id is kept in a state file, so running the demo twice
//! reuses it.
//!
//! # Running the Example
//!
//! ```bash
//! SALUS_API_KEY=abc-xyz SALUS_HOST=http://localhost:3000 cargo run -p tracker-demo
//! ```
//!
//! Environment:
//! - `SALUS_API_KEY`, `SALUS_HOST`, `SALUS_REQUEST_TIMEOUT_MS` - publisher configuration
//! - `SALUS_STATE_FILE` - durable state file (defaults to the system temp directory)
//! - `SALUS_METRICS` - print Prometheus metrics before exiting when set
//! - `RUST_LOG` - log filter (defaults to `info`)

#![allow(missing_docs)]

use anyhow::Context;
use salus_core::config::{API_KEY_ENV, HOST_ENV};
use salus_core::{ConfigurationState, PublisherConfig, SiteStateStore};
use salus_http::HttpTransportFactory;
use salus_runtime::metrics::install_prometheus;
use salus_runtime::{ErrorHandler, EventManager, PublisherGateway};
use salus_storage::{FileStorage, MemoryStorage, WebStorageSiteStateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_API_KEY: &str = "abc-xyz";
const DEFAULT_HOST: &str = "http://localhost:3000";

fn load_config() -> anyhow::Result<PublisherConfig> {
    let config = PublisherConfig::from_lookup(|name| {
        std::env::var(name).ok().or_else(|| match name {
            API_KEY_ENV => Some(DEFAULT_API_KEY.to_string()),
            HOST_ENV => Some(DEFAULT_HOST.to_string()),
            _ => None,
        })
    })?;
    Ok(config)
}

fn state_file() -> PathBuf {
    std::env::var_os("SALUS_STATE_FILE")
        .map_or_else(|| std::env::temp_dir().join("salus-tracker-demo.json"), PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let metrics = if std::env::var_os("SALUS_METRICS").is_some() {
        Some(install_prometheus().context("installing Prometheus recorder")?)
    } else {
        None
    };

    let config = load_config().context("reading publisher configuration")?;
    tracing::info!(host = %config.host, "Starting tracker demo");

    let path = state_file();
    let store = WebStorageSiteStateStore::new(
        &config.api_key,
        FileStorage::new(&path),
        MemoryStorage::new(),
    )?;
    match store.get() {
        Ok(state) => tracing::info!(path = %path.display(), ?state, "Resuming site state"),
        Err(error) => {
            tracing::info!(path = %path.display(), %error, "Starting from empty site state");
        }
    }

    let on_error: ErrorHandler = Arc::new(|message| tracing::error!("{message}"));
    let gateway = PublisherGateway::spawn(config, HttpTransportFactory, Some(on_error))?;
    let state = gateway.configured().await;
    if state != ConfigurationState::Success {
        anyhow::bail!("publisher rejected configuration: {state:?}");
    }

    let mut manager = EventManager::new(gateway, store);

    match manager.register_section().await {
        Ok(success) => tracing::info!(count = success.count, "Section registered"),
        Err(error) => tracing::error!(%error, "Section registration failed"),
    }
    match manager.register_click().await {
        Ok(success) => tracing::info!(count = success.count, "Click registered"),
        Err(error) => tracing::error!(%error, "Click registration failed"),
    }

    let (gateway, store) = manager.into_parts();
    tracing::info!(state = ?store.get(), "Final site state");
    gateway.shutdown().await;

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }

    Ok(())
}
