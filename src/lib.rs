//! # extractor-agent
//!
//! Extraction executor for a coordinated content pipeline.
//!
//! The agent registers with a coordinator over gRPC and keeps a heartbeat
//! stream open. Tasks arriving on that stream are downloaded, grouped into
//! per-extractor batches, and run through pluggable extractors. Results are
//! streamed to ingestion over a websocket, and tasks stay owned by the agent
//! until ingestion acknowledges them.
//!
//! ## Design
//!
//! - **Single source of truth** - every task lives in one [`TaskStore`](task_store::TaskStore)
//! - **Pluggable** - extractors, content fetching, and the ingest transport are traits
//! - **Event-driven** - consumers subscribe to lifecycle events, no polling required
//! - **Library-first** - the demo binary is a thin wrapper over [`ExtractorAgent`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use extractor_agent::{Config, ExtractorAgent, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.coordinator.addr = "coordinator.internal:8950".to_string();
//!     config.ingestion.addr = "ingestion.internal:8900".to_string();
//!
//!     let agent = ExtractorAgent::from_config(config)?;
//!
//!     // Subscribe to events
//!     let mut events = agent.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     agent.start().await?;
//!     run_with_shutdown(agent).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Agent facade: construction, start, shutdown
pub mod agent;
/// Debug HTTP surface
pub mod api;
/// Configuration types
pub mod config;
/// Coordinator registration and heartbeat client
pub mod coordinator;
/// Error types
pub mod error;
/// Extractor invocation
pub mod extraction;
/// Task payload download
pub mod fetcher;
/// Generated coordinator protocol code
#[allow(missing_docs, clippy::all, clippy::unwrap_used, clippy::expect_used)]
pub mod proto;
/// Result reporting to ingestion
pub mod reporter;
/// Retry logic with exponential backoff
pub mod retry;
/// Batch scheduling and extraction launch
pub mod scheduler;
/// Task ownership and lifecycle
pub mod task_store;
/// Core types and events
pub mod types;
/// Executor identity and address detection
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use agent::ExtractorAgent;
pub use config::Config;
pub use error::{
    ApiError, CoordinatorError, Error, ErrorDetail, ExtractionError, FetchError, ReportError,
    Result, ToHttpStatus,
};
pub use extraction::{ExtractionInvoker, Extractor, LocalInvoker, ProcessInvoker};
pub use fetcher::{ContentFetcher, HttpContentFetcher};
pub use reporter::{IngestTransport, WebSocketTransport};
pub use task_store::TaskStore;
pub use types::{
    AgentStatus, CompletedTask, Content, ContentMetadata, Event, ExtractorDescription,
    ExtractorInput, Feature, FeatureType, Output, Task, TaskId, TaskOutcome,
};

/// Run a started agent until a termination signal, then shut it down.
///
/// - **Unix:** SIGTERM or SIGINT, falling back to whichever can be registered.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use extractor_agent::{Config, ExtractorAgent, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let agent = ExtractorAgent::from_config(Config::default())?;
///     agent.start().await?;
///
///     run_with_shutdown(agent).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(agent: ExtractorAgent) -> Result<()> {
    wait_for_signal().await;
    agent.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler, waiting on the other");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
