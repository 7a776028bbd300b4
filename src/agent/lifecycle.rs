//! Shutdown coordination.

use std::time::Duration;

use crate::error::Result;
use crate::types::Event;

use super::ExtractorAgent;

/// How long shutdown waits for the services to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl ExtractorAgent {
    /// Gracefully shut down the agent
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Cancels the launcher, reporter, coordinator client and HTTP surface
    /// 2. Shuts down the extraction invoker, interrupting in-flight batches
    /// 3. Waits for the services to stop with a timeout (30 seconds)
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Tasks still in the store are not reported; the coordinator redelivers
    /// them once this executor stops heartbeating. Calling `shutdown` more
    /// than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Signal every service loop before interrupting extraction, so a
        // torn-down batch is never mistaken for a worker crash
        self.runtime.cancel.cancel();

        // 2. Interrupt extraction
        self.components.invoker.shutdown().await;
        tracing::info!(
            invoker = self.components.invoker.name(),
            "Extraction invoker shut down"
        );

        // 3. Wait for the services with timeout
        let handles = std::mem::take(&mut *self.runtime.handles.lock().await);
        let count = handles.len();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles)).await {
            Ok(results) => {
                for error in results.into_iter().filter_map(|result| result.err()) {
                    tracing::warn!(error = %error, "Service task ended abnormally");
                }
                tracing::info!(services = count, "All services stopped");
            }
            Err(_) => {
                tracing::warn!("Timeout waiting for services to stop, proceeding with shutdown");
            }
        }

        let pending = self.store.num_pending_tasks().await;
        if pending > 0 {
            tracing::info!(pending, "Unfinished tasks left for coordinator redelivery");
        }

        // 4. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.runtime.cancel.is_cancelled()
    }
}
