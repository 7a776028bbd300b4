//! Result reporter: streams finished tasks to ingestion
//!
//! Each finished task is reported over its own ingest session (see
//! [`protocol`] for the message sequence). Outcomes:
//!
//! - accepted: the task is evicted from the store
//! - rejected by ingestion: [`TaskStore::report_failed`] downgrades the task
//!   to `Failed` for one more attempt, or evicts it if it already was
//! - anything else is transient: the task stays finished and is retried on a
//!   later drain pass, after a backoff delay

pub mod protocol;
pub mod transport;

pub use protocol::{DEFAULT_FRAME_SIZE, IngestMessage, ingest_messages, split_frames};
pub use transport::{Acknowledgement, IngestSession, IngestTransport, WebSocketTransport};

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::ReportError;
use crate::retry::{Backoff, IsRetryable};
use crate::task_store::{ReportFailure, TaskStore};
use crate::types::{CompletedTask, Event};

/// Counts from one drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Reports accepted by ingestion
    pub reported: usize,
    /// Reports rejected by ingestion
    pub rejected: usize,
    /// Reports that failed transiently and stay queued
    pub transient: usize,
}

/// Drains finished tasks from the store into ingestion
pub struct ResultReporter {
    store: Arc<TaskStore>,
    transport: Arc<dyn IngestTransport>,
    executor_id: String,
    frame_size: usize,
    retry: RetryConfig,
    event_tx: broadcast::Sender<Event>,
}

impl ResultReporter {
    /// Create a reporter
    pub fn new(
        store: Arc<TaskStore>,
        transport: Arc<dyn IngestTransport>,
        executor_id: impl Into<String>,
        frame_size: usize,
        retry: RetryConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            transport,
            executor_id: executor_id.into(),
            frame_size,
            retry,
            event_tx,
        }
    }

    /// Send one task report and wait for the acknowledgement
    pub async fn report(&self, completed: &CompletedTask) -> Result<(), ReportError> {
        let mut session = self.transport.open().await?;
        for message in ingest_messages(completed, &self.executor_id, self.frame_size) {
            session.send(message).await?;
        }

        let message = match session.finish().await? {
            Acknowledgement::Reply(ack) => match protocol::ack_error(&ack) {
                Some(message) => message,
                None => return Ok(()),
            },
            Acknowledgement::ClosedWithError(message) => message,
        };

        Err(ReportError::Rejected {
            task_id: completed.task_id.clone(),
            message,
        })
    }

    /// Report every currently finished task once
    ///
    /// Waits until at least one task has finished.
    pub async fn drain_once(&self) -> DrainSummary {
        let mut summary = DrainSummary::default();

        for completed in self.store.task_outcomes().await {
            let task_id = completed.task_id.clone();

            match self.report(&completed).await {
                Ok(()) => {
                    self.store.mark_reported(&task_id).await;
                    tracing::info!(task_id = %task_id, outcome = %completed.outcome, "Task reported");
                    self.event_tx.send(Event::TaskReported { task_id }).ok();
                    summary.reported += 1;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(task_id = %task_id, error = %e, "Report failed, will retry");
                    summary.transient += 1;
                }
                Err(e) => {
                    let evicted = match self.store.report_failed(&task_id).await {
                        ReportFailure::MarkedFailed => {
                            tracing::warn!(task_id = %task_id, error = %e, "Report rejected, retrying as failed");
                            false
                        }
                        ReportFailure::Evicted => {
                            tracing::error!(task_id = %task_id, error = %e, "Report rejected twice, dropping task");
                            true
                        }
                        ReportFailure::Unknown => true,
                    };
                    self.event_tx
                        .send(Event::ReportFailed {
                            task_id,
                            error: e.to_string(),
                            evicted,
                        })
                        .ok();
                    summary.rejected += 1;
                }
            }
        }

        summary
    }

    /// Drain until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.retry.clone());
        tracing::info!(executor_id = %self.executor_id, "Result reporter started");

        loop {
            let summary = tokio::select! {
                _ = cancel.cancelled() => break,
                summary = self.drain_once() => summary,
            };

            if summary.transient == 0 {
                backoff.reset();
                continue;
            }

            let delay = backoff.next_delay();
            tracing::debug!(
                pending = summary.transient,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Backing off before next report pass"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Result reporter stopped");
    }
}
