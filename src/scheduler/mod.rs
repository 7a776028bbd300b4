//! Batch scheduler: downloads task payloads, groups them per extractor, and
//! launches extraction.
//!
//! [`TaskLauncher::run`] is a single event loop fed by three typed channels:
//!
//! 1. runnable tasks claimed from the [`TaskStore`]
//! 2. finished downloads
//! 3. finished extraction batches
//!
//! Before waiting, every iteration drains whatever events are already queued
//! and then launches every eligible batch (see
//! [`BatchPlanner::take_dispatchable`]). A partially filled batch is therefore
//! launched as soon as no other event is ready, and batches never starve
//! under low throughput.

mod batching;

pub use batching::{BatchPlanner, ContentBatch, ExtractorState};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ExtractionError, FetchError};
use crate::extraction::{BatchOutputs, ExtractionInvoker};
use crate::fetcher::ContentFetcher;
use crate::retry::IsRetryable;
use crate::task_store::{RetryDecision, TaskStore};
use crate::types::{CompletedTask, Event, ExtractorInput, Task, TaskId, TaskOutcome};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

struct DownloadDone {
    task: Task,
    result: Result<Vec<u8>, FetchError>,
}

struct ExtractionDone {
    extractor: String,
    task_ids: Vec<TaskId>,
    result: Result<BatchOutputs, ExtractionError>,
}

/// The scheduler event loop
pub struct TaskLauncher {
    store: Arc<TaskStore>,
    fetcher: Arc<dyn ContentFetcher>,
    invoker: Arc<dyn ExtractionInvoker>,
    event_tx: broadcast::Sender<Event>,
    planner: BatchPlanner,
    work: JoinSet<()>,
    download_tx: mpsc::UnboundedSender<DownloadDone>,
    download_rx: mpsc::UnboundedReceiver<DownloadDone>,
    extraction_tx: mpsc::UnboundedSender<ExtractionDone>,
    extraction_rx: mpsc::UnboundedReceiver<ExtractionDone>,
}

impl TaskLauncher {
    /// Create a launcher producing batches of at most `batch_size` tasks
    pub fn new(
        store: Arc<TaskStore>,
        fetcher: Arc<dyn ContentFetcher>,
        invoker: Arc<dyn ExtractionInvoker>,
        event_tx: broadcast::Sender<Event>,
        batch_size: usize,
    ) -> Self {
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (extraction_tx, extraction_rx) = mpsc::unbounded_channel();
        Self {
            store,
            fetcher,
            invoker,
            event_tx,
            planner: BatchPlanner::new(batch_size),
            work: JoinSet::new(),
            download_tx,
            download_rx,
            extraction_tx,
            extraction_rx,
        }
    }

    /// Run until `cancel` fires
    ///
    /// On cancellation every outstanding download and extraction is aborted;
    /// their tasks are dropped without an outcome and come back only through
    /// coordinator redelivery.
    pub async fn run(mut self, cancel: CancellationToken) {
        let (runnable_tx, mut runnable_rx) = mpsc::channel::<HashMap<TaskId, Task>>(1);

        let store = self.store.clone();
        self.work.spawn(async move {
            loop {
                let tasks = store.get_runnable_tasks().await;
                if runnable_tx.send(tasks).await.is_err() {
                    break;
                }
            }
        });

        tracing::info!("Task launcher started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.drain_ready(&mut runnable_rx, &cancel).await;
            self.dispatch();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(done) = self.extraction_rx.recv() => self.on_extraction_done(done, &cancel).await,
                Some(done) = self.download_rx.recv() => self.on_download_done(done).await,
                Some(tasks) = runnable_rx.recv() => self.on_runnable(tasks),
                else => break,
            }
        }

        let outstanding = self.work.len();
        self.work.shutdown().await;
        tracing::info!(outstanding, "Task launcher stopped");
    }

    async fn drain_ready(
        &mut self,
        runnable_rx: &mut mpsc::Receiver<HashMap<TaskId, Task>>,
        cancel: &CancellationToken,
    ) {
        // Reap finished download/extraction tasks
        while self.work.try_join_next().is_some() {}

        while !cancel.is_cancelled() {
            if let Ok(done) = self.extraction_rx.try_recv() {
                self.on_extraction_done(done, cancel).await;
            } else if let Ok(done) = self.download_rx.try_recv() {
                self.on_download_done(done).await;
            } else if let Ok(tasks) = runnable_rx.try_recv() {
                self.on_runnable(tasks);
            } else {
                break;
            }
        }
    }

    fn on_runnable(&mut self, tasks: HashMap<TaskId, Task>) {
        tracing::debug!(count = tasks.len(), "Claimed runnable tasks");
        for (_, task) in tasks {
            let fetcher = self.fetcher.clone();
            let tx = self.download_tx.clone();
            self.work.spawn(async move {
                let result = fetcher.fetch(&task).await;
                tx.send(DownloadDone { task, result }).ok();
            });
        }
    }

    async fn on_download_done(&mut self, done: DownloadDone) {
        let DownloadDone { task, result } = done;
        match result {
            Ok(data) => {
                let content_type = if task.content_metadata.mime.is_empty() {
                    DEFAULT_CONTENT_TYPE.to_string()
                } else {
                    task.content_metadata.mime.clone()
                };
                let input = ExtractorInput {
                    content_type,
                    data,
                    params: task.input_params,
                };
                if self.planner.add_download(&task.extractor, task.id.clone(), input) {
                    tracing::debug!(extractor = %task.extractor, "Batch full");
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Content download failed");
                self.commit(CompletedTask::failed(task.id)).await;
            }
        }
    }

    fn dispatch(&mut self) {
        for batch in self.planner.take_dispatchable() {
            let task_ids = batch.task_ids();
            let (extractor, inputs) = batch.into_parts();

            tracing::info!(extractor = %extractor, size = task_ids.len(), "Dispatching batch");
            self.event_tx
                .send(Event::BatchDispatched {
                    extractor: extractor.clone(),
                    size: task_ids.len(),
                })
                .ok();

            let invoker = self.invoker.clone();
            let tx = self.extraction_tx.clone();
            self.work.spawn(async move {
                let result = invoker.invoke(&extractor, inputs).await;
                tx.send(ExtractionDone {
                    extractor,
                    task_ids,
                    result,
                })
                .ok();
            });
        }
    }

    async fn on_extraction_done(&mut self, done: ExtractionDone, cancel: &CancellationToken) {
        let ExtractionDone {
            extractor,
            task_ids,
            result,
        } = done;
        self.planner.complete_batch(&extractor);

        match result {
            Ok(mut outputs) => {
                for id in task_ids {
                    let task_outputs = outputs.remove(&id).unwrap_or_default();
                    self.commit(CompletedTask::from_outputs(id, task_outputs)).await;
                }
            }
            // A batch torn down by shutdown is not a crash: leave its tasks
            // running so they come back only through redelivery.
            Err(e) if e.is_retryable() && cancel.is_cancelled() => {
                tracing::debug!(extractor = %extractor, error = %e, tasks = task_ids.len(), "Batch interrupted by shutdown");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(extractor = %extractor, error = %e, tasks = task_ids.len(), "Extractor worker crashed, batch awaits redelivery");
                for id in task_ids {
                    match self.store.retriable_failure(&id).await {
                        RetryDecision::AwaitRedelivery { attempt } => {
                            self.event_tx
                                .send(Event::TaskRetryScheduled {
                                    task_id: id,
                                    attempt,
                                })
                                .ok();
                        }
                        RetryDecision::GaveUp => {
                            self.event_tx
                                .send(Event::TaskCompleted {
                                    task_id: id,
                                    outcome: TaskOutcome::Failed,
                                })
                                .ok();
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(extractor = %extractor, error = %e, tasks = task_ids.len(), "Extraction failed");
                for id in task_ids {
                    self.commit(CompletedTask::failed(id)).await;
                }
            }
        }
    }

    async fn commit(&self, completed: CompletedTask) {
        let task_id = completed.task_id.clone();
        let outcome = completed.outcome;
        self.store.complete(completed).await;
        tracing::debug!(task_id = %task_id, outcome = %outcome, "Task finished");
        self.event_tx
            .send(Event::TaskCompleted { task_id, outcome })
            .ok();
    }
}
