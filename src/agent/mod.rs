//! The agent facade tying the components together.
//!
//! [`ExtractorAgent`] owns the shared [`TaskStore`] and the event channel and
//! hands clones of both to the long-running services:
//! - [`services`] - spawning the launcher, reporter, coordinator client, and HTTP surface
//! - [`lifecycle`] - graceful shutdown

mod lifecycle;
mod services;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extraction::{ExtractionInvoker, ProcessInvoker};
use crate::fetcher::{ContentFetcher, HttpContentFetcher};
use crate::reporter::{IngestTransport, WebSocketTransport};
use crate::task_store::TaskStore;
use crate::types::{AgentStatus, Event, ExtractorInput, Output, Task, TaskId};
use crate::utils;

/// Pluggable collaborators of the agent
#[derive(Clone)]
pub(crate) struct Components {
    /// Runs extractor batches
    pub(crate) invoker: Arc<dyn ExtractionInvoker>,
    /// Downloads task payloads
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    /// Opens ingest sessions for reports
    pub(crate) transport: Arc<dyn IngestTransport>,
}

/// State owned by the running services
pub(crate) struct RuntimeState {
    /// Cancelled once on shutdown; every service loop watches it
    pub(crate) cancel: CancellationToken,
    /// Handles of the spawned services, joined on shutdown
    pub(crate) handles: Mutex<Vec<JoinHandle<()>>>,
    /// Address advertised to the coordinator, fixed once the HTTP surface is bound
    pub(crate) advertise_addr: OnceLock<String>,
    /// When [`ExtractorAgent::start`] was called
    pub(crate) started_at: OnceLock<chrono::DateTime<chrono::Utc>>,
}

/// Main agent instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ExtractorAgent {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Executor id presented to the coordinator and to ingestion
    pub(crate) executor_id: Arc<str>,
    /// Tasks owned by this executor
    pub(crate) store: Arc<TaskStore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Invoker, fetcher, and ingest transport
    pub(crate) components: Components,
    /// Cancellation and service handles
    pub(crate) runtime: Arc<RuntimeState>,
}

impl ExtractorAgent {
    /// Create an agent from explicit collaborators
    ///
    /// Validates the configuration and resolves the executor id. Nothing runs
    /// until [`start`](Self::start).
    pub fn new(
        config: Config,
        invoker: Arc<dyn ExtractionInvoker>,
        fetcher: Arc<dyn ContentFetcher>,
        transport: Arc<dyn IngestTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let executor_id: Arc<str> = utils::resolve_executor_id(&config).into();

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let store = Arc::new(TaskStore::new(config.agent.max_task_retries));

        tracing::info!(
            executor_id = %executor_id,
            invoker = invoker.name(),
            extractors = invoker.extractors().len(),
            batch_size = config.agent.batch_size,
            "Extractor agent initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            executor_id,
            store,
            event_tx,
            components: Components {
                invoker,
                fetcher,
                transport,
            },
            runtime: Arc::new(RuntimeState {
                cancel: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
                advertise_addr: OnceLock::new(),
                started_at: OnceLock::new(),
            }),
        })
    }

    /// Create an agent with the production collaborators
    ///
    /// Extractor modules come from `extraction.modules`, payloads are
    /// downloaded over HTTP, and reports go over the ingestion websocket.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let invoker = Arc::new(ProcessInvoker::new(&config.extraction)?);
        let fetcher = Arc::new(HttpContentFetcher::new(&config)?);
        let transport = Arc::new(WebSocketTransport::new(&config)?);

        Self::new(config, invoker, fetcher, transport)
    }

    /// Subscribe to agent events
    ///
    /// Slow subscribers may miss events once the 1000-event buffer is full.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers, ignoring if there are none
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// The executor id in use
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// The configuration the agent was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared task store
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Queue tasks without going through the coordinator
    ///
    /// Tasks already known to the store are ignored. Returns the ids that
    /// were newly added.
    pub async fn add_tasks(&self, tasks: Vec<Task>) -> Result<Vec<TaskId>> {
        if self.runtime.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let extractors: HashMap<TaskId, String> = tasks
            .iter()
            .map(|task| (task.id.clone(), task.extractor.clone()))
            .collect();

        let added = self.store.add_tasks(tasks).await;
        for task_id in &added {
            let extractor = extractors.get(task_id).cloned().unwrap_or_default();
            self.emit_event(Event::TaskReceived {
                task_id: task_id.clone(),
                extractor,
            });
        }
        Ok(added)
    }

    /// Current agent snapshot
    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            executor_id: self.executor_id.to_string(),
            advertise_addr: self
                .runtime
                .advertise_addr
                .get()
                .cloned()
                .unwrap_or_default(),
            pending_tasks: self.store.num_pending_tasks().await,
            max_pending_tasks: self.config.agent.max_pending_tasks(),
            extractors: self
                .components
                .invoker
                .extractors()
                .into_iter()
                .map(|description| description.name)
                .collect(),
            started_at: self.runtime.started_at.get().copied(),
        }
    }

    /// Run one extractor on a single input, bypassing the task store
    ///
    /// Used by the debug `POST /extract` endpoint.
    pub async fn extract(&self, extractor: &str, input: ExtractorInput) -> Result<Vec<Output>> {
        if self.runtime.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let id = TaskId::new(format!("adhoc-{}", uuid::Uuid::new_v4()));
        let mut outputs = self
            .components
            .invoker
            .invoke(extractor, HashMap::from([(id.clone(), input)]))
            .await?;

        Ok(outputs.remove(&id).unwrap_or_default())
    }
}
