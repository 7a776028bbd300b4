//! Background service starters: task launcher, result reporter, coordinator
//! client, and the debug HTTP surface.

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::api;
use crate::coordinator::{CoordinatorClient, ExecutorIdentity};
use crate::error::{Error, Result};
use crate::reporter::ResultReporter;
use crate::scheduler::TaskLauncher;
use crate::utils;

use super::ExtractorAgent;

impl ExtractorAgent {
    /// Bind the HTTP surface and start every background service
    ///
    /// The HTTP listener is bound first so the advertised address carries the
    /// port actually in use (`agent.listen_port = 0` picks a free one).
    /// Returns the bound address. Calling `start` twice is an error.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.runtime.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let bind_address = self.config.api_bind_address();
        let listener = TcpListener::bind(bind_address).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind HTTP surface to '{}': {}", bind_address, e),
            ))
        })?;
        let local_addr = listener.local_addr()?;

        let advertise_addr = utils::resolve_advertise_addr(&self.config, local_addr.port());
        if self.runtime.advertise_addr.set(advertise_addr.clone()).is_err() {
            return Err(Error::Other("agent already started".to_string()));
        }
        self.runtime.started_at.set(chrono::Utc::now()).ok();

        let coordinator = CoordinatorClient::new(
            &self.config,
            ExecutorIdentity {
                executor_id: self.executor_id.to_string(),
                advertise_addr: advertise_addr.clone(),
                extractors: self.components.invoker.extractors(),
            },
            self.store.clone(),
            self.event_tx.clone(),
        )?;

        let handles = vec![
            self.start_task_launcher(),
            self.start_result_reporter(),
            self.start_coordinator_client(coordinator),
            self.start_api_server(listener),
        ];
        self.runtime.handles.lock().await.extend(handles);

        tracing::info!(
            executor_id = %self.executor_id,
            advertise_addr = %advertise_addr,
            api_address = %local_addr,
            "Extractor agent started"
        );

        Ok(local_addr)
    }

    /// Start the batch scheduler loop
    fn start_task_launcher(&self) -> JoinHandle<()> {
        let launcher = TaskLauncher::new(
            self.store.clone(),
            self.components.fetcher.clone(),
            self.components.invoker.clone(),
            self.event_tx.clone(),
            self.config.agent.batch_size,
        );
        tokio::spawn(launcher.run(self.runtime.cancel.clone()))
    }

    /// Start the loop draining finished tasks into ingestion
    fn start_result_reporter(&self) -> JoinHandle<()> {
        let reporter = ResultReporter::new(
            self.store.clone(),
            self.components.transport.clone(),
            self.executor_id.to_string(),
            self.config.ingestion.frame_size,
            self.config.ingestion.report_retry.clone(),
            self.event_tx.clone(),
        );
        tokio::spawn(reporter.run(self.runtime.cancel.clone()))
    }

    /// Start registration and the heartbeat stream
    fn start_coordinator_client(&self, client: CoordinatorClient) -> JoinHandle<()> {
        tokio::spawn(client.run(self.runtime.cancel.clone()))
    }

    /// Serve the debug HTTP surface on an already bound listener
    fn start_api_server(&self, listener: TcpListener) -> JoinHandle<()> {
        let agent = self.clone();
        let cancel = self.runtime.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(listener, agent, cancel).await {
                tracing::error!(error = %e, "HTTP surface failed");
            }
        })
    }
}
