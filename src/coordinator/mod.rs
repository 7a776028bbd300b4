//! Coordinator client: registration and the heartbeat stream
//!
//! The client registers the executor, then keeps a bidirectional heartbeat
//! open: an interval stream reports queue depth, and every response carries
//! newly assigned tasks that go straight into the [`TaskStore`]. Any stream
//! error starts over from registration on a fresh channel. Registration
//! itself is retried forever with a fixed delay.

mod convert;

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use crate::config::{Config, RetryConfig, TlsConfig};
use crate::error::CoordinatorError;
use crate::proto::coordinator::v1 as pb;
use crate::proto::coordinator::v1::coordinator_service_client::CoordinatorServiceClient;
use crate::retry::Backoff;
use crate::task_store::TaskStore;
use crate::types::{Event, ExtractorDescription, Task};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Client = CoordinatorServiceClient<InterceptedService<Channel, AuthInterceptor>>;

/// Adds `authorization: bearer <token>` to every call when a token is configured
#[derive(Clone)]
pub struct AuthInterceptor {
    token: Option<MetadataValue<Ascii>>,
}

impl AuthInterceptor {
    /// Create an interceptor for an optional bearer token
    pub fn new(token: Option<&str>) -> Result<Self, CoordinatorError> {
        let token = token
            .map(|token| format!("bearer {}", token).parse::<MetadataValue<Ascii>>())
            .transpose()?;
        Ok(Self { token })
    }
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.token {
            Some(_) => f.write_str("token_redacted"),
            None => f.write_str("no_token_configured"),
        }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut req: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        if let Some(ref token) = self.token {
            req.metadata_mut().insert("authorization", token.clone());
        }
        Ok(req)
    }
}

/// Who this executor is, as announced at registration
#[derive(Clone, Debug)]
pub struct ExecutorIdentity {
    /// Executor id
    pub executor_id: String,
    /// Address the coordinator can reach this executor at
    pub advertise_addr: String,
    /// Extractors this executor runs
    pub extractors: Vec<ExtractorDescription>,
}

/// Long-lived registration + heartbeat loop
pub struct CoordinatorClient {
    endpoint: Endpoint,
    auth: AuthInterceptor,
    max_message_size: usize,
    heartbeat_interval: Duration,
    register_backoff: Duration,
    max_pending_tasks: u64,
    identity: ExecutorIdentity,
    store: Arc<TaskStore>,
    event_tx: broadcast::Sender<Event>,
}

impl CoordinatorClient {
    /// Build the client; no connection is made until [`run`](Self::run) or
    /// [`register`](Self::register)
    pub fn new(
        config: &Config,
        identity: ExecutorIdentity,
        store: Arc<TaskStore>,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self, CoordinatorError> {
        let addr = &config.coordinator.addr;
        let uri = format!("{}://{}", config.http_scheme(), addr);
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| CoordinatorError::InvalidAddress {
                addr: addr.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(CONNECT_TIMEOUT);

        if let Some(tls) = &config.tls {
            endpoint = endpoint.tls_config(client_tls_config(tls)?)?;
        }

        Ok(Self {
            endpoint,
            auth: AuthInterceptor::new(config.coordinator.auth_token.as_deref())?,
            max_message_size: config.coordinator.max_message_size,
            heartbeat_interval: config.coordinator.heartbeat_interval,
            register_backoff: config.coordinator.register_backoff,
            max_pending_tasks: config.agent.max_pending_tasks() as u64,
            identity,
            store,
            event_tx,
        })
    }

    // A fresh channel per registration; the old one may be defunct.
    async fn connect(&self) -> Result<Client, CoordinatorError> {
        let channel = self.endpoint.connect().await?;
        Ok(CoordinatorServiceClient::with_interceptor(channel, self.auth.clone())
            .max_decoding_message_size(self.max_message_size)
            .max_encoding_message_size(self.max_message_size))
    }

    /// Connect and register the executor once
    pub async fn register(&self) -> Result<Client, CoordinatorError> {
        let mut client = self.connect().await?;
        let request = pb::RegisterExecutorRequest {
            executor_id: self.identity.executor_id.clone(),
            addr: self.identity.advertise_addr.clone(),
            extractors: self.identity.extractors.iter().map(Into::into).collect(),
        };
        client.register_executor(request).await?;

        tracing::info!(
            executor_id = %self.identity.executor_id,
            addr = %self.identity.advertise_addr,
            extractors = self.identity.extractors.len(),
            "Registered with coordinator"
        );
        self.event_tx
            .send(Event::Registered {
                executor_id: self.identity.executor_id.clone(),
                addr: self.identity.advertise_addr.clone(),
            })
            .ok();
        Ok(client)
    }

    async fn register_until_ok(&self) -> Client {
        let mut backoff = Backoff::new(RetryConfig::fixed(self.register_backoff));
        loop {
            match self.register().await {
                Ok(client) => return client,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Coordinator registration failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Run the heartbeat stream on a registered client until it breaks
    ///
    /// Always ends with an error; a stream closed by the coordinator is
    /// [`CoordinatorError::StreamClosed`].
    pub async fn heartbeat(&self, mut client: Client) -> CoordinatorError {
        let store = self.store.clone();
        let executor_id = self.identity.executor_id.clone();
        let max_pending_tasks = self.max_pending_tasks;

        let requests = IntervalStream::new(tokio::time::interval(self.heartbeat_interval)).then(
            move |_| {
                let store = store.clone();
                let executor_id = executor_id.clone();
                async move {
                    pb::HeartbeatRequest {
                        executor_id,
                        pending_tasks: store.num_pending_tasks().await as u64,
                        max_pending_tasks,
                    }
                }
            },
        );

        let mut responses = match client.heartbeat(requests).await {
            Ok(response) => response.into_inner(),
            Err(status) => return status.into(),
        };

        loop {
            match responses.message().await {
                Ok(Some(response)) => self.accept_tasks(response.tasks).await,
                Ok(None) => return CoordinatorError::StreamClosed,
                Err(status) => return status.into(),
            }
        }
    }

    async fn accept_tasks(&self, tasks: Vec<pb::Task>) {
        if tasks.is_empty() {
            return;
        }

        let tasks: Vec<Task> = tasks.into_iter().map(Task::from).collect();
        let extractors: std::collections::HashMap<_, _> = tasks
            .iter()
            .map(|task| (task.id.clone(), task.extractor.clone()))
            .collect();

        let added = self.store.add_tasks(tasks).await;
        tracing::debug!(
            received = extractors.len(),
            added = added.len(),
            "Tasks assigned by coordinator"
        );

        for task_id in added {
            let extractor = extractors.get(&task_id).cloned().unwrap_or_default();
            self.event_tx
                .send(Event::TaskReceived { task_id, extractor })
                .ok();
        }
    }

    /// Register and heartbeat until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let client = tokio::select! {
                _ = cancel.cancelled() => break,
                client = self.register_until_ok() => client,
            };

            let error = tokio::select! {
                _ = cancel.cancelled() => break,
                error = self.heartbeat(client) => error,
            };

            tracing::warn!(error = %error, "Heartbeat stream broke, re-registering");
            self.event_tx
                .send(Event::CoordinatorDisconnected {
                    error: error.to_string(),
                })
                .ok();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.register_backoff) => {}
            }
        }

        tracing::info!("Coordinator client stopped");
    }
}

fn client_tls_config(tls: &TlsConfig) -> Result<ClientTlsConfig, CoordinatorError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|source| CoordinatorError::Tls {
            path: path.to_path_buf(),
            source,
        })
    };

    let ca = Certificate::from_pem(read(&tls.ca_bundle)?);
    let identity = Identity::from_pem(read(&tls.cert_file)?, read(&tls.key_file)?);
    Ok(ClientTlsConfig::new().ca_certificate(ca).identity(identity))
}
