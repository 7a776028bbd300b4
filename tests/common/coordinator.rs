//! In-process coordinator speaking the real gRPC protocol

use async_trait::async_trait;
use extractor_agent::proto::coordinator::v1 as pb;
use extractor_agent::proto::coordinator::v1::coordinator_service_server::{
    CoordinatorService, CoordinatorServiceServer,
};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status, Streaming};

/// What the coordinator has seen
#[derive(Default)]
pub struct CoordinatorLog {
    pub registrations: Vec<pb::RegisterExecutorRequest>,
    pub heartbeats: Vec<pb::HeartbeatRequest>,
}

/// Hands `tasks` out on the first heartbeat after registration
pub struct MockCoordinator {
    log: Arc<Mutex<CoordinatorLog>>,
    tasks: Arc<Mutex<Vec<pb::Task>>>,
}

impl MockCoordinator {
    /// Start serving on a free loopback port
    pub async fn start(tasks: Vec<pb::Task>) -> (String, Arc<Mutex<CoordinatorLog>>) {
        let log = Arc::new(Mutex::new(CoordinatorLog::default()));
        let coordinator = MockCoordinator {
            log: log.clone(),
            tasks: Arc::new(Mutex::new(tasks)),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(CoordinatorServiceServer::new(coordinator))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );
        (addr, log)
    }
}

#[async_trait]
impl CoordinatorService for MockCoordinator {
    async fn register_executor(
        &self,
        request: Request<pb::RegisterExecutorRequest>,
    ) -> Result<Response<pb::RegisterExecutorResponse>, Status> {
        let request = request.into_inner();
        let executor_id = request.executor_id.clone();
        self.log.lock().unwrap().registrations.push(request);
        Ok(Response::new(pb::RegisterExecutorResponse { executor_id }))
    }

    type HeartbeatStream =
        Pin<Box<dyn Stream<Item = Result<pb::HeartbeatResponse, Status>> + Send + 'static>>;

    async fn heartbeat(
        &self,
        request: Request<Streaming<pb::HeartbeatRequest>>,
    ) -> Result<Response<Self::HeartbeatStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let log = self.log.clone();
        let tasks = self.tasks.clone();

        tokio::spawn(async move {
            while let Ok(Some(heartbeat)) = inbound.message().await {
                let executor_id = heartbeat.executor_id.clone();
                log.lock().unwrap().heartbeats.push(heartbeat);

                let tasks = std::mem::take(&mut *tasks.lock().unwrap());
                if tx
                    .send(Ok(pb::HeartbeatResponse { executor_id, tasks }))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// Task whose payload lives at `storage_url`
pub fn wire_task(id: &str, extractor: &str, storage_url: &str) -> pb::Task {
    pb::Task {
        id: id.to_string(),
        extractor: extractor.to_string(),
        namespace: "default".to_string(),
        content_metadata: Some(pb::ContentMetadata {
            id: format!("content-{id}"),
            namespace: "default".to_string(),
            mime: "text/plain".to_string(),
            storage_url: storage_url.to_string(),
            ..Default::default()
        }),
        input_params: String::new(),
        extraction_policy: "words".to_string(),
    }
}
