//! In-process ingestion websocket endpoint

use extractor_agent::reporter::IngestMessage;
use extractor_agent::{TaskId, TaskOutcome};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Messages of one ingest session
#[derive(Clone, Debug)]
pub struct Session {
    pub messages: Vec<IngestMessage>,
}

impl Session {
    pub fn task_id(&self) -> Option<&TaskId> {
        match self.messages.first() {
            Some(IngestMessage::BeginExtractedContentIngest { task_id, .. }) => Some(task_id),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.messages.first() {
            Some(IngestMessage::BeginExtractedContentIngest { task_outcome, .. }) => {
                Some(*task_outcome)
            }
            _ => None,
        }
    }
}

/// Accepts every report except those for `rejected` task ids
pub struct MockIngestion;

impl MockIngestion {
    /// Start serving on a free loopback port
    pub async fn start(rejected: &[&str]) -> (String, Arc<Mutex<Vec<Session>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let rejected: Arc<HashSet<String>> =
            Arc::new(rejected.iter().map(|id| id.to_string()).collect());

        let log = sessions.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = log.clone();
                let rejected = rejected.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let mut session = Session {
                        messages: Vec::new(),
                    };

                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let message: IngestMessage = serde_json::from_str(&text).unwrap();
                        let done =
                            matches!(message, IngestMessage::FinishExtractedContentIngest { .. });
                        session.messages.push(message);
                        if done {
                            break;
                        }
                    }

                    let reply = match session.task_id() {
                        Some(id) if rejected.contains(id.as_str()) => {
                            serde_json::json!({ "Error": "task unknown to ingestion" })
                        }
                        _ => serde_json::json!({}),
                    };
                    log.lock().unwrap().push(session);
                    ws.send(Message::Text(reply.to_string())).await.ok();
                    ws.close(None).await.ok();
                });
            }
        });

        (addr, sessions)
    }
}
