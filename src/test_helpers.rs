//! Shared fixtures for unit tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{ExtractionError, FetchError, ReportError};
use crate::extraction::{BatchOutputs, ExtractionInvoker, Extractor};
use crate::fetcher::ContentFetcher;
use crate::reporter::{Acknowledgement, IngestMessage, IngestSession, IngestTransport};
use crate::task_store::TaskStore;
use crate::types::{
    CompletedTask, Content, ContentMetadata, ExtractorDescription, ExtractorInput, Feature, Output,
    Task, TaskId,
};

/// Task for `extractor` with a storage URL derived from the id
pub(crate) fn task(id: &str, extractor: &str) -> Task {
    Task {
        id: TaskId::from(id),
        extractor: extractor.to_string(),
        namespace: "default".to_string(),
        content_metadata: ContentMetadata {
            id: format!("content-{id}"),
            namespace: "default".to_string(),
            mime: "text/plain".to_string(),
            storage_url: format!("file:///tmp/{id}"),
            labels: HashMap::new(),
            ..Default::default()
        },
        input_params: serde_json::Value::Null,
        extraction_policy: "test-policy".to_string(),
    }
}

/// Wait until the store holds at least `count` finished tasks
pub(crate) async fn wait_for_outcomes(store: &TaskStore, count: usize) -> Vec<CompletedTask> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let outcomes = store.task_outcomes().await;
            if outcomes.len() >= count {
                return outcomes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for task outcomes")
}

/// Fetcher that returns the task id as payload, or fails for chosen ids
#[derive(Default)]
pub(crate) struct FakeFetcher {
    failing: HashSet<TaskId>,
}

impl FakeFetcher {
    pub(crate) fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| TaskId::from(*id)).collect(),
        }
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, task: &Task) -> Result<Vec<u8>, FetchError> {
        if self.failing.contains(&task.id) {
            return Err(FetchError::Status {
                url: task.content_metadata.storage_url.clone(),
                status: 404,
            });
        }
        Ok(task.id.as_str().as_bytes().to_vec())
    }
}

/// What [`FakeInvoker`] does with a batch
#[derive(Clone, Copy, Debug)]
pub(crate) enum InvokeBehavior {
    /// One content item echoing the payload plus a size feature per task
    Echo,
    /// Report a crashed worker
    Crash,
    /// Report an extractor error
    Fail,
}

/// Invoker recording every batch it receives
pub(crate) struct FakeInvoker {
    behavior: Mutex<InvokeBehavior>,
    calls: Mutex<Vec<(String, Vec<TaskId>)>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeInvoker {
    pub(crate) fn new(behavior: InvokeBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Batches block until a permit is added to `gate`
    pub(crate) fn gated(behavior: InvokeBehavior, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(behavior)
        }
    }

    pub(crate) fn set_behavior(&self, behavior: InvokeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Recorded batches, task ids sorted
    pub(crate) fn calls(&self) -> Vec<(String, Vec<TaskId>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionInvoker for FakeInvoker {
    async fn invoke(
        &self,
        extractor: &str,
        inputs: HashMap<TaskId, ExtractorInput>,
    ) -> Result<BatchOutputs, ExtractionError> {
        let mut ids: Vec<TaskId> = inputs.keys().cloned().collect();
        ids.sort();
        self.calls
            .lock()
            .unwrap()
            .push((extractor.to_string(), ids));

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            InvokeBehavior::Echo => Ok(inputs
                .into_iter()
                .map(|(id, input)| {
                    let size = input.data.len();
                    (
                        id,
                        vec![
                            Output::Content(Content::new(input.content_type, input.data)),
                            Output::Feature(Feature::metadata("size", size.into())),
                        ],
                    )
                })
                .collect()),
            InvokeBehavior::Crash => Err(ExtractionError::WorkerCrashed {
                extractor: extractor.to_string(),
                reason: "process pool broken".to_string(),
            }),
            InvokeBehavior::Fail => Err(ExtractionError::Failed {
                extractor: extractor.to_string(),
                reason: "ValueError".to_string(),
            }),
        }
    }

    fn extractors(&self) -> Vec<ExtractorDescription> {
        vec![ExtractorDescription {
            name: "img".to_string(),
            description: "fake image extractor".to_string(),
            ..Default::default()
        }]
    }

    async fn shutdown(&self) {}

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Ingest transport accepting every report, recording the reported task ids
#[derive(Default)]
pub(crate) struct AcceptingTransport {
    reported: Arc<Mutex<Vec<TaskId>>>,
}

impl AcceptingTransport {
    pub(crate) fn reported(&self) -> Vec<TaskId> {
        self.reported.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestTransport for AcceptingTransport {
    async fn open(&self) -> Result<Box<dyn IngestSession>, ReportError> {
        Ok(Box::new(AcceptingSession {
            task_id: None,
            reported: self.reported.clone(),
        }))
    }
}

struct AcceptingSession {
    task_id: Option<TaskId>,
    reported: Arc<Mutex<Vec<TaskId>>>,
}

#[async_trait]
impl IngestSession for AcceptingSession {
    async fn send(&mut self, message: IngestMessage) -> Result<(), ReportError> {
        if let IngestMessage::BeginExtractedContentIngest { task_id, .. } = message {
            self.task_id = Some(task_id);
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Acknowledgement, ReportError> {
        let AcceptingSession { task_id, reported } = *self;
        if let Some(task_id) = task_id {
            reported.lock().unwrap().push(task_id);
        }
        Ok(Acknowledgement::Reply(serde_json::json!({})))
    }
}

/// Upper-cases text payloads and reports their length; empty input is an error
pub(crate) struct Shout;

impl Extractor for Shout {
    fn description(&self) -> ExtractorDescription {
        ExtractorDescription {
            name: "shout".to_string(),
            description: "upper-cases text".to_string(),
            input_mime_types: vec!["text/plain".to_string()],
            ..Default::default()
        }
    }

    fn extract(&self, inputs: &[ExtractorInput]) -> Result<Vec<Vec<Output>>, String> {
        inputs
            .iter()
            .map(|input| {
                if input.data.is_empty() {
                    return Err("empty input".to_string());
                }
                let text = String::from_utf8_lossy(&input.data).to_uppercase();
                Ok(vec![
                    Output::Content(Content::new("text/plain", text.into_bytes())),
                    Output::Feature(Feature::metadata("length", input.data.len().into())),
                ])
            })
            .collect()
    }
}
