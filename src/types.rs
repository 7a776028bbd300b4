//! Core types for extractor-agent

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Opaque task identifier assigned by the coordinator
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locator for the content a task operates on
///
/// Opaque to the scheduling core; only the [`ContentFetcher`](crate::fetcher::ContentFetcher)
/// interprets it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Content id within its namespace
    pub id: String,
    /// Id of the content this one was derived from (empty for root content)
    #[serde(default)]
    pub parent_id: String,
    /// Namespace the content belongs to
    pub namespace: String,
    /// Original file name, if any
    #[serde(default)]
    pub file_name: String,
    /// Mime type of the stored payload
    #[serde(default)]
    pub mime: String,
    /// Free-form labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Storage location (signed URL or `file://` path) used by direct downloads
    #[serde(default)]
    pub storage_url: String,
    /// Name of the extraction graph or policy that produced this content
    #[serde(default)]
    pub source: String,
    /// Payload size in bytes as recorded by ingestion
    #[serde(default)]
    pub size_bytes: u64,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created_at: i64,
}

/// One unit of extraction work assigned by the coordinator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id
    pub id: TaskId,
    /// Name of the extractor to run
    pub extractor: String,
    /// Namespace of the task
    pub namespace: String,
    /// Where to fetch the input from
    pub content_metadata: ContentMetadata,
    /// Extractor-specific parameters
    #[serde(default)]
    pub input_params: serde_json::Value,
    /// Policy that scheduled the task
    #[serde(default)]
    pub extraction_policy: String,
}

/// Terminal outcome of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TaskOutcome {
    /// Extraction produced its outputs
    Success,
    /// Download, extraction, or reporting gave up on the task
    Failed,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Success => f.write_str("success"),
            TaskOutcome::Failed => f.write_str("failed"),
        }
    }
}

/// Kind of a feature value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Dense vector
    Embedding,
    /// Structured JSON metadata
    #[default]
    Metadata,
    /// Anything else
    Unknown,
}

/// Named, typed output of extraction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Feature {
    /// Feature kind
    #[serde(default)]
    pub feature_type: FeatureType,
    /// Feature name
    pub name: String,
    /// Feature value
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

impl Feature {
    /// Metadata feature with a JSON value
    pub fn metadata(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            feature_type: FeatureType::Metadata,
            name: name.into(),
            value,
        }
    }

    /// Embedding feature
    pub fn embedding(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            feature_type: FeatureType::Embedding,
            name: name.into(),
            value: serde_json::json!(values),
        }
    }
}

/// Typed binary output of extraction
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Content {
    /// Mime type of `data`
    pub content_type: String,
    /// Raw bytes
    pub data: Vec<u8>,
    /// Features attached to this content item
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Labels attached to this content item
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Content {
    /// Content with no features or labels
    pub fn new(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
            features: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

/// A single item produced by an extractor for one task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    /// Derived content
    Content(Content),
    /// Feature of the input content
    Feature(Feature),
}

/// Input handed to an extractor for one task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractorInput {
    /// Mime type of the downloaded payload
    pub content_type: String,
    /// Downloaded payload
    pub data: Vec<u8>,
    /// Task parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Immutable record of a finished task
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedTask {
    /// Task id
    pub task_id: TaskId,
    /// Outcome tag
    pub outcome: TaskOutcome,
    /// Content items produced
    pub new_content: Vec<Content>,
    /// Features not attached to a content item
    pub features: Vec<Feature>,
}

impl CompletedTask {
    /// Failed completion with no outputs
    pub fn failed(task_id: TaskId) -> Self {
        Self {
            task_id,
            outcome: TaskOutcome::Failed,
            new_content: Vec::new(),
            features: Vec::new(),
        }
    }

    /// Successful completion, splitting outputs into content and features
    pub fn from_outputs(task_id: TaskId, outputs: Vec<Output>) -> Self {
        let mut new_content = Vec::new();
        let mut features = Vec::new();
        for output in outputs {
            match output {
                Output::Content(content) => new_content.push(content),
                Output::Feature(feature) => features.push(feature),
            }
        }
        Self {
            task_id,
            outcome: TaskOutcome::Success,
            new_content,
            features,
        }
    }
}

/// Description of an extractor advertised at registration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExtractorDescription {
    /// Extractor name used in tasks
    pub name: String,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// JSON schema (or example) of accepted input params
    #[serde(default)]
    #[schema(value_type = Object)]
    pub input_params: serde_json::Value,
    /// Mime types the extractor accepts
    #[serde(default)]
    pub input_mime_types: Vec<String>,
}

/// Snapshot of the agent served by `GET /status`
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AgentStatus {
    /// Executor id used with the coordinator
    pub executor_id: String,
    /// Address advertised to the coordinator
    pub advertise_addr: String,
    /// Pending plus running tasks
    pub pending_tasks: usize,
    /// Soft admission ceiling reported to the coordinator
    pub max_pending_tasks: usize,
    /// Extractors this agent can run
    pub extractors: Vec<String>,
    /// When the services were started, if they were
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted from the coordinator
    TaskReceived {
        /// Task id
        task_id: TaskId,
        /// Extractor name
        extractor: String,
    },

    /// Batch handed to an extractor
    BatchDispatched {
        /// Extractor name
        extractor: String,
        /// Number of tasks in the batch
        size: usize,
    },

    /// Task reached a terminal outcome
    TaskCompleted {
        /// Task id
        task_id: TaskId,
        /// Outcome
        outcome: TaskOutcome,
    },

    /// Task failed transiently and awaits redelivery
    TaskRetryScheduled {
        /// Task id
        task_id: TaskId,
        /// Retry attempt (1-based)
        attempt: u32,
    },

    /// Task outputs accepted by ingestion
    TaskReported {
        /// Task id
        task_id: TaskId,
    },

    /// Ingestion rejected a report
    ReportFailed {
        /// Task id
        task_id: TaskId,
        /// Error message returned by ingestion
        error: String,
        /// Whether the task was dropped instead of retried
        evicted: bool,
    },

    /// Executor registered with the coordinator
    Registered {
        /// Executor id
        executor_id: String,
        /// Advertised address
        addr: String,
    },

    /// Heartbeat stream broke; re-registration follows
    CoordinatorDisconnected {
        /// Error message
        error: String,
    },

    /// Agent is shutting down
    Shutdown,
}
