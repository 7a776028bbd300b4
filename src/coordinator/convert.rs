//! Conversions between wire messages and crate types

use crate::proto::coordinator::v1 as pb;
use crate::types::{ContentMetadata, ExtractorDescription, Task, TaskId};

impl From<pb::ContentMetadata> for ContentMetadata {
    fn from(metadata: pb::ContentMetadata) -> Self {
        let pb::ContentMetadata {
            id,
            parent_id,
            namespace,
            file_name,
            mime,
            labels,
            storage_url,
            source,
            size_bytes,
            created_at,
        } = metadata;

        Self {
            id,
            parent_id,
            namespace,
            file_name,
            mime,
            labels,
            storage_url,
            source,
            size_bytes,
            created_at,
        }
    }
}

impl From<pb::Task> for Task {
    fn from(task: pb::Task) -> Self {
        let input_params = parse_params(&task.id, &task.input_params);
        Self {
            id: TaskId::from(task.id),
            extractor: task.extractor,
            namespace: task.namespace,
            content_metadata: task.content_metadata.map(Into::into).unwrap_or_default(),
            input_params,
            extraction_policy: task.extraction_policy,
        }
    }
}

impl From<&ExtractorDescription> for pb::ExtractorDescription {
    fn from(description: &ExtractorDescription) -> Self {
        let input_params = if description.input_params.is_null() {
            String::new()
        } else {
            description.input_params.to_string()
        };
        Self {
            name: description.name.clone(),
            description: description.description.clone(),
            input_params,
            input_mime_types: description.input_mime_types.clone(),
        }
    }
}

/// Params arrive JSON encoded; empty means none, unparseable text is passed through as a string
fn parse_params(task_id: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Null;
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(task_id, error = %e, "Task input params are not JSON, passing them as a string");
            serde_json::Value::String(raw.to_string())
        }
    }
}
