//! Ingest wire messages
//!
//! Every message is a JSON object with a single key naming its kind:
//!
//! ```json
//! {"BeginExtractedContentIngest": {"task_id": "t1", "executor_id": "e1", "task_outcome": "Success"}}
//! ```
//!
//! A task report is the sequence produced by [`ingest_messages`]:
//! begin ingest, then per content item begin multipart / frames / finish
//! multipart, then one features message per loose feature, then finish
//! ingest. Ingestion answers with one JSON object; an `"Error"` key means the
//! report was rejected.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::iter;

use crate::types::{CompletedTask, Feature, TaskId, TaskOutcome};

/// Default multipart frame size (1 MiB)
pub const DEFAULT_FRAME_SIZE: usize = 1024 * 1024;

/// One message on the ingest channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IngestMessage {
    /// Opens the report of one task
    BeginExtractedContentIngest {
        /// Task being reported
        task_id: TaskId,
        /// Reporting executor
        executor_id: String,
        /// Task outcome
        task_outcome: TaskOutcome,
    },
    /// Opens one content item
    BeginMultipartContent {
        /// Index of the content item within the task
        id: u64,
    },
    /// Slice of the current content item's payload
    MultipartContentFrame {
        /// Payload slice
        bytes: Vec<u8>,
    },
    /// Closes the current content item
    FinishMultipartContent {
        /// Mime type of the payload
        content_type: String,
        /// Features attached to the content item
        features: Vec<Feature>,
        /// Labels attached to the content item
        labels: HashMap<String, String>,
    },
    /// Features of the task's input content
    ExtractedFeatures {
        /// Input content the features belong to (the task id; ingestion maps it)
        content_id: String,
        /// Feature values
        features: Vec<Feature>,
    },
    /// Closes the report
    FinishExtractedContentIngest {
        /// Number of content items sent
        num_extracted_content: u64,
    },
}

/// Split a payload into frames of at most `frame_size` bytes
///
/// An empty payload still yields a single empty frame.
pub fn split_frames(data: &[u8], frame_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![data];
    }
    data.chunks(frame_size.max(1)).collect()
}

/// Messages reporting `completed`, in send order
///
/// Failed tasks carry no outputs: only the begin and finish messages are produced.
pub fn ingest_messages<'a>(
    completed: &'a CompletedTask,
    executor_id: &'a str,
    frame_size: usize,
) -> impl Iterator<Item = IngestMessage> + 'a {
    let begin = iter::once(IngestMessage::BeginExtractedContentIngest {
        task_id: completed.task_id.clone(),
        executor_id: executor_id.to_string(),
        task_outcome: completed.outcome,
    });

    let success = completed.outcome == TaskOutcome::Success;
    let (content, features) = if success {
        (&completed.new_content[..], &completed.features[..])
    } else {
        (&[][..], &[][..])
    };

    let content_messages = content.iter().enumerate().flat_map(move |(index, item)| {
        let frames = split_frames(&item.data, frame_size)
            .into_iter()
            .map(|frame| IngestMessage::MultipartContentFrame {
                bytes: frame.to_vec(),
            });

        iter::once(IngestMessage::BeginMultipartContent { id: index as u64 })
            .chain(frames)
            .chain(iter::once(IngestMessage::FinishMultipartContent {
                content_type: item.content_type.clone(),
                features: item.features.clone(),
                labels: item.labels.clone(),
            }))
    });

    let feature_messages = features.iter().map(move |feature| IngestMessage::ExtractedFeatures {
        content_id: completed.task_id.to_string(),
        features: vec![feature.clone()],
    });

    let finish = iter::once(IngestMessage::FinishExtractedContentIngest {
        num_extracted_content: content.len() as u64,
    });

    begin.chain(content_messages).chain(feature_messages).chain(finish)
}

/// Error message carried by an ingestion acknowledgement, if any
pub fn ack_error(ack: &serde_json::Value) -> Option<String> {
    ack.get("Error").map(|error| match error {
        serde_json::Value::String(message) => message.clone(),
        other => other.to_string(),
    })
}
