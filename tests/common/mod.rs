//! Common test utilities for extractor-agent integration tests

#[allow(dead_code)]
pub mod coordinator;
#[allow(dead_code)]
pub mod ingestion;

pub use coordinator::*;
pub use ingestion::*;

use extractor_agent::{ExtractorDescription, ExtractorInput, Feature, Output, extraction::Extractor};
use std::time::Duration;

/// Counts whitespace separated words; fails on empty input
pub struct WordCount;

impl Extractor for WordCount {
    fn description(&self) -> ExtractorDescription {
        ExtractorDescription {
            name: "wordcount".into(),
            description: "counts words".into(),
            input_mime_types: vec!["text/plain".into()],
            ..Default::default()
        }
    }

    fn extract(&self, inputs: &[ExtractorInput]) -> Result<Vec<Vec<Output>>, String> {
        inputs
            .iter()
            .map(|input| {
                if input.data.is_empty() {
                    return Err("nothing to count".to_string());
                }
                let words = String::from_utf8_lossy(&input.data).split_whitespace().count();
                Ok(vec![Output::Feature(Feature::metadata("words", words.into()))])
            })
            .collect()
    }
}

/// Poll `condition` every 10ms for up to 10s
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
