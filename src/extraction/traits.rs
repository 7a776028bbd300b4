//! Traits and types for extraction invocation

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::ExtractionError;
use crate::types::{ExtractorDescription, ExtractorInput, Output, TaskId};

/// Per-task outputs of one batch invocation
pub type BatchOutputs = HashMap<TaskId, Vec<Output>>;

/// An extraction routine compiled into the agent
///
/// `extract` receives the whole batch and must return one output list per
/// input, in input order. Returning `Err` marks every task of the batch as
/// failed; panicking is reported as a crashed worker.
pub trait Extractor: Send + Sync {
    /// Name, description, and accepted inputs
    fn description(&self) -> ExtractorDescription;

    /// Run the routine on a batch of inputs
    fn extract(&self, inputs: &[ExtractorInput]) -> Result<Vec<Vec<Output>>, String>;
}

/// Maps an extractor name and a batch of payloads to per-task outputs
///
/// Implementations resolve the name to a routine (compiled in, or an
/// external module) and run it away from the scheduler loop, so a crash in
/// the routine surfaces as [`ExtractionError::WorkerCrashed`] instead of
/// taking the agent down.
#[async_trait]
pub trait ExtractionInvoker: Send + Sync {
    /// Run `extractor` once over every input of the batch
    async fn invoke(
        &self,
        extractor: &str,
        inputs: HashMap<TaskId, ExtractorInput>,
    ) -> Result<BatchOutputs, ExtractionError>;

    /// Extractors this invoker can run
    fn extractors(&self) -> Vec<ExtractorDescription>;

    /// Stop accepting work and interrupt in-flight invocations
    ///
    /// Interrupted and later invocations fail with `WorkerCrashed`.
    async fn shutdown(&self);

    /// Name of this implementation
    fn name(&self) -> &'static str;
}

/// Pair routine outputs back with the task ids they were produced for
pub(crate) fn zip_outputs(
    extractor: &str,
    ids: Vec<TaskId>,
    outputs: Vec<Vec<Output>>,
) -> Result<BatchOutputs, ExtractionError> {
    if ids.len() != outputs.len() {
        return Err(ExtractionError::Failed {
            extractor: extractor.to_string(),
            reason: format!(
                "returned {} output lists for {} inputs",
                outputs.len(),
                ids.len()
            ),
        });
    }
    Ok(ids.into_iter().zip(outputs).collect())
}
