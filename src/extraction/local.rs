//! In-process extractors run on the blocking thread pool

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::traits::{BatchOutputs, ExtractionInvoker, Extractor, zip_outputs};
use crate::error::ExtractionError;
use crate::types::{ExtractorDescription, ExtractorInput, TaskId};

/// Invoker for extractors compiled into the agent
///
/// Each batch runs inside `spawn_blocking`, at most `pool_size` at a time.
/// A panicking routine is reported as a crashed worker.
///
/// # Examples
///
/// ```no_run
/// use extractor_agent::extraction::{Extractor, LocalInvoker};
/// use extractor_agent::types::{ExtractorDescription, ExtractorInput, Feature, Output};
/// use std::sync::Arc;
///
/// struct WordCount;
///
/// impl Extractor for WordCount {
///     fn description(&self) -> ExtractorDescription {
///         ExtractorDescription { name: "wordcount".into(), ..Default::default() }
///     }
///
///     fn extract(&self, inputs: &[ExtractorInput]) -> Result<Vec<Vec<Output>>, String> {
///         Ok(inputs
///             .iter()
///             .map(|input| {
///                 let words = String::from_utf8_lossy(&input.data).split_whitespace().count();
///                 vec![Output::Feature(Feature::metadata("words", words.into()))]
///             })
///             .collect())
///     }
/// }
///
/// let invoker = LocalInvoker::new(4).with_extractor(Arc::new(WordCount));
/// ```
pub struct LocalInvoker {
    extractors: HashMap<String, Arc<dyn Extractor>>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl LocalInvoker {
    /// Create an invoker running at most `pool_size` batches concurrently
    pub fn new(pool_size: usize) -> Self {
        Self {
            extractors: HashMap::new(),
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an extractor under its described name
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        let name = extractor.description().name;
        self.extractors.insert(name, extractor);
        self
    }

    /// Fail batches that run longer than `timeout`
    ///
    /// The blocking thread cannot be interrupted; it keeps its pool slot
    /// until the routine returns.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl ExtractionInvoker for LocalInvoker {
    async fn invoke(
        &self,
        extractor: &str,
        inputs: HashMap<TaskId, ExtractorInput>,
    ) -> Result<BatchOutputs, ExtractionError> {
        let routine = self
            .extractors
            .get(extractor)
            .cloned()
            .ok_or_else(|| ExtractionError::UnknownExtractor {
                name: extractor.to_string(),
            })?;

        let crashed = |reason: &str| ExtractionError::WorkerCrashed {
            extractor: extractor.to_string(),
            reason: reason.to_string(),
        };

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| crashed("extractor pool is shut down"))?;

        let (ids, inputs): (Vec<TaskId>, Vec<ExtractorInput>) = inputs.into_iter().unzip();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            routine.extract(&inputs)
        });

        let run = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, handle)
                    .await
                    .map_err(|_| ExtractionError::timed_out(extractor, limit)),
                None => Ok(handle.await),
            }
        };

        let joined = tokio::select! {
            joined = run => joined?,
            _ = self.shutdown.cancelled() => return Err(crashed("extractor pool shut down mid-batch")),
        };

        match joined {
            Ok(Ok(outputs)) => zip_outputs(extractor, ids, outputs),
            Ok(Err(reason)) => Err(ExtractionError::Failed {
                extractor: extractor.to_string(),
                reason,
            }),
            Err(e) if e.is_panic() => {
                let reason = panic_message(e.into_panic());
                tracing::error!(extractor, reason = %reason, "Extractor panicked");
                Err(ExtractionError::WorkerCrashed {
                    extractor: extractor.to_string(),
                    reason: format!("panicked: {}", reason),
                })
            }
            Err(_) => Err(crashed("worker task was cancelled")),
        }
    }

    fn extractors(&self) -> Vec<ExtractorDescription> {
        let mut descriptions: Vec<_> = self.extractors.values().map(|e| e.description()).collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    async fn shutdown(&self) {
        self.permits.close();
        self.shutdown.cancel();
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
