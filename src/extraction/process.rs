//! Extractors run as external processes
//!
//! Each batch spawns the module command once. The request is written to
//! stdin as JSON:
//!
//! ```json
//! {"extractor": "pdf", "inputs": [{"content_type": "application/pdf", "data": [37, 80], "params": {}}]}
//! ```
//!
//! and the module answers on stdout with either one output list per input
//! or an error:
//!
//! ```json
//! {"outputs": [[{"type": "feature", "name": "pages", "value": 3}]]}
//! {"error": "encrypted document"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::traits::{BatchOutputs, ExtractionInvoker, zip_outputs};
use crate::config::{ExtractionConfig, ExtractorModuleConfig};
use crate::error::{Error, ExtractionError, Result};
use crate::types::{ExtractorDescription, ExtractorInput, Output, TaskId};

#[derive(Serialize)]
struct ModuleRequest<'a> {
    extractor: &'a str,
    inputs: &'a [ExtractorInput],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModuleResponse {
    Error { error: String },
    Outputs { outputs: Vec<Vec<Output>> },
}

struct ExtractorModule {
    command: PathBuf,
    args: Vec<String>,
    description: ExtractorDescription,
}

/// Invoker for extractor modules installed as executables
pub struct ProcessInvoker {
    modules: HashMap<String, ExtractorModule>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl ProcessInvoker {
    /// Build from the `extraction` config section
    ///
    /// Bare command names are looked up on PATH when `search_path` is set.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let mut modules = HashMap::new();
        for module in &config.modules {
            let command = resolve_command(module, config.search_path)?;
            tracing::debug!(extractor = %module.name, command = %command.display(), "Registered extractor module");
            modules.insert(
                module.name.clone(),
                ExtractorModule {
                    command,
                    args: module.args.clone(),
                    description: ExtractorDescription {
                        name: module.name.clone(),
                        description: module.description.clone(),
                        input_params: module.input_params.clone(),
                        input_mime_types: module.input_mime_types.clone(),
                    },
                },
            );
        }

        Ok(Self {
            modules,
            permits: Arc::new(Semaphore::new(config.pool_size.max(1))),
            timeout: config.extraction_timeout,
            shutdown: CancellationToken::new(),
        })
    }

    async fn run_module(
        &self,
        name: &str,
        module: &ExtractorModule,
        inputs: &[ExtractorInput],
    ) -> std::result::Result<Vec<Vec<Output>>, ExtractionError> {
        let crashed = |reason: String| ExtractionError::WorkerCrashed {
            extractor: name.to_string(),
            reason,
        };
        let failed = |reason: String| ExtractionError::Failed {
            extractor: name.to_string(),
            reason,
        };

        let payload = serde_json::to_vec(&ModuleRequest {
            extractor: name,
            inputs,
        })
        .map_err(|e| failed(format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(&module.command)
            .args(&module.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| crashed(format!("failed to spawn {}: {}", module.command.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| crashed("child stdin unavailable".to_string()))?;

        let write = async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        };

        let (write_result, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| crashed(format!("failed to wait for module: {}", e)))?;

        if let Err(e) = write_result {
            // The module may legitimately exit before reading all of stdin
            tracing::debug!(extractor = name, error = %e, "Module closed stdin early");
        }

        let Some(code) = output.status.code() else {
            return Err(crashed(format!("module terminated by signal ({})", output.status)));
        };

        match serde_json::from_slice::<ModuleResponse>(&output.stdout) {
            Ok(ModuleResponse::Error { error }) => Err(failed(error)),
            Ok(ModuleResponse::Outputs { outputs }) if code == 0 => Ok(outputs),
            _ if code != 0 => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(failed(format!("exit code {}: {}", code, stderr.trim())))
            }
            _ => Err(crashed("module produced unparseable output".to_string())),
        }
    }
}

fn resolve_command(module: &ExtractorModuleConfig, search_path: bool) -> Result<PathBuf> {
    let command = module.command.as_path();
    let is_bare = command.components().count() == 1 && !command.is_absolute();

    if is_bare && search_path {
        return which::which(command).map_err(|e| Error::Config {
            message: format!(
                "extractor {}: command {} not found on PATH: {}",
                module.name,
                command.display(),
                e
            ),
            key: Some("extraction.modules".to_string()),
        });
    }

    if !command.exists() {
        return Err(Error::Config {
            message: format!(
                "extractor {}: command {} does not exist",
                module.name,
                command.display()
            ),
            key: Some("extraction.modules".to_string()),
        });
    }
    Ok(command.to_path_buf())
}

#[async_trait]
impl ExtractionInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        extractor: &str,
        inputs: HashMap<TaskId, ExtractorInput>,
    ) -> std::result::Result<BatchOutputs, ExtractionError> {
        let module = self
            .modules
            .get(extractor)
            .ok_or_else(|| ExtractionError::UnknownExtractor {
                name: extractor.to_string(),
            })?;

        let _permit = self.permits.acquire().await.map_err(|_| ExtractionError::WorkerCrashed {
            extractor: extractor.to_string(),
            reason: "extractor pool is shut down".to_string(),
        })?;

        let (ids, inputs): (Vec<TaskId>, Vec<ExtractorInput>) = inputs.into_iter().unzip();

        let run = async {
            match self.timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.run_module(extractor, module, &inputs)).await {
                        Ok(result) => result,
                        Err(_) => Err(ExtractionError::timed_out(extractor, limit)),
                    }
                }
                None => self.run_module(extractor, module, &inputs).await,
            }
        };

        // Dropping `run` kills the child
        let outputs = tokio::select! {
            outputs = run => outputs?,
            _ = self.shutdown.cancelled() => {
                return Err(ExtractionError::WorkerCrashed {
                    extractor: extractor.to_string(),
                    reason: "extractor pool shut down mid-batch".to_string(),
                });
            }
        };

        zip_outputs(extractor, ids, outputs)
    }

    fn extractors(&self) -> Vec<ExtractorDescription> {
        let mut descriptions: Vec<_> = self.modules.values().map(|m| m.description.clone()).collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    async fn shutdown(&self) {
        self.permits.close();
        self.shutdown.cancel();
    }

    fn name(&self) -> &'static str {
        "process"
    }
}
