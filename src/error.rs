//! Error types for extractor-agent
//!
//! This module provides the error taxonomy of the worker:
//! - Component errors (extraction, download, report, coordinator) that the
//!   owning component classifies and handles locally
//! - HTTP status code mapping for the debug HTTP surface
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::TaskId;

/// Result type alias for extractor-agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for extractor-agent
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "agent.batch_size")
        key: Option<String>,
    },

    /// Extraction routine failed
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Content download failed
    #[error("download error: {0}")]
    Fetch(#[from] FetchError),

    /// Reporting results to ingestion failed
    #[error("report error: {0}")]
    Report(#[from] ReportError),

    /// Coordinator RPC failed
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Malformed request to the debug HTTP surface
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures of an extraction invocation
///
/// The scheduler treats [`ExtractionError::WorkerCrashed`] as transient (the
/// batch's tasks go through the retry path) and every other variant as a
/// terminal failure of the batch.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The execution resource running the extractor died (process crash,
    /// panic on the worker pool, pool shut down, invocation timed out)
    #[error("extractor {extractor} worker crashed: {reason}")]
    WorkerCrashed {
        /// Extractor name
        extractor: String,
        /// What happened to the worker
        reason: String,
    },

    /// The extractor ran and reported an error
    #[error("extractor {extractor} failed: {reason}")]
    Failed {
        /// Extractor name
        extractor: String,
        /// Error reported by the routine
        reason: String,
    },

    /// No extractor registered under this name
    #[error("unknown extractor {name}")]
    UnknownExtractor {
        /// Requested name
        name: String,
    },
}

impl ExtractionError {
    /// Whether the failure came from the execution resource rather than the routine
    pub fn is_worker_crash(&self) -> bool {
        matches!(self, ExtractionError::WorkerCrashed { .. })
    }

    pub(crate) fn timed_out(extractor: &str, after: Duration) -> Self {
        ExtractionError::WorkerCrashed {
            extractor: extractor.to_string(),
            reason: format!("timed out after {}s", after.as_secs()),
        }
    }
}

/// Content download failures (always terminal for the task)
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request could not be completed
    #[error("request to {url} failed: {source}")]
    Request {
        /// Requested URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("GET {url} returned status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Local file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The storage location uses a scheme this fetcher cannot handle
    #[error("unsupported storage location {location}")]
    UnsupportedLocation {
        /// The offending location
        location: String,
    },

    /// Direct download requested but the task carries no storage URL
    #[error("task {task_id} has no storage url")]
    MissingLocation {
        /// Task id
        task_id: TaskId,
    },
}

/// Failures while reporting a finished task to ingestion
#[derive(Debug, Error)]
pub enum ReportError {
    /// Ingestion answered with an explicit error for this task
    #[error("ingestion rejected task {task_id}: {message}")]
    Rejected {
        /// Task id
        task_id: TaskId,
        /// Error message from ingestion
        message: String,
    },

    /// Websocket connection or framing error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer broke protocol (closed early, sent a non-JSON frame)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TLS connector could not be built
    #[error("tls error: {0}")]
    Tls(String),

    /// Message encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReportError {
    /// Whether ingestion explicitly rejected the report
    pub fn is_rejection(&self) -> bool {
        matches!(self, ReportError::Rejected { .. })
    }
}

/// Coordinator RPC failures
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// HTTP/2 connection error
    #[error("HTTP/2 connection error: {0}")]
    Connection(#[from] tonic::transport::Error),

    /// gRPC call error
    #[error("gRPC call error: {0}")]
    Call(#[from] tonic::Status),

    /// Coordinator address could not be parsed
    #[error("invalid coordinator address {addr}: {reason}")]
    InvalidAddress {
        /// Configured address
        addr: String,
        /// Parse error
        reason: String,
    },

    /// TLS material could not be loaded
    #[error("failed to load TLS material {path}: {source}")]
    Tls {
        /// File that failed to load
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Auth token is not a valid metadata value
    #[error("invalid auth token: {0}")]
    InvalidToken(#[from] tonic::metadata::errors::InvalidMetadataValue),

    /// Heartbeat response stream ended
    #[error("heartbeat stream closed by coordinator")]
    StreamClosed,
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "unknown_extractor",
///     "message": "extraction error: unknown extractor img",
///     "details": { "extractor": "img" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "unknown_extractor", "invalid_request")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::InvalidRequest(_) => 400,

            Error::Extraction(ExtractionError::UnknownExtractor { .. }) => 404,
            // The routine itself rejected the input
            Error::Extraction(ExtractionError::Failed { .. }) => 422,
            Error::Extraction(ExtractionError::WorkerCrashed { .. }) => 503,

            Error::Fetch(_) => 502,
            Error::Report(_) => 502,
            Error::Coordinator(_) => 502,

            Error::ShuttingDown => 503,

            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Extraction(e) => match e {
                ExtractionError::WorkerCrashed { .. } => "worker_crashed",
                ExtractionError::Failed { .. } => "extraction_failed",
                ExtractionError::UnknownExtractor { .. } => "unknown_extractor",
            },
            Error::Fetch(_) => "download_error",
            Error::Report(_) => "report_error",
            Error::Coordinator(_) => "coordinator_error",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Extraction(ExtractionError::UnknownExtractor { name }) => {
                Some(serde_json::json!({ "extractor": name }))
            }
            Error::Extraction(
                ExtractionError::Failed { extractor, .. }
                | ExtractionError::WorkerCrashed { extractor, .. },
            ) => Some(serde_json::json!({ "extractor": extractor })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
