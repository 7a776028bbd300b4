//! Route handlers for the HTTP surface
//!
//! - [`extract`] - ad hoc single-shot extraction
//! - [`system`] - liveness, status, events, OpenAPI

use crate::types::{Content, Feature};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

mod extract;
mod system;

pub use extract::*;
pub use system::*;

/// Body of `POST /extract`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExtractRequest {
    /// Extractor to run
    pub extractor_name: String,
    /// Content item to extract from
    pub content: ContentPayload,
    /// Parameters passed to the extractor
    #[serde(default)]
    #[schema(value_type = Object)]
    pub input_params: serde_json::Value,
}

/// Inline content for `POST /extract`; exactly one of `bytes` or `text`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ContentPayload {
    /// Mime type; defaults by payload kind when empty
    #[serde(default)]
    pub content_type: String,
    /// Raw payload
    #[serde(default)]
    pub bytes: Option<Vec<u8>>,
    /// Text payload, sent as UTF-8
    #[serde(default)]
    pub text: Option<String>,
}

/// Response of `POST /extract`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExtractResponse {
    /// New content items produced by the extractor
    pub content: Vec<Content>,
    /// Features of the input content
    pub features: Vec<Feature>,
}
