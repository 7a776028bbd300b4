//! Ad hoc extraction handler.

use super::{ContentPayload, ExtractRequest, ExtractResponse};
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::types::{ExtractorInput, Output};
use axum::{Json, extract::State, extract::rejection::JsonRejection};

const DEFAULT_BINARY_TYPE: &str = "application/octet-stream";
const DEFAULT_TEXT_TYPE: &str = "text/plain";

/// POST /extract - Run one extractor on one content item
///
/// Goes straight to the extraction invoker; the task store, batching, and
/// ingestion are not involved.
#[utoipa::path(
    post,
    path = "/extract",
    tag = "extraction",
    request_body = ExtractRequest,
    responses(
        (status = 200, description = "Extractor outputs", body = ExtractResponse),
        (status = 400, description = "Malformed request", body = crate::error::ApiError),
        (status = 404, description = "Unknown extractor", body = crate::error::ApiError),
        (status = 422, description = "Extractor rejected the input", body = crate::error::ApiError),
        (status = 503, description = "Extractor crashed or agent shutting down", body = crate::error::ApiError)
    )
)]
pub async fn extract(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>> {
    let Json(request) = payload?;

    if request.extractor_name.trim().is_empty() {
        return Err(Error::InvalidRequest("extractor_name must not be empty".into()));
    }

    let input = into_input(request.content, request.input_params)?;
    tracing::debug!(
        extractor = %request.extractor_name,
        content_type = %input.content_type,
        size = input.data.len(),
        "Ad hoc extraction"
    );

    let outputs = state
        .agent
        .extract(&request.extractor_name, input)
        .await?;

    let mut response = ExtractResponse {
        content: Vec::new(),
        features: Vec::new(),
    };
    for output in outputs {
        match output {
            Output::Content(content) => response.content.push(content),
            Output::Feature(feature) => response.features.push(feature),
        }
    }

    Ok(Json(response))
}

fn into_input(content: ContentPayload, params: serde_json::Value) -> Result<ExtractorInput> {
    let (data, default_type) = match (content.bytes, content.text) {
        (Some(bytes), None) => (bytes, DEFAULT_BINARY_TYPE),
        (None, Some(text)) => (text.into_bytes(), DEFAULT_TEXT_TYPE),
        (Some(_), Some(_)) => {
            return Err(Error::InvalidRequest(
                "content takes either bytes or text, not both".into(),
            ));
        }
        (None, None) => {
            return Err(Error::InvalidRequest("content needs bytes or text".into()));
        }
    };

    let content_type = if content.content_type.is_empty() {
        default_type.to_string()
    } else {
        content.content_type
    };

    Ok(ExtractorInput {
        content_type,
        data,
        params,
    })
}
