//! OpenAPI documentation for the debug HTTP surface

use utoipa::OpenApi;

/// OpenAPI documentation, served at `/openapi.json`
#[derive(OpenApi)]
#[openapi(
    info(
        title = "extractor-agent debug API",
        description = "Liveness, ad hoc extraction, and event stream of an extraction executor",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    paths(
        crate::api::routes::liveness,
        crate::api::routes::extract,
        crate::api::routes::status,
        crate::api::routes::event_stream,
        crate::api::routes::openapi_spec,
    ),
    components(
        schemas(
            crate::api::routes::ExtractRequest,
            crate::api::routes::ContentPayload,
            crate::api::routes::ExtractResponse,
            crate::types::AgentStatus,
            crate::types::Content,
            crate::types::Feature,
            crate::types::FeatureType,
            crate::types::Event,
            crate::types::TaskId,
            crate::types::TaskOutcome,
            crate::types::ExtractorDescription,
            crate::error::ApiError,
            crate::error::ErrorDetail,
        )
    ),
    tags(
        (name = "extraction", description = "Single-shot extraction"),
        (name = "system", description = "Liveness, status, and events")
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let spec = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = spec["paths"].as_object().unwrap();

        for path in ["/", "/extract", "/status", "/events", "/openapi.json"] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(paths["/extract"].get("post").is_some());
    }

    #[test]
    fn spec_has_schemas() {
        let spec = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = spec["components"]["schemas"].as_object().unwrap();

        for name in ["ExtractRequest", "ExtractResponse", "AgentStatus", "Event", "ApiError"] {
            assert!(schemas.contains_key(name), "missing schema {name}");
        }
    }
}
