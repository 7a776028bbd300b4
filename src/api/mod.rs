//! Debug HTTP surface
//!
//! A small axum router for liveness checks, ad hoc single-shot extraction,
//! and watching the agent's event stream. It is not part of the task path:
//! tasks only arrive through the coordinator.

use crate::ExtractorAgent;
use crate::error::{Error, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the router with all route definitions
///
/// # Routes
///
/// - `GET /` - Liveness marker
/// - `POST /extract` - Run one extractor on one content item
/// - `GET /status` - Executor id, queue depth, and extractors
/// - `GET /events` - Server-sent events stream
/// - `GET /openapi.json` - OpenAPI specification
pub fn create_router(agent: ExtractorAgent) -> Router {
    let config = agent.config.clone();
    let state = AppState::new(agent);

    let router = Router::new()
        .route("/", get(routes::liveness))
        .route("/extract", post(routes::extract))
        .route("/status", get(routes::status))
        .route("/events", get(routes::event_stream))
        .route("/openapi.json", get(routes::openapi_spec))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// An empty list or `"*"` allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the router on an already bound listener until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    agent: ExtractorAgent,
    cancel: CancellationToken,
) -> Result<()> {
    let address = listener.local_addr()?;
    let app = create_router(agent);

    tracing::info!(address = %address, "HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))?;

    tracing::info!("HTTP surface stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
