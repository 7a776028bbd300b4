use super::*;
use crate::Config;
use crate::extraction::LocalInvoker;
use crate::test_helpers::{AcceptingTransport, FakeFetcher, Shout};
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

mod system;

fn test_config() -> Config {
    let mut config = Config::default();
    config.agent.executor_id = Some("exec-test".to_string());
    config.api.bind_ip = "127.0.0.1".parse().unwrap();
    config
}

/// Agent with the `shout` extractor and in-memory collaborators
fn create_test_agent(config: Config) -> ExtractorAgent {
    let invoker = LocalInvoker::new(2).with_extractor(Arc::new(Shout));
    ExtractorAgent::new(
        config,
        Arc::new(invoker),
        Arc::new(FakeFetcher::default()),
        Arc::new(AcceptingTransport::default()),
    )
    .unwrap()
}

async fn body_json(response: Response<axum::body::Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_serve_stops_on_cancel() {
    let agent = create_test_agent(test_config());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let server = tokio::spawn(serve(listener, agent, cancel.clone()));

    // The surface answers over a real socket
    let response = reqwest::get(format!("http://{address}/")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server must stop on cancel")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_cors_enabled() {
    let mut config = test_config();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(create_test_agent(config));

    let request = Request::builder()
        .uri("/")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let mut config = test_config();
    config.api.cors_origins = vec!["http://allowed.example".to_string()];
    let app = create_router(create_test_agent(config));

    let request = Request::builder()
        .uri("/")
        .header("Origin", "http://allowed.example")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://allowed.example"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let mut config = test_config();
    config.api.cors_enabled = false;
    let app = create_router(create_test_agent(config));

    let request = Request::builder()
        .uri("/")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_none()
    );
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = create_router(create_test_agent(test_config()));

    let request = Request::builder()
        .uri("/downloads")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
