use super::*;
use crate::types::{Event, TaskId};
use futures::StreamExt;

#[tokio::test]
async fn test_liveness() {
    let app = create_router(create_test_agent(test_config()));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "extractor-agent");
}

#[tokio::test]
async fn test_status_reports_queue_and_extractors() {
    let agent = create_test_agent(test_config());
    agent
        .add_tasks(vec![
            crate::test_helpers::task("t1", "shout"),
            crate::test_helpers::task("t2", "shout"),
        ])
        .await
        .unwrap();
    let app = create_router(agent);

    let request = Request::builder()
        .uri("/status")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["executor_id"], "exec-test");
    assert_eq!(body["pending_tasks"], 2);
    assert_eq!(body["max_pending_tasks"], 20);
    assert_eq!(body["extractors"], serde_json::json!(["shout"]));
    // Not started: nothing advertised yet
    assert_eq!(body["advertise_addr"], "");
    assert!(body["started_at"].is_null());
}

#[tokio::test]
async fn test_openapi_spec() {
    let app = create_router(create_test_agent(test_config()));

    let request = Request::builder()
        .uri("/openapi.json")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["openapi"].as_str().unwrap().starts_with("3."));
    assert!(body["paths"]["/extract"].is_object());
}

#[tokio::test]
async fn test_sse_event_stream() {
    let agent = create_test_agent(test_config());
    let app = create_router(agent.clone());

    let request = Request::builder()
        .uri("/events")
        .header("Accept", "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(
        content_type.contains("text/event-stream"),
        "Content-Type should be text/event-stream, got: {}",
        content_type
    );

    // The handler subscribed when it ran, so this event is on the stream
    agent.emit_event(Event::TaskReported {
        task_id: TaskId::from("t1"),
    });

    let mut body = response.into_body().into_data_stream();
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut text = String::new();
        while let Some(chunk) = body.next().await {
            text.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if text.contains("\n\n") {
                return text;
            }
        }
        text
    })
    .await
    .expect("no SSE frame received");

    assert!(received.contains("event: task_reported"), "got: {received}");
    assert!(received.contains(r#""task_id":"t1""#), "got: {received}");
}

#[test]
fn test_event_names_match_serde_tags() {
    let events = vec![
        Event::TaskReceived {
            task_id: TaskId::from("t1"),
            extractor: "shout".into(),
        },
        Event::BatchDispatched {
            extractor: "shout".into(),
            size: 3,
        },
        Event::TaskCompleted {
            task_id: TaskId::from("t1"),
            outcome: crate::types::TaskOutcome::Success,
        },
        Event::TaskRetryScheduled {
            task_id: TaskId::from("t1"),
            attempt: 1,
        },
        Event::TaskReported {
            task_id: TaskId::from("t1"),
        },
        Event::ReportFailed {
            task_id: TaskId::from("t1"),
            error: "gone".into(),
            evicted: true,
        },
        Event::Registered {
            executor_id: "e".into(),
            addr: "a".into(),
        },
        Event::CoordinatorDisconnected {
            error: "reset".into(),
        },
        Event::Shutdown,
    ];

    for event in events {
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], crate::api::routes::event_name(&event));
    }
}
