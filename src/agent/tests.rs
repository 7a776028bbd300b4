use super::*;
use crate::extraction::LocalInvoker;
use crate::test_helpers::{AcceptingTransport, FakeFetcher, Shout, task};
use crate::types::TaskOutcome;
use std::time::Duration;

/// Config pointing the coordinator at a closed port, HTTP surface on loopback
async fn test_config() -> Config {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut config = Config::default();
    config.agent.executor_id = Some("exec-test".to_string());
    config.agent.batch_size = 2;
    config.coordinator.addr = closed;
    config.coordinator.register_backoff = Duration::from_millis(50);
    config.api.bind_ip = "127.0.0.1".parse().unwrap();
    config
}

fn create_agent(config: Config) -> (ExtractorAgent, Arc<AcceptingTransport>) {
    let transport = Arc::new(AcceptingTransport::default());
    let agent = ExtractorAgent::new(
        config,
        Arc::new(LocalInvoker::new(2).with_extractor(Arc::new(Shout))),
        Arc::new(FakeFetcher::default()),
        transport.clone(),
    )
    .unwrap();
    (agent, transport)
}

async fn next_event(
    events: &mut broadcast::Receiver<Event>,
    matches: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_new_validates_config() {
    let mut config = test_config().await;
    config.agent.batch_size = 0;

    let result = ExtractorAgent::new(
        config,
        Arc::new(LocalInvoker::new(1)),
        Arc::new(FakeFetcher::default()),
        Arc::new(AcceptingTransport::default()),
    );

    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn test_executor_id_is_generated_when_unset() {
    let mut config = test_config().await;
    config.agent.executor_id = None;

    let (first, _) = create_agent(config.clone());
    let (second, _) = create_agent(config);

    assert!(uuid::Uuid::parse_str(first.executor_id()).is_ok());
    assert_ne!(first.executor_id(), second.executor_id());
}

#[tokio::test]
async fn test_add_tasks_ignores_known_ids() {
    let (agent, _) = create_agent(test_config().await);
    let mut events = agent.subscribe();

    let added = agent
        .add_tasks(vec![task("t1", "shout"), task("t2", "shout")])
        .await
        .unwrap();
    assert_eq!(added.len(), 2);

    let again = agent
        .add_tasks(vec![task("t1", "shout"), task("t3", "shout")])
        .await
        .unwrap();
    assert_eq!(again, vec![TaskId::from("t3")]);
    assert_eq!(agent.store().num_pending_tasks().await, 3);

    let mut received = Vec::new();
    for _ in 0..3 {
        if let Event::TaskReceived { task_id, extractor } =
            next_event(&mut events, |e| matches!(e, Event::TaskReceived { .. })).await
        {
            assert_eq!(extractor, "shout");
            received.push(task_id);
        }
    }
    received.sort();
    assert_eq!(
        received,
        vec![TaskId::from("t1"), TaskId::from("t2"), TaskId::from("t3")]
    );
}

#[tokio::test]
async fn test_extract_bypasses_store() {
    let (agent, _) = create_agent(test_config().await);

    let outputs = agent
        .extract(
            "shout",
            ExtractorInput {
                content_type: "text/plain".into(),
                data: b"abc".to_vec(),
                params: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(agent.store().num_pending_tasks().await, 0);
}

#[tokio::test]
async fn test_start_runs_tasks_through_to_ingestion() {
    let (agent, transport) = create_agent(test_config().await);
    let mut events = agent.subscribe();

    agent.start().await.unwrap();
    agent
        .add_tasks(vec![
            task("t1", "shout"),
            task("t2", "shout"),
            task("t3", "shout"),
        ])
        .await
        .unwrap();

    for _ in 0..3 {
        match next_event(&mut events, |e| matches!(e, Event::TaskCompleted { .. })).await {
            Event::TaskCompleted { outcome, .. } => assert_eq!(outcome, TaskOutcome::Success),
            other => panic!("unexpected event {other:?}"),
        }
    }
    for _ in 0..3 {
        next_event(&mut events, |e| matches!(e, Event::TaskReported { .. })).await;
    }

    let mut reported = transport.reported();
    reported.sort();
    assert_eq!(
        reported,
        vec![TaskId::from("t1"), TaskId::from("t2"), TaskId::from("t3")]
    );
    assert_eq!(agent.store().num_pending_tasks().await, 0);

    agent.shutdown().await.unwrap();
    next_event(&mut events, |e| matches!(e, Event::Shutdown)).await;
}

#[tokio::test]
async fn test_status_after_start() {
    let mut config = test_config().await;
    config.agent.advertise_addr = Some("10.1.2.3:9000".to_string());
    let (agent, _) = create_agent(config);

    let before = agent.status().await;
    assert_eq!(before.advertise_addr, "");
    assert!(before.started_at.is_none());

    let bound = agent.start().await.unwrap();
    assert_ne!(bound.port(), 0);

    let status = agent.status().await;
    assert_eq!(status.executor_id, "exec-test");
    assert_eq!(status.advertise_addr, "10.1.2.3:9000");
    assert_eq!(status.max_pending_tasks, 4);
    assert_eq!(status.extractors, vec!["shout".to_string()]);
    assert!(status.started_at.is_some());

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_detected_advertise_addr_uses_bound_port() {
    let (agent, _) = create_agent(test_config().await);

    let bound = agent.start().await.unwrap();
    let advertised: std::net::SocketAddr = agent.status().await.advertise_addr.parse().unwrap();
    assert_eq!(advertised.port(), bound.port());

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (agent, _) = create_agent(test_config().await);

    agent.start().await.unwrap();
    assert!(matches!(agent.start().await, Err(Error::Other(_))));

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_services_and_refuses_work() {
    let (agent, _) = create_agent(test_config().await);
    let address = agent.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), agent.shutdown())
        .await
        .expect("shutdown must finish well within its timeout")
        .unwrap();

    assert!(agent.is_shutting_down());
    assert!(agent.runtime.handles.lock().await.is_empty());
    assert!(matches!(agent.start().await, Err(Error::ShuttingDown)));
    assert!(matches!(
        agent.add_tasks(vec![task("t1", "shout")]).await,
        Err(Error::ShuttingDown)
    ));

    // HTTP surface is gone
    assert!(tokio::net::TcpStream::connect(address).await.is_err());

    // Second shutdown is harmless
    agent.shutdown().await.unwrap();
}
