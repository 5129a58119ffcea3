//! Connection task behavior against a scripted broker
//!
//! Covers the connect sequence, health events, message forwarding order,
//! cleanup and disconnect handling.

mod test_helpers;

use std::sync::Arc;
use std::time::Duration;
use test_helpers::{build_task, wait_for_state, WAIT};
use zenamqp::event::{ChannelEventSink, Severity, STATUS_AMQP};
use zenamqp::task::{ConnectStage, ConnectionTask, TaskError, TaskState};
use zenamqp::testing::mocks::{test_target, BrokerCall, MockConnector, ScriptedDelivery};
use zenamqp::transport::{ConsumeOptions, QueueOptions, RawMessage};

fn zenoss(body: &str) -> RawMessage {
    RawMessage::with_content_type("application/x-zenoss", body.to_string())
}

#[tokio::test]
async fn test_authentication_failure_reports_and_closes() {
    let connector = MockConnector::new().fail_at(ConnectStage::Authenticate);
    let calls = connector.call_log();
    let (task, sink) = build_task(connector);

    let err = task.run().await.unwrap_err();

    assert!(matches!(
        err,
        TaskError::Connection {
            stage: ConnectStage::Authenticate,
            ..
        }
    ));
    assert_eq!(task.state(), TaskState::Failed);

    let events = sink.events();
    assert_eq!(events.len(), 1, "exactly one health event expected");
    assert_eq!(events[0].severity, Severity::Error);
    assert_eq!(events[0].event_class.as_deref(), Some(STATUS_AMQP));
    assert!(events[0]
        .summary
        .starts_with("Unable to connect to amqp queue events on broker01"));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.last(), Some(&BrokerCall::CloseConnection));
    assert!(!calls
        .iter()
        .any(|call| matches!(call, BrokerCall::OpenChannel(_))));
}

#[tokio::test]
async fn test_connect_failure_never_authenticates() {
    let connector = MockConnector::new().fail_at(ConnectStage::Connect);
    let calls = connector.call_log();
    let (task, sink) = build_task(connector);

    task.run().await.unwrap_err();

    assert_eq!(
        calls.lock().unwrap().clone(),
        vec![BrokerCall::Connect {
            host: "127.0.0.1".to_string(),
            port: 5672,
        }]
    );
    assert_eq!(sink.health_events().len(), 1);
    assert!(sink.message_events().is_empty());
}

#[tokio::test]
async fn test_healthy_session_forwards_messages_in_order() {
    let connector = MockConnector::new().with_messages(vec![
        zenoss(r#"{"summary":"first","severity":2}"#),
        RawMessage::with_content_type("text/plain", "second"),
        zenoss(r#"{"summary":"third","severity":9}"#),
    ]);
    let (task, sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });

    let events = sink.wait_for_events(4, WAIT).await;
    assert_eq!(events.len(), 4);

    assert_eq!(events[0].severity, Severity::Clear);
    assert_eq!(events[0].summary, "Successfully connected to AMQP queue events");
    assert_eq!(events[0].event_class.as_deref(), Some(STATUS_AMQP));

    let summaries: Vec<&str> = events[1..].iter().map(|e| e.summary.as_str()).collect();
    assert_eq!(summaries, vec!["first", "second", "third"]);
    assert_eq!(events[1].severity, Severity::Info);
    assert_eq!(events[3].severity, Severity::Critical);
    assert_eq!(task.state(), TaskState::Running);

    task.cleanup();
    runner.await.unwrap().unwrap();
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[tokio::test]
async fn test_connect_sequence_and_cleanup_order() {
    let connector = MockConnector::new();
    let calls = connector.call_log();
    let (task, _sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    wait_for_state(&task, TaskState::Running).await;

    task.cleanup();
    runner.await.unwrap().unwrap();

    assert_eq!(
        calls.lock().unwrap().clone(),
        vec![
            BrokerCall::Connect {
                host: "127.0.0.1".to_string(),
                port: 5672,
            },
            BrokerCall::Authenticate {
                username: "guest".to_string(),
            },
            BrokerCall::OpenChannel(1),
            BrokerCall::DeclareQueue {
                queue: "events".to_string(),
                options: QueueOptions::durable(),
            },
            BrokerCall::Consume {
                queue: "events".to_string(),
                consumer_tag: "zenoss".to_string(),
                options: ConsumeOptions::no_ack(),
            },
            BrokerCall::Queue("zenoss".to_string()),
            BrokerCall::CancelConsumer("zenoss".to_string()),
            BrokerCall::CloseChannel,
            BrokerCall::CloseConnection,
        ]
    );
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let connector = MockConnector::new();
    let calls = connector.call_log();
    let (task, sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    wait_for_state(&task, TaskState::Running).await;

    task.cleanup();
    task.cleanup();
    runner.await.unwrap().unwrap();
    task.cleanup();

    let closes = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| **call == BrokerCall::CloseConnection)
        .count();
    assert_eq!(closes, 1);
    // Cancellation is not a connectivity change
    assert_eq!(sink.health_events().len(), 1);
}

#[tokio::test]
async fn test_run_after_cleanup_ends_immediately() {
    let (task, sink) = build_task(MockConnector::new());

    task.cleanup();
    task.run().await.unwrap();
    task.run().await.unwrap();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_cleanup_while_sink_is_full_stops_consumer() {
    let connector = MockConnector::new().with_messages(vec![
        zenoss(r#"{"summary":"first"}"#),
        zenoss(r#"{"summary":"second"}"#),
    ]);
    let calls = connector.call_log();
    // Room for the connected event only; nothing drains the receiver
    let (sink, mut receiver) = ChannelEventSink::channel(1);
    let task = Arc::new(ConnectionTask::new(
        test_target(),
        Arc::new(connector),
        Arc::new(sink),
    ));

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    wait_for_state(&task, TaskState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    task.cleanup();
    tokio::time::timeout(WAIT, runner)
        .await
        .expect("run should return while the sink is blocked")
        .unwrap()
        .unwrap();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(
        calls.lock().unwrap().last(),
        Some(&BrokerCall::CloseConnection)
    );
    let connected = receiver.try_recv().unwrap();
    assert!(connected.is_health_event());
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_reports_lost_connection() {
    let connector =
        MockConnector::new().with_messages(vec![zenoss(r#"{"summary":"before drop"}"#)]);
    let feed = connector.feed();
    let calls = connector.call_log();
    let (task, sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    sink.wait_for_events(2, WAIT).await;

    feed.send(ScriptedDelivery::Disconnect("connection reset by peer".to_string()))
        .unwrap();

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, TaskError::Disconnected(_)));
    assert_eq!(task.state(), TaskState::Failed);

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].summary, "before drop");

    let lost = &events[2];
    assert_eq!(lost.severity, Severity::Error);
    assert_eq!(lost.event_class.as_deref(), Some(STATUS_AMQP));
    assert!(lost
        .summary
        .starts_with("Lost connection to amqp queue events on broker01"));
    assert!(lost.summary.contains("connection reset by peer"));

    assert_eq!(
        calls.lock().unwrap().last(),
        Some(&BrokerCall::CloseConnection)
    );
}

#[tokio::test]
async fn test_malformed_message_is_degraded_and_loop_continues() {
    let connector = MockConnector::new().with_messages(vec![
        zenoss("{not json"),
        zenoss(r#"{"severity":42}"#),
        zenoss(r#"{"summary":"still consuming"}"#),
    ]);
    let (task, sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });

    let events = sink.wait_for_events(4, WAIT).await;
    task.cleanup();
    runner.await.unwrap().unwrap();

    assert_eq!(events.len(), 4);
    for degraded in &events[1..3] {
        assert_eq!(degraded.severity, Severity::Warning);
        assert!(degraded
            .summary
            .starts_with("Unable to decode AMQP message from queue events"));
        assert_eq!(
            degraded.extra.get("decodeError"),
            Some(&serde_json::Value::Bool(true))
        );
    }
    assert_eq!(events[3].summary, "still consuming");
}

#[tokio::test]
async fn test_cleanup_while_connecting_cancels_attempt() {
    let connector = MockConnector::new().hang_at(ConnectStage::Connect);
    let calls = connector.call_log();
    let (task, sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    wait_for_state(&task, TaskState::Connecting).await;

    task.cleanup();
    tokio::time::timeout(WAIT, runner)
        .await
        .expect("run should return after cleanup")
        .unwrap()
        .unwrap();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(sink.events().is_empty());
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_during_setup_closes_open_connection() {
    let connector = MockConnector::new().hang_at(ConnectStage::DeclareQueue);
    let calls = connector.call_log();
    let (task, sink) = build_task(connector);

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    tokio::time::timeout(WAIT, async {
        while !calls
            .lock()
            .unwrap()
            .iter()
            .any(|call| matches!(call, BrokerCall::DeclareQueue { .. }))
        {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task should reach queue declaration");

    task.cleanup();
    runner.await.unwrap().unwrap();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(sink.events().is_empty());
    assert_eq!(
        calls.lock().unwrap().last(),
        Some(&BrokerCall::CloseConnection)
    );
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let (task, _sink) = build_task(MockConnector::new());

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    wait_for_state(&task, TaskState::Running).await;

    let err = task.run().await.unwrap_err();
    assert!(matches!(err, TaskError::AlreadyRunning(ref name) if name == "broker01"));
    assert_eq!(task.state(), TaskState::Running);

    task.cleanup();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_queue_declare_failure_names_stage() {
    let (task, sink) = build_task(MockConnector::new().fail_at(ConnectStage::DeclareQueue));

    let err = task.run().await.unwrap_err();

    assert_eq!(err.stage(), Some(ConnectStage::DeclareQueue));
    assert!(sink.events()[0].summary.contains("queue declare"));
}

#[tokio::test]
async fn test_custom_agent_and_consumer_tag() {
    let connector = MockConnector::new().with_messages(vec![zenoss(r#"{"summary":"x"}"#)]);
    let calls = connector.call_log();
    let sink = Arc::new(zenamqp::testing::mocks::RecordingSink::new());
    let task = Arc::new(
        zenamqp::task::ConnectionTask::new(
            zenamqp::testing::mocks::test_target(),
            Arc::new(connector),
            sink.clone(),
        )
        .with_agent("collector-7")
        .with_consumer_tag("monitor"),
    );

    let runner = tokio::spawn({
        let task = task.clone();
        async move { task.run().await }
    });
    let events = sink.wait_for_events(2, WAIT).await;
    task.cleanup();
    runner.await.unwrap().unwrap();

    assert!(events.iter().all(|event| event.agent == "collector-7"));
    assert!(calls
        .lock()
        .unwrap()
        .contains(&BrokerCall::CancelConsumer("monitor".to_string())));
}
