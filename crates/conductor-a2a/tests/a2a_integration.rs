#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_a2a::*;
use conductor_core::ConductorError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpc_result(result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": "ignored", "result": result})
}

fn sse_body(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {}\n\n", rpc_result(event.clone())));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn variant(err: &ConductorError) -> &'static str {
    match err {
        ConductorError::Transport(_) => "transport",
        ConductorError::MalformedResult(_) => "malformed",
        ConductorError::AgentFailure(_) => "agent",
        _ => "other",
    }
}

async fn register_remote(
    registry: &AgentRegistry,
    server: &MockServer,
    streaming: bool,
) -> Arc<AgentHandle> {
    let url = format!("{}/a2a", server.uri());
    let descriptor = AgentDescriptor::new("remote", &url).with_streaming(streaming);
    registry
        .register(descriptor, Arc::new(A2aClient::new("remote", &url)))
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// 1. Synchronous send
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_sync_returns_artifact_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/a2a"))
        .and(body_partial_json(json!({
            "method": "tasks/send",
            "params": {"id": "t-1", "sessionId": "s-1"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({
            "id": "t-1",
            "status": {"state": "completed"},
            "artifacts": [{"parts": [{"type": "text", "text": "Lisbon: 3 flights found"}]}]
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, false).await;
    let transport = TaskTransport::new(Duration::from_secs(5));

    let request = TaskRequest::new("t-1", "Find flights").with_session("s-1");
    let result = transport.send_sync(&handle, &request).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.agent, "remote");
    assert_eq!(result.result_text, "Lisbon: 3 flights found");
}

#[tokio::test]
async fn send_sync_failed_state_is_agent_failure_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({
            "id": "t-1",
            "status": {
                "state": "failed",
                "message": {"role": "agent", "parts": [{"type": "text", "text": "no such city"}]}
            }
        }))))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, false).await;
    let result = TaskTransport::default()
        .send_sync(&handle, &TaskRequest::new("t-1", "Find flights"))
        .await
        .unwrap();
    assert_eq!(result.status, TaskResultStatus::Failure);
    assert_eq!(result.reason.as_deref(), Some("no such city"));
}

#[tokio::test]
async fn send_sync_error_taxonomy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc-error"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "x",
            "error": {"code": -32001, "message": "Task not found"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/other-task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({
            "id": "someone-else",
            "status": {"state": "completed"}
        }))))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let transport = TaskTransport::default();
    let request = TaskRequest::new("t-1", "x");

    for (route, expected) in [
        ("/down", "transport"),
        ("/garbage", "malformed"),
        ("/rpc-error", "agent"),
        ("/other-task", "malformed"),
    ] {
        let url = format!("{}{route}", server.uri());
        let handle = registry
            .register(
                AgentDescriptor::new(route, &url),
                Arc::new(A2aClient::new(route, &url)),
            )
            .await
            .unwrap();
        let err = transport.send_sync(&handle, &request).await.unwrap_err();
        assert_eq!(variant(&err), expected, "{route}: unexpected error {err:?}");
    }
}

#[tokio::test]
async fn send_sync_times_out_as_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(rpc_result(json!({"id": "t-1", "status": {"state": "completed"}}))),
        )
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, false).await;
    let err = TaskTransport::new(Duration::from_millis(200))
        .send_sync(&handle, &TaskRequest::new("t-1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_agent_is_transport_error() {
    let registry = AgentRegistry::new();
    let handle = registry
        .register(
            AgentDescriptor::new("ghost", "http://127.0.0.1:9/a2a"),
            Arc::new(A2aClient::new("ghost", "http://127.0.0.1:9/a2a")),
        )
        .await
        .unwrap();
    let err = TaskTransport::default()
        .send_sync(&handle, &TaskRequest::new("t-1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Transport(_)));
}

// ---------------------------------------------------------------------------
// 2. Streaming subscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_yields_updates_then_one_terminal_event() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"id": "t-1", "status": {"state": "working"}, "final": false}),
        json!({"id": "t-1", "artifact": {"parts": [{"type": "text", "text": "Hello"}]}}),
        json!({"id": "t-1", "artifact": {"parts": [{"type": "text", "text": "world"}], "lastChunk": true}}),
        json!({"id": "t-1", "status": {"state": "completed"}, "final": true}),
    ]);
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tasks/sendSubscribe"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, true).await;
    let mut sub = TaskTransport::default()
        .send_streaming(&handle, &TaskRequest::new("t-1", "greet"))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = sub.next_event().await {
        assert_eq!(event.task_id, "t-1");
        assert_eq!(event.agent, "remote");
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(
        events[1].kind,
        TaskEventKind::ArtifactChunk { ref text, last_chunk: false } if text == "Hello"
    ));
    match &events[3].kind {
        TaskEventKind::Completed { result } => {
            assert!(result.is_success());
            assert_eq!(result.result_text, "Hello\nworld");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn streaming_forwards_progress_and_collects_result() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"id": "t-2", "artifact": {"parts": [{"type": "text", "text": "partial"}]}}),
        json!({"id": "t-2", "status": {"state": "completed"}, "final": true}),
    ]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, true).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let result = TaskTransport::default()
        .stream_to_result(&handle, &TaskRequest::new("t-2", "x"), Some(&tx))
        .await
        .unwrap();
    assert_eq!(result.result_text, "partial");

    drop(tx);
    let mut forwarded = 0;
    while rx.recv().await.is_some() {
        forwarded += 1;
    }
    assert_eq!(forwarded, 2);
}

#[tokio::test]
async fn streaming_without_final_status_is_malformed() {
    let server = MockServer::start().await;
    let body = sse_body(&[json!({"id": "t-3", "status": {"state": "working"}, "final": false})]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, true).await;
    let err = TaskTransport::default()
        .stream_to_result(&handle, &TaskRequest::new("t-3", "x"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::MalformedResult(_)));
}

#[tokio::test]
async fn streaming_failed_final_status_is_failure_result() {
    let server = MockServer::start().await;
    let body = sse_body(&[json!({
        "id": "t-4",
        "status": {
            "state": "failed",
            "message": {"role": "agent", "parts": [{"type": "text", "text": "quota exceeded"}]}
        },
        "final": true
    })]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, true).await;
    let sub = TaskTransport::default()
        .send_streaming(&handle, &TaskRequest::new("t-4", "x"))
        .await
        .unwrap();
    let result = sub.collect_result().await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.reason.as_deref(), Some("quota exceeded"));
}

// ---------------------------------------------------------------------------
// 3. Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_subscription_delivers_no_terminal_event() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"id": "t-5", "status": {"state": "working"}, "final": false}),
        json!({"id": "t-5", "artifact": {"parts": [{"type": "text", "text": "chunk"}]}}),
        json!({"id": "t-5", "status": {"state": "completed"}, "final": true}),
    ]);
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tasks/sendSubscribe"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tasks/cancel", "params": {"id": "t-5"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({
            "id": "t-5",
            "status": {"state": "canceled"}
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = register_remote(&registry, &server, true).await;
    let mut sub = TaskTransport::default()
        .send_streaming(&handle, &TaskRequest::new("t-5", "x"))
        .await
        .unwrap();

    let first = sub.next_event().await.unwrap();
    assert!(!first.is_terminal());

    sub.cancel();
    handle.connection().cancel("t-5").await.unwrap();

    // Let the producer run if it were still alive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sub.next_event().await.is_none());
}

// ---------------------------------------------------------------------------
// 4. Agent card discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discover_registers_agent_from_card() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DEFAULT_CARD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "job-search-agent",
            "description": "Searches job boards",
            "url": format!("{}/a2a", server.uri()),
            "version": "0.2.0",
            "capabilities": {"streaming": true},
            "skills": [{"id": "jobs", "name": "Job search", "tags": ["career"]}]
        })))
        .mount(&server)
        .await;

    let registry = AgentRegistry::new();
    let handle = registry
        .discover(&server.uri(), DEFAULT_CARD_PATH)
        .await
        .unwrap();
    assert_eq!(handle.name(), "job-search-agent");
    assert!(handle.supports_streaming());
    assert!(handle.descriptor().has_skill("career"));
    assert_eq!(handle.connection().endpoint(), format!("{}/a2a", server.uri()));
    assert!(registry.resolve("job-search-agent").await.is_ok());
}

#[tokio::test]
async fn configured_name_overrides_card_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DEFAULT_CARD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Travel Planner v2",
            "url": ""
        })))
        .mount(&server)
        .await;

    let endpoints = vec![
        AgentEndpoint {
            name: "travel-agent".into(),
            url: server.uri(),
            card_path: Some(DEFAULT_CARD_PATH.into()),
            description: None,
            skills: vec![],
            streaming: false,
        },
        AgentEndpoint {
            name: "broken-agent".into(),
            url: format!("{}/missing", server.uri()),
            card_path: Some(DEFAULT_CARD_PATH.into()),
            description: None,
            skills: vec![],
            streaming: false,
        },
    ];
    let (registry, errors) = AgentRegistry::from_config(&endpoints).await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ConductorError::Transport(_)));

    let handle = registry.resolve("travel-agent").await.unwrap();
    assert_eq!(handle.connection().endpoint(), server.uri());
    assert!(registry.resolve("broken-agent").await.is_err());
}
