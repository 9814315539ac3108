mod common;

use common::{eventually, launch_config, spawn_fake_adapter, test_config, DuplexConnector, FakeBehavior};
use dap_bridge_core::{
    Bridge, BridgeError, ErrorKind, HandshakeConfig, SessionConfig, SessionState, ToolCallRequest,
    TransportConfig,
};
use serde_json::json;
use tokio::net::TcpListener;

async fn bridge_with(behavior: FakeBehavior) -> (Bridge, std::sync::Arc<DuplexConnector>) {
    let connector = DuplexConnector::new(behavior);
    let (bridge, _notifications) = Bridge::with_connector(test_config(), connector.clone());
    bridge.create_session(launch_config("s1")).await.unwrap();
    (bridge, connector)
}

fn call(method: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new("req-1", method, arguments)
}

#[tokio::test]
async fn test_threads_are_rendered_and_recorded() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let result = bridge
        .call_tool(call("get_threads", json!({"sessionId": "s1"})))
        .await
        .unwrap();

    assert_eq!(result.id, "req-1");
    assert!(!result.result.is_error);
    assert_eq!(result.result.joined_text(), "Threads (2):\n  [1] MainThread\n  [2] worker");

    let session = bridge.sessions().get_session("s1").await.unwrap();
    assert_eq!(session.snapshot().await.threads.len(), 2);
}

#[tokio::test]
async fn test_inspection_tools_render_adapter_bodies() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let stack = bridge
        .call_tool(call("debugger_stack_trace", json!({"sessionId": "s1", "threadId": 1})))
        .await
        .unwrap();
    assert_eq!(
        stack.result.joined_text(),
        "Stack trace (1 frames):\n  #0 [1000] main at /src/app.py:12:1"
    );

    let scopes = bridge
        .call_tool(call("scopes", json!({"sessionId": "s1", "frameId": 1000})))
        .await
        .unwrap();
    assert_eq!(scopes.result.joined_text(), "Scopes:\n  Locals (variablesReference 1001)");

    let variables = bridge
        .call_tool(call("getVariables", json!({"session_id": "s1", "variables_reference": 1001})))
        .await
        .unwrap();
    assert_eq!(variables.result.joined_text(), "Variables (1):\n  x: int = 42");

    let evaluate = bridge
        .call_tool(call("evaluate", json!({"sessionId": "s1", "expression": "1 + 1"})))
        .await
        .unwrap();
    assert_eq!(evaluate.result.joined_text(), "Result: 2 (int)");
}

#[tokio::test]
async fn test_missing_thread_is_corrected_to_last_stop() {
    let (bridge, connector) = bridge_with(FakeBehavior::default().stop_on_entry(7)).await;
    let session = bridge.sessions().get_session("s1").await.unwrap();
    let watched = session.clone();
    eventually(move || {
        let session = watched.clone();
        async move { session.state().await == SessionState::Stopped }
    })
    .await;

    let result = bridge
        .call_tool(call("continue", json!({"sessionId": "s1"})))
        .await
        .unwrap();

    assert!(!result.result.is_error);
    assert_eq!(result.result.joined_text(), "continue executed successfully");
    let sent = connector.last_handle().requests_for("continue");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["arguments"]["threadId"], 7);
    assert_eq!(session.state().await, SessionState::Running);
}

#[tokio::test]
async fn test_thread_default_needs_explicit_session() {
    let (bridge, connector) = bridge_with(FakeBehavior::default().stop_on_entry(7)).await;
    let session = bridge.sessions().get_session("s1").await.unwrap();
    eventually(move || {
        let session = session.clone();
        async move { session.state().await == SessionState::Stopped }
    })
    .await;

    let err = bridge.call_tool(call("continue", json!({}))).await.unwrap_err();

    assert_eq!(err.invalid_field(), Some("threadId"));
    assert!(connector.last_handle().requests_for("continue").is_empty());
}

#[tokio::test]
async fn test_missing_session_id_uses_most_recent_session() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let result = bridge.call_tool(call("threads", json!({}))).await.unwrap();
    assert!(result.result.joined_text().starts_with("Threads (2)"));
}

#[tokio::test]
async fn test_step_uses_protocol_command_names() {
    let (bridge, connector) = bridge_with(FakeBehavior::default()).await;

    for tool in ["step_over", "step_in", "step_out"] {
        bridge
            .call_tool(call(tool, json!({"sessionId": "s1", "threadId": 1})))
            .await
            .unwrap();
    }

    let commands = connector.last_handle().commands();
    assert_eq!(&commands[commands.len() - 3..], ["next", "stepIn", "stepOut"]);
    assert_eq!(
        connector.last_handle().requests_for("next")[0]["arguments"]["granularity"],
        "line"
    );
}

#[tokio::test]
async fn test_set_breakpoints_reports_verified_count() {
    let behavior = FakeBehavior {
        unverified_lines: vec![20],
        ..FakeBehavior::default()
    };
    let (bridge, connector) = bridge_with(behavior).await;

    let result = bridge
        .call_tool(call(
            "set_breakpoints",
            json!({
                "sessionId": "s1",
                "sourcePath": "/src/app.py",
                "breakpoints": [10, 20, {"line": 30, "condition": "x > 1"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(result.result.content.len(), 2);
    assert_eq!(result.result.content[0].text, "Set 2/3 breakpoints (verified/total)");

    let sent = connector.last_handle().requests_for("setBreakpoints");
    let arguments = &sent.last().unwrap()["arguments"];
    assert_eq!(arguments["source"]["path"], "/src/app.py");
    assert_eq!(arguments["breakpoints"][2]["condition"], "x > 1");

    let session = bridge.sessions().get_session("s1").await.unwrap();
    assert_eq!(session.snapshot().await.breakpoints["/src/app.py"].len(), 3);
}

#[tokio::test]
async fn test_adapter_failure_is_an_error_result() {
    let (bridge, _connector) =
        bridge_with(FakeBehavior::default().failing("evaluate", "name 'y' is not defined")).await;

    let result = bridge
        .call_tool(call("evaluate", json!({"sessionId": "s1", "expression": "y"})))
        .await
        .unwrap();

    assert!(result.result.is_error);
    assert_eq!(result.result.joined_text(), "name 'y' is not defined");
    assert_eq!(bridge.recovery().stats().by_kind.get(&ErrorKind::Adapter), Some(&1));
}

#[tokio::test]
async fn test_invalid_arguments_are_surfaced() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let err = bridge
        .call_tool(call("evaluate", json!({"sessionId": "s1", "expression": "  "})))
        .await
        .unwrap_err();
    assert_eq!(err.invalid_field(), Some("expression"));
}

#[tokio::test]
async fn test_unknown_tool_degrades_gracefully() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let result = bridge
        .call_tool(call("debugger_reverse_continue", json!({"sessionId": "s1"})))
        .await
        .unwrap();

    assert!(!result.result.is_error);
    assert!(result.result.joined_text().contains("not available"));
}

#[tokio::test]
async fn test_terminate_without_capability_is_not_sent() {
    let (bridge, connector) = bridge_with(FakeBehavior::default()).await;

    let result = bridge
        .call_tool(call("terminate", json!({"sessionId": "s1"})))
        .await
        .unwrap();

    assert!(!result.result.is_error);
    assert!(result.result.joined_text().contains("'terminate' is not available"));
    assert!(connector.last_handle().requests_for("terminate").is_empty());
    assert!(bridge.sessions().get_session("s1").await.is_ok());
}

#[tokio::test]
async fn test_terminate_with_capability_ends_session() {
    let behavior = FakeBehavior {
        supports_terminate: true,
        ..FakeBehavior::default()
    };
    let (bridge, connector) = bridge_with(behavior).await;

    let result = bridge
        .call_tool(call("terminate", json!({"sessionId": "s1"})))
        .await
        .unwrap();

    assert_eq!(result.result.joined_text(), "terminate executed successfully");
    assert_eq!(connector.last_handle().requests_for("terminate").len(), 1);

    let sessions = bridge.sessions().clone();
    eventually(move || {
        let sessions = sessions.clone();
        async move { sessions.session_count().await == 0 }
    })
    .await;
}

#[tokio::test]
async fn test_unknown_session_is_an_error() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let err = bridge
        .call_tool(call("get_threads", json!({"sessionId": "nope"})))
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::SessionNotFound("nope".into()));
}

#[tokio::test]
async fn test_dropped_connection_reconnects_and_retries() {
    let (bridge, connector) = bridge_with(FakeBehavior::default().hang_up_on("threads")).await;
    connector.set_behavior(FakeBehavior::default());

    let result = bridge
        .call_tool(call("get_threads", json!({"sessionId": "s1"})))
        .await
        .unwrap();

    assert!(!result.result.is_error);
    assert!(result.result.joined_text().starts_with("Threads (2)"));
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(connector.last_handle().requests_for("threads").len(), 1);

    let stats = bridge.recovery().stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_kind.get(&ErrorKind::Connection), Some(&1));
}

#[tokio::test]
async fn test_concurrent_calls_share_one_reconnect() {
    let (bridge, connector) =
        bridge_with(FakeBehavior::default().silent("threads").silent("evaluate")).await;
    connector.set_behavior(FakeBehavior::default());

    let calls = async {
        tokio::join!(
            bridge.call_tool(call("get_threads", json!({"sessionId": "s1"}))),
            bridge.call_tool(call("evaluate", json!({"sessionId": "s1", "expression": "1 + 1"})))
        )
    };
    let hang_up = async {
        let first = connector.handle(0);
        eventually(move || {
            let first = first.clone();
            async move {
                !first.requests_for("threads").is_empty() && !first.requests_for("evaluate").is_empty()
            }
        })
        .await;
        connector.handle(0).hang_up();
    };
    let ((threads, evaluate), ()) = tokio::join!(calls, hang_up);

    let threads = threads.unwrap();
    let evaluate = evaluate.unwrap();
    assert!(!threads.result.is_error);
    assert!(threads.result.joined_text().starts_with("Threads (2)"));
    assert!(!evaluate.result.is_error);
    assert_eq!(evaluate.result.joined_text(), "Result: 2 (int)");
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_timeouts_back_off_then_surface() {
    let connector = DuplexConnector::new(FakeBehavior::default().silent("evaluate"));
    let (bridge, _notifications) = Bridge::with_connector(test_config(), connector.clone());
    let mut config = launch_config("s1");
    config.request_timeout_ms = Some(50);
    bridge.create_session(config).await.unwrap();

    let err = bridge
        .call_tool(call("evaluate", json!({"sessionId": "s1", "expression": "slow()"})))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Timeout { ref command, .. } if command == "evaluate"));
    assert_eq!(connector.last_handle().requests_for("evaluate").len(), 4);
    assert_eq!(bridge.recovery().stats().by_kind.get(&ErrorKind::Timeout), Some(&4));
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_adapter_request_passes_through() {
    let (bridge, _connector) = bridge_with(FakeBehavior::default()).await;

    let response = bridge.adapter_request("s1", "threads", None).await.unwrap();
    assert!(response.success);
    assert_eq!(response.body.unwrap()["threads"][0]["name"], "MainThread");

    let result = bridge
        .call_tool(call(
            "adapter_request",
            json!({"sessionId": "s1", "command": "loadedSources", "arguments": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(result.result.joined_text(), "loadedSources executed successfully");
}

#[tokio::test]
async fn test_end_to_end_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _adapter = spawn_fake_adapter(stream, FakeBehavior::default().stop_on_entry(1));
        std::future::pending::<()>().await;
    });

    let (bridge, mut notifications) = Bridge::new(test_config());
    let config = SessionConfig::new(
        TransportConfig::tcp("127.0.0.1", port),
        HandshakeConfig {
            program: Some("/src/app.py".into()),
            stop_on_entry: true,
            ..HandshakeConfig::default()
        },
    )
    .with_session_id("tcp");
    bridge.create_session(config).await.unwrap();

    let stopped = common::expect_notification(&mut notifications, "debugger/stopped").await;
    assert_eq!(stopped.params["reason"], "entry");

    let result = bridge
        .call_tool(call("next", json!({"sessionId": "tcp", "threadId": 1})))
        .await
        .unwrap();
    assert_eq!(result.result.joined_text(), "next executed successfully");

    let step = common::expect_notification(&mut notifications, "debugger/stopped").await;
    assert_eq!(step.params["reason"], "step");

    assert!(bridge.destroy_session("tcp").await);
    bridge.shutdown().await;
    assert_eq!(bridge.sessions().session_count().await, 0);
}
