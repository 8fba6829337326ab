//! MCP stdio client integration tests
//!
//! These tests drive `McpClient` against the `mock_mcp_server` helper binary, which
//! speaks the same newline-delimited JSON-RPC as the Wazuh and TheHive MCP servers.

use serde_json::{json, Map, Value};
use std::time::Duration;
use unified_security_platform::mcp::{McpClient, McpError, McpServerCommand};

fn mock_command() -> McpServerCommand {
    McpServerCommand::new(env!("CARGO_BIN_EXE_mock_mcp_server"), "test-client")
        .with_timeout(Duration::from_secs(10))
}

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

#[cfg(test)]
mod mcp_client_tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_collects_every_tool_page() {
        let client = McpClient::connect(mock_command())
            .await
            .expect("Failed to connect to mock server");

        let names: Vec<&str> = client.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["get_wazuh_agents", "echo", "env", "multi", "fail", "slow"]
        );
        assert_eq!(client.tools()[1].description.as_deref(), Some("Echoes arguments"));
        assert!(client.tools()[0].input_schema.is_some());
        assert_eq!(
            client.server_info().and_then(|i| i.get("name")),
            Some(&json!("mock-mcp-server"))
        );
        assert!(client.pid().is_some());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_tool_results_are_flattened_to_text() {
        let client = McpClient::connect(mock_command()).await.unwrap();

        let agents = client
            .call_tool("get_wazuh_agents", args(json!({"status": "active"})))
            .await
            .unwrap();
        assert_eq!(
            agents,
            json!("Agent ID: 001\nName: web-01\nStatus: active\n\nAgent ID: 002\nName: db-01\nStatus: active")
        );

        let multi = client.call_tool("multi", Map::new()).await.unwrap();
        assert_eq!(multi, json!("first\n\nsecond"));

        let echoed = client
            .call_tool("echo", args(json!({"agent_id": "001", "limit": 5})))
            .await
            .unwrap();
        let echoed: Value = serde_json::from_str(echoed.as_str().unwrap()).unwrap();
        assert_eq!(echoed, json!({"agent_id": "001", "limit": 5}));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_results_are_still_returned_as_text() {
        let client = McpClient::connect(mock_command()).await.unwrap();
        let result = client.call_tool("fail", Map::new()).await.unwrap();
        assert_eq!(result, json!("Error: backend unavailable"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_rpc_errors_become_mcp_errors() {
        let client = McpClient::connect(mock_command()).await.unwrap();
        let err = client.call_tool("nope", Map::new()).await.unwrap_err();

        match &err {
            McpError::RpcError { code, message } => {
                assert_eq!(*code, -32602);
                assert_eq!(message, "Unknown tool: nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "MCP tool error: Unknown tool: nope");

        // The connection survives a failed call.
        assert!(client.call_tool("multi", Map::new()).await.is_ok());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_environment_is_passed_to_the_server() {
        let command = mock_command().with_envs(vec![(
            "WAZUH_API_HOST".to_string(),
            "wazuh.example.internal".to_string(),
        )]);
        let client = McpClient::connect(command).await.unwrap();

        let value = client
            .call_tool("env", args(json!({"name": "WAZUH_API_HOST"})))
            .await
            .unwrap();
        assert_eq!(value, json!("wazuh.example.internal"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_responses_time_out() {
        let command = mock_command()
            .with_envs(vec![("MOCK_SLOW_MS".to_string(), "3000".to_string())])
            .with_timeout(Duration::from_millis(300));
        let client = McpClient::connect(command).await.unwrap();

        let err = client.call_tool("slow", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(ref method) if method == "tools/call"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_server() {
        let client = McpClient::connect(mock_command()).await.unwrap();
        assert!(client.is_running());

        client.shutdown().await;

        assert!(!client.is_running());
        let err = client.call_tool("multi", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::NotRunning));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let command = McpServerCommand::new("/nonexistent/mcp-server", "test-client");
        match McpClient::connect(command).await {
            Err(McpError::SpawnError { path, .. }) => assert_eq!(path, "/nonexistent/mcp-server"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("connecting to a missing binary should fail"),
        }
    }
}
