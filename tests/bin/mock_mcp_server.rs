//! Minimal MCP server speaking newline-delimited JSON-RPC on stdio, used by the
//! integration tests in place of the Wazuh and TheHive MCP servers.
//!
//! Tools:
//! - `get_wazuh_agents`: two agents as text, echoing the `status` argument
//! - `echo`: returns its arguments as JSON text
//! - `env`: returns the value of the environment variable named by `name`
//! - `multi`: two text content items
//! - `fail`: an `isError` result
//! - `slow`: answers after `MOCK_SLOW_MS` milliseconds (default 3000)
//!
//! Any other tool name yields a JSON-RPC error.

use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

fn text(content: impl Into<String>) -> Value {
    json!({ "type": "text", "text": content.into() })
}

fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": { "type": "object", "properties": {} }
    })
}

fn list_tools(params: &Value) -> Value {
    // Two pages so clients have to follow `nextCursor`.
    match params.get("cursor").and_then(Value::as_str) {
        None => json!({
            "tools": [
                tool("get_wazuh_agents", "Lists agents"),
                tool("echo", "Echoes arguments"),
                tool("env", "Reads an environment variable"),
            ],
            "nextCursor": "page-2"
        }),
        Some(_) => json!({
            "tools": [
                tool("multi", "Two content items"),
                tool("fail", "Always fails"),
                tool("slow", "Answers slowly"),
            ]
        }),
    }
}

fn call_tool(params: &Value) -> Result<Value, (i64, String)> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let result = match name {
        "get_wazuh_agents" => {
            let status = args.get("status").and_then(Value::as_str).unwrap_or("any");
            json!({
                "content": [
                    text(format!("Agent ID: 001\nName: web-01\nStatus: {}", status)),
                    text(format!("Agent ID: 002\nName: db-01\nStatus: {}", status)),
                ],
                "isError": false
            })
        }
        "echo" => json!({ "content": [text(args.to_string())], "isError": false }),
        "env" => {
            let var = args.get("name").and_then(Value::as_str).unwrap_or_default();
            let value = env::var(var).unwrap_or_else(|_| "<unset>".to_string());
            json!({ "content": [text(value)], "isError": false })
        }
        "multi" => json!({
            "content": [text("first"), { "raw": { "text": "second" } }],
            "isError": false
        }),
        "fail" => json!({ "content": [text("Error: backend unavailable")], "isError": true }),
        "slow" => {
            let delay = env::var("MOCK_SLOW_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000);
            thread::sleep(Duration::from_millis(delay));
            json!({ "content": [text("finally")], "isError": false })
        }
        other => return Err((-32602, format!("Unknown tool: {}", other))),
    };
    Ok(result)
}

fn main() {
    eprintln!("mock MCP server starting");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("invalid JSON from client: {}", e);
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let Some(id) = request.get("id").cloned() else {
            // Notifications need no answer.
            continue;
        };
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        let outcome = match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "mock-mcp-server", "version": "0.0.1" }
            })),
            "tools/list" => Ok(list_tools(&params)),
            "tools/call" => {
                // Unsolicited notification first; clients must skip it.
                let log = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": { "level": "info", "data": "calling tool" }
                });
                let _ = writeln!(stdout, "{}", log);
                call_tool(&params)
            }
            other => Err((-32601, format!("Method not found: {}", other))),
        };

        let response = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message }
            }),
        };
        if writeln!(stdout, "{}", response).is_err() || stdout.flush().is_err() {
            break;
        }
    }

    eprintln!("mock MCP server exiting");
}
