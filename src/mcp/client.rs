use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::error::McpError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// How to launch an MCP server and identify ourselves to it.
#[derive(Debug, Clone)]
pub struct McpServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub client_name: String,
    pub client_version: String,
    pub request_timeout: Duration,
}

impl McpServerCommand {
    pub fn new(program: impl Into<PathBuf>, client_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            client_name: client_name.into(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_envs(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// A JSON-RPC client for one MCP server child process speaking newline-delimited
/// JSON over stdio.
pub struct McpClient {
    client_name: String,
    child: Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    tools: Vec<ToolInfo>,
    server_info: Option<Value>,
    reader_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
}

impl McpClient {
    /// Spawns the server, performs the `initialize` handshake and fetches the tool list.
    pub async fn connect(command: McpServerCommand) -> Result<Self, McpError> {
        let client_name = command.client_name.clone();
        info!(client = %client_name, path = %command.program.display(), "Starting MCP server");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::SpawnError {
                path: command.program.display().to_string(),
                source,
            })?;

        info!(client = %client_name, pid = ?child.id(), "MCP server started");

        let stdin = child.stdin.take().ok_or(McpError::NotRunning)?;
        let stdout = child.stdout.take().ok_or(McpError::NotRunning)?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(read_messages(
            client_name.clone(),
            stdout,
            Arc::clone(&pending),
        ));
        let stderr_task = stderr.map(|s| tokio::spawn(forward_stderr(client_name.clone(), s)));

        let mut client = Self {
            client_name,
            child: Mutex::new(Some(child)),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(0),
            request_timeout: command.request_timeout,
            tools: Vec::new(),
            server_info: None,
            reader_task,
            stderr_task,
        };

        match client.handshake(&command.client_version).await {
            Ok(()) => {
                info!(
                    client = %client.client_name,
                    tools = client.tools.len(),
                    "MCP initialization successful"
                );
                Ok(client)
            }
            Err(e) => {
                error!(client = %client.client_name, "MCP initialization failed: {}", e);
                client.shutdown().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, client_version: &str) -> Result<(), McpError> {
        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"sampling": {}, "roots": {"listChanged": true}},
            "clientInfo": {"name": self.client_name, "version": client_version}
        });

        let init_result = self
            .request("initialize", init_params)
            .await
            .map_err(|e| McpError::InitializationError(e.to_string()))?;
        self.server_info = init_result.get("serverInfo").cloned();
        debug!(client = %self.client_name, server_info = ?self.server_info, "Server initialized");

        self.notify("notifications/initialized").await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let mut listed = self
                .request("tools/list", params)
                .await
                .map_err(|e| McpError::InitializationError(e.to_string()))?;

            let page: Vec<ToolInfo> =
                serde_json::from_value(listed.get_mut("tools").map(Value::take).unwrap_or_default())
                    .unwrap_or_default();
            tools.extend(page);

            cursor = listed
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        debug!(client = %self.client_name, "Found {} tools", tools.len());
        self.tools = tools;
        Ok(())
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.child).as_ref().and_then(Child::id)
    }

    pub fn is_running(&self) -> bool {
        match lock(&self.child).as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Sends a request and waits for the matching response. Returns the `result` member.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = self.send(&message).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(McpError::ConnectionClosed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                warn!(client = %self.client_name, id, method, "Timeout waiting for MCP response");
                return Err(McpError::Timeout(method.to_string()));
            }
        };

        into_result(response)
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        self.send(&json!({"jsonrpc": "2.0", "method": method}))
            .await
    }

    async fn send(&self, message: &Value) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)?;
        debug!(client = %self.client_name, "SENDING: {}", line);
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::NotRunning)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Calls `tools/call` and flattens the returned content items.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, McpError> {
        info!(client = %self.client_name, tool = name, ?arguments, "Calling MCP tool");

        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": Value::Object(arguments) }),
            )
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            warn!(client = %self.client_name, tool = name, "MCP tool reported an error result");
        }

        Ok(flatten_tool_result(result))
    }

    /// Closes stdin so the server can exit on its own, then kills it after a grace period.
    pub async fn shutdown(&self) {
        info!(client = %self.client_name, "Cleaning up MCP connection");
        self.stdin.lock().await.take();

        let child = lock(&self.child).take();
        let Some(mut child) = child else {
            return;
        };

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(client = %self.client_name, %status, "MCP server terminated gracefully")
            }
            Ok(Err(e)) => warn!(client = %self.client_name, "Error during cleanup: {}", e),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(client = %self.client_name, "Failed to kill MCP server: {}", e);
                } else {
                    info!(client = %self.client_name, "MCP server killed forcefully");
                }
            }
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn into_result(response: Value) -> Result<Value, McpError> {
    let Value::Object(mut response) = response else {
        return Err(McpError::InvalidResponse(
            "response is not an object".to_string(),
        ));
    };

    if let Some(error) = response.remove("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown MCP error")
            .to_string();
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        return Err(McpError::RpcError { code, message });
    }

    response
        .remove("result")
        .ok_or_else(|| McpError::InvalidResponse("missing result".to_string()))
}

/// Joins the `content` items of a tool result into a single text value.
///
/// Items contribute their `text`, a nested `raw.text`, the string itself, or their
/// JSON rendering, separated by blank lines. An empty `content` array is returned
/// as-is and a result without `content` is returned unchanged.
pub fn flatten_tool_result(result: Value) -> Value {
    let content = match result {
        Value::Object(mut map) if map.contains_key("content") => map.remove("content"),
        other => return other,
    };

    match content {
        Some(Value::Array(items)) if !items.is_empty() => {
            let texts: Vec<String> = items.iter().map(content_item_text).collect();
            Value::String(texts.join("\n\n"))
        }
        Some(other) => other,
        None => Value::Null,
    }
}

fn content_item_text(item: &Value) -> String {
    if let Some(text) = item.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Some(text) = item
        .get("raw")
        .and_then(|raw| raw.get("text"))
        .and_then(Value::as_str)
    {
        return text.to_string();
    }
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn read_messages(client_name: String, stdout: ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(client = %client_name, "RECEIVED: {}", line);
                match serde_json::from_str::<Value>(line) {
                    Ok(message) => dispatch(&client_name, message, &pending),
                    Err(e) => warn!(
                        client = %client_name,
                        "JSON decode error: {}, line: {}", e, line
                    ),
                }
            }
            Ok(None) => {
                info!(client = %client_name, "MCP server closed its stdout");
                break;
            }
            Err(e) => {
                error!(client = %client_name, "Error reading from MCP server: {}", e);
                break;
            }
        }
    }
    // Dropping the senders wakes every waiter with ConnectionClosed.
    lock(&pending).clear();
}

fn dispatch(client_name: &str, message: Value, pending: &PendingMap) {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let id = message.get("id").and_then(Value::as_u64);

    match (method, id) {
        (None, Some(id)) => match lock(pending).remove(&id) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => warn!(client = %client_name, id, "Response for unknown request id"),
        },
        (None, None) => warn!(client = %client_name, "Message without id or method: {}", message),
        (Some(method), Some(_)) => {
            debug!(client = %client_name, %method, "Ignoring server-initiated request")
        }
        (Some(method), None) => debug!(client = %client_name, %method, "Received notification"),
    }
}

async fn forward_stderr(client_name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "mcp_server", client = %client_name, "SERVER: {}", line.trim());
    }
}
