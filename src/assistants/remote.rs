use serde_json::{Map, Value};
use tracing::info;

use super::{AssistantError, ComponentState, ComponentStatus};
use crate::mcp::{McpClient, McpServerCommand};

/// The MCP server process behind a remote assistant, started on initialize and
/// stopped on cleanup.
pub(crate) struct McpBackend {
    label: &'static str,
    command: McpServerCommand,
    client: Option<McpClient>,
}

impl McpBackend {
    pub(crate) fn new(label: &'static str, command: McpServerCommand) -> Self {
        Self {
            label,
            command,
            client: None,
        }
    }

    /// Starts the server and returns the status line shown to the user.
    pub(crate) async fn connect(&mut self) -> Result<String, AssistantError> {
        self.disconnect().await;
        let client = McpClient::connect(self.command.clone()).await?;
        let tool_count = client.tools().len();
        info!(server = self.label, tool_count, "Connected to MCP server");
        self.client = Some(client);
        Ok(format!(
            "✅ Connected to {} MCP server ({} tools available)",
            self.label, tool_count
        ))
    }

    pub(crate) async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
    }

    pub(crate) async fn call(
        &self,
        tool_name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, AssistantError> {
        let client = self
            .client
            .as_ref()
            .ok_or(AssistantError::NotInitialized("MCP client"))?;
        Ok(client.call_tool(tool_name, args).await?)
    }

    pub(crate) fn status(&self) -> ComponentStatus {
        let state = match &self.client {
            Some(client) if client.is_running() => ComponentState::Running,
            Some(_) => ComponentState::Stopped,
            None => ComponentState::NotStarted,
        };
        ComponentStatus::new("mcp_server", state)
    }
}
