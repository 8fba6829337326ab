//
// Serves the Tickets Manager queries as MCP tools over stdio so that any MCP
// client (including the platform's own Wazuh/TheHive style assistants) can
// query the ingested CSV logs.
//
// - `TicketsToolsServer` implements `rmcp::ServerHandler` through the
//   `#[tool(tool_box)]` attribute; each `#[tool(...)]` method is one tool.
// - Parameter structs derive `schemars::JsonSchema` so clients receive an input
//   schema for every tool.
// - Failures are reported as error tool results, never as protocol errors.

use rmcp::{
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars, tool, Error as McpError, ServerHandler,
};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::filter::{parse_entry_id, EntryFilter};
use super::store::TicketStore;

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct EntryFilterParams {
    #[schemars(description = "Date as DD/MM/YYYY (e.g. 29/07/2025)")]
    pub date: Option<String>,
    #[schemars(description = "Time as HH:MM or HH (e.g. 13:30 or 13)")]
    pub time: Option<String>,
    #[schemars(description = "Combined date and time as DD/MM/YYYY HH:MM")]
    pub datetime: Option<String>,
    #[schemars(description = "Internal IP address")]
    pub internal_ip: Option<String>,
    #[schemars(description = "External IP address")]
    pub external_ip: Option<String>,
    #[schemars(description = "Action type (e.g. Blocked, Allowed)")]
    pub action: Option<String>,
    #[schemars(description = "Destination URL or domain")]
    pub destination: Option<String>,
    #[schemars(description = "Policy name")]
    pub policy_identity: Option<String>,
}

impl EntryFilterParams {
    fn into_filter(self) -> EntryFilter {
        let mut args = Map::new();
        let fields = [
            ("date", self.date),
            ("time", self.time),
            ("datetime", self.datetime),
            ("internal_ip", self.internal_ip),
            ("external_ip", self.external_ip),
            ("action", self.action),
            ("destination", self.destination),
            ("policy_identity", self.policy_identity),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                args.insert(key.to_string(), Value::String(value));
            }
        }
        EntryFilter::from_args(&args)
    }
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetLineByIdParams {
    #[schemars(description = "The numeric ID of the log entry, as a number or a numeric string")]
    #[serde(default)]
    pub id: Value,
}

#[derive(Clone)]
pub struct TicketsToolsServer {
    store: Arc<TicketStore>,
}

fn error_result(context: &str, e: impl std::fmt::Display) -> CallToolResult {
    let err_msg = format!("Error {}: {}", context, e);
    tracing::error!("{}", err_msg);
    CallToolResult::error(vec![Content::text(err_msg)])
}

#[tool(tool_box)]
impl TicketsToolsServer {
    pub fn new(store: Arc<TicketStore>) -> Self {
        Self { store }
    }

    #[tool(name = "count_lines", description = "Count all log entries")]
    async fn count_lines(&self) -> Result<CallToolResult, McpError> {
        tracing::info!("Counting all log entries");

        match self.store.count_lines() {
            Ok(count) => Ok(CallToolResult::success(vec![Content::text(count.to_string())])),
            Err(e) => Ok(error_result("counting log entries", e)),
        }
    }

    #[tool(
        name = "count_entries",
        description = "Count entries by date/time or other filters. All filters are optional and combined."
    )]
    async fn count_entries(
        &self,
        #[tool(aggr)] params: EntryFilterParams,
    ) -> Result<CallToolResult, McpError> {
        let filter = params.into_filter();
        tracing::info!(?filter, "Counting filtered log entries");

        match self.store.count_entries(&filter) {
            Ok(count) => Ok(CallToolResult::success(vec![Content::text(count.to_string())])),
            Err(e) => Ok(error_result("counting log entries", e)),
        }
    }

    #[tool(
        name = "get_entries",
        description = "Get entries by date/time or other filters. Returns one JSON object per entry."
    )]
    async fn get_entries(
        &self,
        #[tool(aggr)] params: EntryFilterParams,
    ) -> Result<CallToolResult, McpError> {
        let filter = params.into_filter();
        tracing::info!(?filter, "Retrieving filtered log entries");

        let entries = match self.store.get_entries(&filter) {
            Ok(entries) => entries,
            Err(e) => return Ok(error_result("retrieving log entries", e)),
        };

        if entries.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No entries found",
            )]));
        }

        let mut content = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::to_string_pretty(entry) {
                Ok(text) => content.push(Content::text(text)),
                Err(e) => return Ok(error_result("serializing log entry", e)),
            }
        }
        tracing::info!("Returning {} log entries", content.len());
        Ok(CallToolResult::success(content))
    }

    #[tool(name = "get_line_by_id", description = "Get log entry by ID")]
    async fn get_line_by_id(
        &self,
        #[tool(aggr)] params: GetLineByIdParams,
    ) -> Result<CallToolResult, McpError> {
        let id = match parse_entry_id(&params.id) {
            Ok(id) => id,
            Err(e) => return Ok(error_result("reading log entry ID", e)),
        };
        tracing::info!(id, "Retrieving log entry by ID");

        match self.store.get_line_by_id(id) {
            Ok(Some(entry)) => match serde_json::to_string_pretty(&entry) {
                Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
                Err(e) => Ok(error_result("serializing log entry", e)),
            },
            Ok(None) => Ok(CallToolResult::success(vec![Content::text(
                "No entry found with that ID",
            )])),
            Err(e) => Ok(error_result(&format!("retrieving log entry {}", id), e)),
        }
    }
}

#[tool(tool_box)]
impl ServerHandler for TicketsToolsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This server provides tools to query security log entries ingested from CSV files.\n\
                Available tools:\n\
                - 'count_lines': Counts all log entries.\n\
                - 'count_entries': Counts entries matching optional filters \
                ('date', 'time', 'datetime', 'internal_ip', 'external_ip', 'action', 'destination', 'policy_identity').\n\
                - 'get_entries': Returns entries matching the same filters.\n\
                - 'get_line_by_id': Returns one entry by its numeric 'id'."
                    .to_string(),
            ),
        }
    }
}
