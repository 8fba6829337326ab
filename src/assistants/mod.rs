pub mod hub;
mod remote;
pub mod session;
pub mod thehive;
pub mod tickets;
pub mod wazuh;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::llm::LlmError;
use crate::mcp::McpError;
use crate::tickets::TicketsError;

pub use hub::AssistantHub;
pub use session::{ChatMessage, ChatSession, MessageContent, Role};
pub use thehive::TheHiveAssistant;
pub use tickets::TicketsManagerAssistant;
pub use wazuh::WazuhAssistant;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error(transparent)]
    Tickets(#[from] TicketsError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required arguments: {}", .0.join(", "))]
    MissingArguments(Vec<String>),

    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("{0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AssistantKind {
    #[serde(rename = "tickets_manager")]
    TicketsManager,
    #[serde(rename = "wazuh")]
    Wazuh,
    #[serde(rename = "thehive")]
    TheHive,
}

impl AssistantKind {
    pub const ALL: [AssistantKind; 3] = [
        AssistantKind::TicketsManager,
        AssistantKind::Wazuh,
        AssistantKind::TheHive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantKind::TicketsManager => "tickets_manager",
            AssistantKind::Wazuh => "wazuh",
            AssistantKind::TheHive => "thehive",
        }
    }
}

impl fmt::Display for AssistantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssistantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tickets_manager" | "tickets" => Ok(AssistantKind::TicketsManager),
            "wazuh" => Ok(AssistantKind::Wazuh),
            "thehive" | "the_hive" => Ok(AssistantKind::TheHive),
            other => Err(format!("Unknown assistant: {}", other)),
        }
    }
}

/// Static description of a tool an assistant can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub required_args: &'static [&'static str],
    pub optional_args: &'static [&'static str],
}

/// Name of the pseudo tool a model may pick when no tool is needed.
pub const NO_TOOL: &str = "none";

pub fn find_tool<'a>(tools: &'a [ToolDefinition], name: &str) -> Option<&'a ToolDefinition> {
    tools.iter().find(|t| t.name == name)
}

/// One `- name: description (Required args: ...)` line per tool, skipping `none`.
pub fn describe_tools(tools: &[ToolDefinition]) -> Vec<String> {
    tools
        .iter()
        .filter(|t| t.name != NO_TOOL)
        .map(|t| {
            let args = if t.required_args.is_empty() {
                "None".to_string()
            } else {
                t.required_args.join(", ")
            };
            format!("- {}: {} (Required args: {})", t.name, t.description, args)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Running,
    Stopped,
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub component: &'static str,
    pub state: ComponentState,
}

impl ComponentStatus {
    pub fn new(component: &'static str, state: ComponentState) -> Self {
        Self { component, state }
    }
}

/// The domain-specific half of an assistant. Conversation handling shared by all
/// assistants lives in [`ChatSession`].
#[async_trait]
pub trait Assistant: Send + Sync {
    fn kind(&self) -> AssistantKind;

    fn display_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn tool_definitions(&self) -> &'static [ToolDefinition];

    /// Extra system-prompt text appended after the generic tool instructions.
    fn prompt_guidance(&self) -> &'static str;

    /// Acquires databases, watchers or MCP connections. Returns a status line.
    async fn initialize(&mut self) -> Result<String, AssistantError>;

    async fn cleanup(&mut self);

    async fn handle_tool_call(
        &mut self,
        tool_name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, AssistantError>;

    async fn format_tool_response(&self, tool_name: &str, result: &Value) -> String;

    fn status(&self) -> Vec<ComponentStatus>;

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Re-reads source data. Only called when [`Assistant::supports_refresh`] is true.
    async fn refresh(&mut self) -> Result<String, AssistantError> {
        Err(refresh_unsupported(self.display_name()))
    }
}

pub(crate) fn refresh_unsupported(display_name: &str) -> AssistantError {
    AssistantError::Unsupported(format!("{} does not support refreshing data", display_name))
}

/// Cuts `text` to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
