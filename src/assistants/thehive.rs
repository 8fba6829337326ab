use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use super::remote::McpBackend;
use super::{Assistant, AssistantError, AssistantKind, ComponentStatus, ToolDefinition};
use crate::config::{McpConfig, TheHiveConfig};
use crate::llm::LanguageModel;
use crate::mcp::McpServerCommand;

/// Arguments holding TheHive object ids, which the API expects as `~<number>`.
const ID_ARGUMENTS: [&str; 5] = ["id", "case_id", "alert_id", "observable_id", "task_id"];

pub const TOOLS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "get_thehive_cases",
        description: "Retrieves a list of cases from TheHive. Returns formatted case information including ID, title, severity, and status.",
        required_args: &[],
        optional_args: &["limit"],
    },
    ToolDefinition {
        name: "promote_alert_to_case",
        description: "Promotes a TheHive alert to a case. Returns the newly created case information.",
        required_args: &["alert_id"],
        optional_args: &[],
    },
    ToolDefinition {
        name: "get_thehive_alerts",
        description: "Retrieves a list of alerts from TheHive. Returns formatted alert information including ID, title, severity, and status.",
        required_args: &[],
        optional_args: &["limit"],
    },
    ToolDefinition {
        name: "get_thehive_case_by_id",
        description: "Retrieves a specific case from TheHive by its ID. Returns detailed case information.",
        required_args: &["case_id"],
        optional_args: &[],
    },
    ToolDefinition {
        name: "create_thehive_case",
        description: "Creates a new case in TheHive. Returns the newly created case information.",
        required_args: &["description", "title"],
        optional_args: &[
            "assignee",
            "case_template",
            "pap",
            "severity",
            "start_date",
            "status",
            "tags",
            "tlp",
        ],
    },
    ToolDefinition {
        name: "get_thehive_alert_by_id",
        description: "Retrieves a specific alert from TheHive by its ID. Returns detailed alert information.",
        required_args: &["alert_id"],
        optional_args: &[],
    },
];

const GUIDANCE: &str = r#"You are specialized in TheHive case management. When users ask about:
- Cases: use get_thehive_cases, get_thehive_case_by_id, create_thehive_case
- Alerts: use get_thehive_alerts, get_thehive_alert_by_id
- Escalation: use promote_alert_to_case

IMPORTANT: TheHive IDs must be prefixed with tilde (~). The system handles this automatically.
Provide actionable insights for incident response teams."#;

/// Manages TheHive cases and alerts through the TheHive MCP server.
pub struct TheHiveAssistant {
    backend: McpBackend,
    model: Arc<dyn LanguageModel>,
}

impl TheHiveAssistant {
    pub fn new(thehive: &TheHiveConfig, mcp: &McpConfig, model: Arc<dyn LanguageModel>) -> Self {
        let mut envs = thehive.server_env();
        envs.push(("RUST_LOG".to_string(), mcp.rust_log.clone()));
        let command = McpServerCommand::new(&mcp.thehive_server_path, "thehive-assistant")
            .with_envs(envs)
            .with_timeout(mcp.request_timeout);
        Self::with_command(command, model)
    }

    pub fn with_command(command: McpServerCommand, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            backend: McpBackend::new("TheHive", command),
            model,
        }
    }
}

fn tilde_id(value: &Value) -> Value {
    let id = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if id.starts_with('~') {
        Value::String(id)
    } else {
        Value::String(format!("~{}", id))
    }
}

pub fn prefix_ids(args: &mut Map<String, Value>) {
    for key in ID_ARGUMENTS {
        if let Some(value) = args.get_mut(key) {
            *value = tilde_id(value);
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[async_trait]
impl Assistant for TheHiveAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::TheHive
    }

    fn display_name(&self) -> &'static str {
        "🕵️ TheHive Assistant"
    }

    fn description(&self) -> &'static str {
        "Manage security cases and incidents through TheHive platform"
    }

    fn tool_definitions(&self) -> &'static [ToolDefinition] {
        TOOLS
    }

    fn prompt_guidance(&self) -> &'static str {
        GUIDANCE
    }

    async fn initialize(&mut self) -> Result<String, AssistantError> {
        self.backend.connect().await
    }

    async fn cleanup(&mut self) {
        self.backend.disconnect().await;
    }

    async fn handle_tool_call(
        &mut self,
        tool_name: &str,
        mut args: Map<String, Value>,
    ) -> Result<Value, AssistantError> {
        prefix_ids(&mut args);
        self.backend.call(tool_name, args).await
    }

    async fn format_tool_response(&self, tool_name: &str, result: &Value) -> String {
        let summary_prompt = format!(
            "Summarize the following TheHive {} results for a SOC analyst:\n{}",
            tool_name, result
        );

        match self.model.generate(&summary_prompt).await {
            Ok(summary) => {
                let count_info = match result {
                    Value::Array(items) => format!(" ({} items)", items.len()),
                    _ => String::new(),
                };
                format!(
                    "### {} Results{}\n\n**Raw Data:**\n```json\n{}\n```\n\n**Summary:**\n{}",
                    tool_name,
                    count_info,
                    pretty(result),
                    summary
                )
            }
            Err(e) => {
                warn!(tool = tool_name, "Summary generation failed: {}", e);
                format!(
                    "### {} Results\n\n```json\n{}\n```\n\n*Summary generation failed: {}*",
                    tool_name,
                    pretty(result),
                    e
                )
            }
        }
    }

    fn status(&self) -> Vec<ComponentStatus> {
        vec![self.backend.status()]
    }
}
