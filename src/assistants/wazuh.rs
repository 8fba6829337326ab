use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::remote::McpBackend;
use super::{
    truncate_chars, Assistant, AssistantError, AssistantKind, ComponentStatus, ToolDefinition,
};
use crate::config::{McpConfig, WazuhConfig};
use crate::llm::LanguageModel;
use crate::mcp::McpServerCommand;

const SUMMARY_CONTEXT_CHARS: usize = 1000;
const SUMMARY_PROMPT_CHARS: usize = 2000;
const INLINE_RAW_DATA_CHARS: usize = 2000;

pub const TOOLS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "search_wazuh_manager_logs",
        description: "Searches Wazuh manager logs. Returns formatted log entries including timestamp, tag, level, and description. Supports filtering by limit, offset, level, tag, and a search term.",
        required_args: &["level"],
        optional_args: &["limit", "offset", "search_term", "tag"],
    },
    ToolDefinition {
        name: "get_wazuh_remoted_stats",
        description: "Retrieves statistics from the Wazuh remoted daemon. Returns information about queue size, TCP sessions, event counts, and message traffic.",
        required_args: &[],
        optional_args: &[],
    },
    ToolDefinition {
        name: "get_wazuh_weekly_stats",
        description: "Retrieves weekly statistics from the Wazuh manager. Returns a JSON object detailing various metrics aggregated over the past week.",
        required_args: &[],
        optional_args: &[],
    },
    ToolDefinition {
        name: "get_wazuh_alert_summary",
        description: "Retrieves a summary of Wazuh security alerts. Returns formatted alert information including ID, timestamp, and description.",
        required_args: &[],
        optional_args: &["limit"],
    },
    ToolDefinition {
        name: "get_wazuh_cluster_nodes",
        description: "Retrieves a list of nodes in the Wazuh cluster. Returns formatted node information including name, type, version, IP, and status. Supports filtering by limit, offset, and node type.",
        required_args: &[],
        optional_args: &["limit", "node_type", "offset"],
    },
    ToolDefinition {
        name: "get_wazuh_critical_vulnerabilities",
        description: "Retrieves critical vulnerabilities for a specific Wazuh agent. Returns formatted vulnerability information including CVE ID, title, description, CVSS scores, and detection details. Only shows vulnerabilities with 'Critical' severity level.",
        required_args: &["agent_id"],
        optional_args: &["limit"],
    },
    ToolDefinition {
        name: "get_wazuh_agents",
        description: "Retrieves a list of Wazuh agents with their current status and details. Returns formatted agent information including ID, name, IP, status, OS details, and last activity. Supports filtering by status, name, IP, group, OS platform, and version.",
        required_args: &["status"],
        optional_args: &["group", "ip", "limit", "name", "os_platform", "version"],
    },
    ToolDefinition {
        name: "get_wazuh_manager_error_logs",
        description: "Retrieves Wazuh manager error logs. Returns formatted log entries including timestamp, tag, level (error), and description.",
        required_args: &[],
        optional_args: &["limit"],
    },
    ToolDefinition {
        name: "get_wazuh_vulnerability_summary",
        description: "Retrieves a summary of Wazuh vulnerability detections for a specific agent. Returns formatted vulnerability information including CVE ID, severity, detection time, and agent details. Supports filtering by severity level.",
        required_args: &["agent_id"],
        optional_args: &["cve", "limit", "severity"],
    },
    ToolDefinition {
        name: "get_wazuh_log_collector_stats",
        description: "Retrieves log collector statistics for a specific Wazuh agent. Returns information about events processed, dropped, bytes, and target log files.",
        required_args: &["agent_id"],
        optional_args: &[],
    },
    ToolDefinition {
        name: "get_wazuh_cluster_health",
        description: "Checks the health of the Wazuh cluster. Returns whether the cluster is enabled, running, and if nodes are connected.",
        required_args: &[],
        optional_args: &[],
    },
    ToolDefinition {
        name: "get_wazuh_agent_processes",
        description: "Retrieves a list of running processes for a specific Wazuh agent. Returns formatted process information including PID, name, state, user, and command. Supports filtering by process name/command.",
        required_args: &["agent_id"],
        optional_args: &["limit", "search"],
    },
    ToolDefinition {
        name: "get_wazuh_agent_ports",
        description: "Retrieves a list of open network ports for a specific Wazuh agent. Returns formatted port information including local/remote IP and port, protocol, state, and associated process/PID. Supports filtering by protocol and state.",
        required_args: &["agent_id", "protocol", "state"],
        optional_args: &["limit"],
    },
    ToolDefinition {
        name: "get_wazuh_rules_summary",
        description: "Retrieves a summary of Wazuh security rules. Returns formatted rule information including ID, level, description, and groups. Supports filtering by level, group, and filename.",
        required_args: &[],
        optional_args: &["filename", "group", "level", "limit"],
    },
];

const GUIDANCE: &str = r#"You are specialized in Wazuh SIEM operations. When users ask about:
- Agent information: use get_wazuh_agents
- Process monitoring: use get_wazuh_agent_processes
- Open ports: use get_wazuh_agent_ports
- Vulnerabilities: use get_wazuh_vulnerability_summary or get_wazuh_critical_vulnerabilities
- Security events: use get_wazuh_alert_summary and the other Wazuh tools

IMPORTANT: Respond with ONLY the JSON tool call, no additional text or markdown formatting.
Example: {"name": "get_wazuh_agents", "arguments": {"status": "active"}}

Always provide actionable insights for SOC analysts."#;

/// Queries a Wazuh SIEM through the Wazuh MCP server and summarizes the results
/// with the language model.
pub struct WazuhAssistant {
    backend: McpBackend,
    model: Arc<dyn LanguageModel>,
}

impl WazuhAssistant {
    pub fn new(wazuh: &WazuhConfig, mcp: &McpConfig, model: Arc<dyn LanguageModel>) -> Self {
        let mut envs = wazuh.server_env();
        envs.push(("RUST_LOG".to_string(), mcp.rust_log.clone()));
        let command = McpServerCommand::new(&mcp.wazuh_server_path, "wazuh-assistant")
            .with_envs(envs)
            .with_timeout(mcp.request_timeout);
        Self::with_command(command, model)
    }

    pub fn with_command(command: McpServerCommand, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            backend: McpBackend::new("Wazuh", command),
            model,
        }
    }
}

/// `get_wazuh_agent_processes` filters with `search`; models often say `process_name`.
pub fn normalize_arguments(tool_name: &str, args: &mut Map<String, Value>) {
    if tool_name == "get_wazuh_agent_processes" && !args.contains_key("search") {
        if let Some(value) = args.remove("process_name") {
            args.insert("search".to_string(), value);
        }
    }
}

/// Returns the raw data to display and the context handed to the summarizer.
fn summary_inputs(result: &Value) -> (String, String) {
    match result {
        Value::String(text) => {
            let head = truncate_chars(text, SUMMARY_CONTEXT_CHARS);
            let context = match text.matches("Agent ID:").count() {
                0 => head.to_string(),
                agents => format!("Found {} agent(s). {}", agents, head),
            };
            (text.clone(), context)
        }
        Value::Object(_) | Value::Array(_) => (
            serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string()),
            result.to_string(),
        ),
        other => (other.to_string(), other.to_string()),
    }
}

#[async_trait]
impl Assistant for WazuhAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::Wazuh
    }

    fn display_name(&self) -> &'static str {
        "🔍 Wazuh Assistant"
    }

    fn description(&self) -> &'static str {
        "Interact with Wazuh SIEM through MCP server integration"
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
        normalize_arguments(tool_name, &mut args);
        let result = self.backend.call(tool_name, args).await?;
        debug!(
            tool = tool_name,
            length = result.to_string().len(),
            "Wazuh tool returned"
        );
        Ok(result)
    }

    async fn format_tool_response(&self, tool_name: &str, result: &Value) -> String {
        let (raw_data, context) = summary_inputs(result);

        let summary_prompt = format!(
            "Provide a brief summary of this Wazuh {} data for a SOC analyst (max 3 sentences):\n{}",
            tool_name,
            truncate_chars(&context, SUMMARY_PROMPT_CHARS)
        );
        let summary = match self.model.generate(&summary_prompt).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!(tool = tool_name, "Summary generation failed: {}", e);
                format!("Summary generation failed: {}", e)
            }
        };

        let mut formatted = format!("### 🔍 {} Results\n\n", tool_name);
        formatted.push_str(&format!("**📊 Summary:**\n{}\n\n", summary));

        let raw_len = raw_data.chars().count();
        if raw_len > INLINE_RAW_DATA_CHARS {
            formatted.push_str("**📋 Raw Data:** (Click to expand)\n");
            formatted.push_str(&format!(
                "<details><summary>Show {} characters of data</summary>\n\n",
                raw_len
            ));
            formatted.push_str(&format!("```\n{}\n```\n\n", raw_data));
            formatted.push_str("</details>\n");
        } else {
            formatted.push_str(&format!("**📋 Raw Data:**\n```\n{}\n```\n", raw_data));
        }
        formatted
    }

    fn status(&self) -> Vec<ComponentStatus> {
        vec![self.backend.status()]
    }
}
