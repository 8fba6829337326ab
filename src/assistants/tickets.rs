use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::{
    describe_tools, Assistant, AssistantError, AssistantKind, ComponentState, ComponentStatus,
    ToolDefinition, NO_TOOL,
};
use crate::config::{DatabaseConfig, IngestionConfig};
use crate::tickets::{parse_entry_id, CsvIngestor, CsvWatcher, EntryFilter, TicketStore, TicketsError};

pub const TOOLS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "list_tools",
        description: "List all available tools",
        required_args: &[],
        optional_args: &[],
    },
    ToolDefinition {
        name: "count_lines",
        description: "Count all log entries",
        required_args: &[],
        optional_args: &[],
    },
    ToolDefinition {
        name: "count_entries",
        description: "Count entries by date/time or other filters",
        required_args: &[],
        optional_args: FILTER_ARGS,
    },
    ToolDefinition {
        name: "get_line_by_id",
        description: "Get log entry by ID",
        required_args: &["id"],
        optional_args: &[],
    },
    ToolDefinition {
        name: "get_entries",
        description: "Get entries by date/time or other filters",
        required_args: &[],
        optional_args: FILTER_ARGS,
    },
    ToolDefinition {
        name: NO_TOOL,
        description: "No tool needed - normal conversation",
        required_args: &[],
        optional_args: &[],
    },
];

const FILTER_ARGS: &[&str] = &[
    "date",
    "time",
    "datetime",
    "internal_ip",
    "external_ip",
    "action",
    "destination",
    "policy_identity",
];

const GUIDANCE: &str = r#"Available filter arguments for count_entries and get_entries:
  - 'date': 'DD/MM/YYYY' (e.g., '29/07/2025')
  - 'time': 'HH:MM' or 'HH' (e.g., '13:30' or '13')
  - 'datetime': 'DD/MM/YYYY HH:MM' (combined format)
  - 'internal_ip': IP address (e.g., '107.78.99.191')
  - 'external_ip': IP address
  - 'action': action type (e.g., 'Blocked', 'Allowed')
  - 'destination': destination URL/domain
  - 'policy_identity': policy name
You can combine multiple filters in one query!

Examples:
  User: How many entries from 29/07/2025?
  Assistant: {"name":"count_entries","arguments":{"date":"29/07/2025"}}

  User: Get me lines with internal ip 107.78.99.191 and happened at 29/07/2025 13:13
  Assistant: {"name":"get_entries","arguments":{"internal_ip":"107.78.99.191","date":"29/07/2025","time":"13:13"}}

  User: Count blocked entries from internal IP 192.168.1.1 on 30/07/2025
  Assistant: {"name":"count_entries","arguments":{"action":"Blocked","internal_ip":"192.168.1.1","date":"30/07/2025"}}"#;

/// Answers questions about the CSV logs stored in the local database, keeping
/// the database fed by a directory watcher.
pub struct TicketsManagerAssistant {
    database: DatabaseConfig,
    ingestion: IngestionConfig,
    store: Option<Arc<TicketStore>>,
    watcher: Option<CsvWatcher>,
}

impl TicketsManagerAssistant {
    pub fn new(database: DatabaseConfig, ingestion: IngestionConfig) -> Self {
        Self {
            database,
            ingestion,
            store: None,
            watcher: None,
        }
    }

    fn store(&self) -> Result<&Arc<TicketStore>, AssistantError> {
        self.store
            .as_ref()
            .ok_or(AssistantError::NotInitialized("Database"))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[async_trait]
impl Assistant for TicketsManagerAssistant {
    fn kind(&self) -> AssistantKind {
        AssistantKind::TicketsManager
    }

    fn display_name(&self) -> &'static str {
        "📋 Tickets Manager"
    }

    fn description(&self) -> &'static str {
        "Analyze and query CSV log files with natural language"
    }

    fn tool_definitions(&self) -> &'static [ToolDefinition] {
        TOOLS
    }

    fn prompt_guidance(&self) -> &'static str {
        GUIDANCE
    }

    async fn initialize(&mut self) -> Result<String, AssistantError> {
        let database = self.database.clone();
        let store = tokio::task::spawn_blocking(move || -> Result<_, TicketsError> {
            let store = TicketStore::open(&database)?;
            store.initialize()?;
            Ok(Arc::new(store))
        })
        .await
        .map_err(TicketsError::from)??;

        let ingestor = Arc::new(CsvIngestor::new(
            Arc::clone(&store),
            self.ingestion.csv_separator,
        ));
        let mut watcher = CsvWatcher::new(&self.ingestion.watch_directory, ingestor);
        watcher.start().await?;

        self.store = Some(store);
        self.watcher = Some(watcher);
        Ok("✅ Database and CSV watcher initialized successfully".to_string())
    }

    async fn cleanup(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if self.store.take().is_some() {
            info!("Closed tickets database");
        }
    }

    async fn handle_tool_call(
        &mut self,
        tool_name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, AssistantError> {
        let store = self.store()?;

        match tool_name {
            "list_tools" => Ok(Value::String(format!(
                "Available Tools:\n{}",
                describe_tools(TOOLS).join("\n")
            ))),
            "count_lines" => Ok(Value::from(store.count_lines()?)),
            "count_entries" => {
                let filter = EntryFilter::from_args(&args);
                Ok(Value::from(store.count_entries(&filter)?))
            }
            "get_line_by_id" => {
                let id = match args.get("id") {
                    Some(value) => parse_entry_id(value)?,
                    None => return Err(AssistantError::MissingArguments(vec!["id".to_string()])),
                };
                match store.get_line_by_id(id)? {
                    Some(entry) => Ok(serde_json::to_value(entry)?),
                    None => Ok(Value::String("No entry found with that ID".to_string())),
                }
            }
            "get_entries" => {
                let filter = EntryFilter::from_args(&args);
                let entries = store.get_entries(&filter)?;
                Ok(serde_json::to_value(entries)?)
            }
            NO_TOOL => Ok(Value::String("No tool executed".to_string())),
            other => Err(AssistantError::UnknownTool(other.to_string())),
        }
    }

    async fn format_tool_response(&self, tool_name: &str, result: &Value) -> String {
        if matches!(tool_name, "get_entries" | "get_line_by_id") {
            return match result {
                Value::String(s) if s.contains("No entry found") => "No entries found".to_string(),
                Value::Array(items) if items.is_empty() => "No entries found".to_string(),
                Value::Array(items) if tool_name == "get_entries" => format!(
                    "📋 JSON Results ({} entries):\n```json\n{}\n```",
                    items.len(),
                    pretty(result)
                ),
                _ => format!("📄 JSON Entry Details:\n```json\n{}\n```", pretty(result)),
            };
        }

        match result {
            Value::Number(n) if n.is_i64() || n.is_u64() => format!("🔢 Result: {}", n),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn status(&self) -> Vec<ComponentStatus> {
        let database = if self.store.is_some() {
            ComponentState::Running
        } else {
            ComponentState::NotStarted
        };
        let watcher = match &self.watcher {
            Some(w) if w.is_running() => ComponentState::Running,
            Some(_) => ComponentState::Stopped,
            None => ComponentState::NotStarted,
        };
        vec![
            ComponentStatus::new("database", database),
            ComponentStatus::new("csv_watcher", watcher),
        ]
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&mut self) -> Result<String, AssistantError> {
        let watcher = self
            .watcher
            .as_ref()
            .ok_or(AssistantError::NotInitialized("CSV watcher"))?;
        let processed = watcher.process_existing_files().await?;
        Ok(format!("✅ CSV data refreshed ({} new file(s))", processed))
    }
}
