use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::info;

use super::session::{ChatMessage, ChatSession};
use super::{
    Assistant, AssistantError, AssistantKind, ComponentStatus, TheHiveAssistant,
    TicketsManagerAssistant, ToolDefinition, WazuhAssistant,
};
use crate::config::AppConfig;
use crate::llm::{GeminiClient, LanguageModel, LlmError};

#[derive(Debug, Clone, Serialize)]
pub struct AssistantInfo {
    pub name: AssistantKind,
    pub display_name: &'static str,
    pub description: &'static str,
    pub tool_count: usize,
    pub example_tools: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantStatus {
    pub name: AssistantKind,
    pub initialized: bool,
    /// A request is in progress; the other fields are the last observed state.
    pub busy: bool,
    pub components: Vec<ComponentStatus>,
}

fn example_tools(kind: AssistantKind) -> &'static [&'static str] {
    match kind {
        AssistantKind::TicketsManager => &["count_entries", "get_entries", "count_lines"],
        AssistantKind::Wazuh => &[
            "get_wazuh_agents",
            "get_wazuh_alert_summary",
            "search_wazuh_manager_logs",
        ],
        AssistantKind::TheHive => &[
            "get_thehive_cases",
            "create_thehive_case",
            "get_thehive_alerts",
        ],
    }
}

#[derive(Debug, Clone)]
struct StatusSnapshot {
    initialized: bool,
    components: Vec<ComponentStatus>,
}

impl StatusSnapshot {
    fn of(session: &ChatSession) -> Self {
        Self {
            initialized: session.is_initialized(),
            components: session.assistant().status(),
        }
    }
}

/// One assistant's session plus what can be read without waiting for it.
struct HubEntry {
    info: AssistantInfo,
    tools: &'static [ToolDefinition],
    session: Mutex<ChatSession>,
    snapshot: StdMutex<StatusSnapshot>,
}

impl HubEntry {
    fn new(session: ChatSession) -> Self {
        let assistant = session.assistant();
        let kind = assistant.kind();
        let info = AssistantInfo {
            name: kind,
            display_name: assistant.display_name(),
            description: assistant.description(),
            tool_count: assistant.tool_definitions().len(),
            example_tools: example_tools(kind),
        };
        let tools = assistant.tool_definitions();
        let snapshot = StdMutex::new(StatusSnapshot::of(&session));
        Self {
            info,
            tools,
            session: Mutex::new(session),
            snapshot,
        }
    }

    fn last_snapshot(&self) -> StatusSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, session: &ChatSession) {
        *self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = StatusSnapshot::of(session);
    }
}

/// Owns one chat session per assistant. Each session sits behind its own lock so
/// a slow MCP call in one assistant does not block the others. Listing and status
/// never wait for a session that is busy.
pub struct AssistantHub {
    entries: Vec<HubEntry>,
}

impl AssistantHub {
    /// Builds every assistant from configuration, backed by Gemini.
    pub fn from_config(config: &AppConfig) -> Result<Self, LlmError> {
        let model: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(&config.gemini)?);
        Ok(Self::with_model(config, model))
    }

    pub fn with_model(config: &AppConfig, model: Arc<dyn LanguageModel>) -> Self {
        let assistants: Vec<Box<dyn Assistant>> = vec![
            Box::new(TicketsManagerAssistant::new(
                config.database.clone(),
                config.ingestion.clone(),
            )),
            Box::new(WazuhAssistant::new(&config.wazuh, &config.mcp, Arc::clone(&model))),
            Box::new(TheHiveAssistant::new(&config.thehive, &config.mcp, Arc::clone(&model))),
        ];
        Self::from_assistants(assistants, model)
    }

    pub fn from_assistants(assistants: Vec<Box<dyn Assistant>>, model: Arc<dyn LanguageModel>) -> Self {
        let entries = assistants
            .into_iter()
            .map(|assistant| HubEntry::new(ChatSession::new(assistant, Arc::clone(&model))))
            .collect();
        Self { entries }
    }

    fn entry(&self, kind: AssistantKind) -> Option<&HubEntry> {
        self.entries.iter().find(|entry| entry.info.name == kind)
    }

    pub fn session(&self, kind: AssistantKind) -> Option<&Mutex<ChatSession>> {
        self.entry(kind).map(|entry| &entry.session)
    }

    pub fn list(&self) -> Vec<AssistantInfo> {
        self.entries.iter().map(|entry| entry.info.clone()).collect()
    }

    pub fn status(&self) -> Vec<AssistantStatus> {
        self.entries
            .iter()
            .map(|entry| {
                let (snapshot, busy) = match entry.session.try_lock() {
                    Ok(session) => {
                        entry.record(&session);
                        (entry.last_snapshot(), false)
                    }
                    Err(_) => (entry.last_snapshot(), true),
                };
                AssistantStatus {
                    name: entry.info.name,
                    initialized: snapshot.initialized,
                    busy,
                    components: snapshot.components,
                }
            })
            .collect()
    }

    /// Returns `None` when the hub has no such assistant.
    pub fn tools(&self, kind: AssistantKind) -> Option<&'static [ToolDefinition]> {
        self.entry(kind).map(|entry| entry.tools)
    }

    pub async fn messages(&self, kind: AssistantKind) -> Option<Vec<ChatMessage>> {
        let session = self.entry(kind)?.session.lock().await;
        Some(session.messages().to_vec())
    }

    pub async fn clear_history(&self, kind: AssistantKind) -> Option<()> {
        self.entry(kind)?.session.lock().await.clear_history();
        Some(())
    }

    pub async fn chat(&self, kind: AssistantKind, message: &str) -> Option<Vec<ChatMessage>> {
        let entry = self.entry(kind)?;
        let mut session = entry.session.lock().await;
        let messages = session.submit(message).await;
        entry.record(&session);
        Some(messages)
    }

    /// Initializes an assistant without waiting for a prompt. Returns the status
    /// line, or a note when it was already initialized.
    pub async fn initialize(&self, kind: AssistantKind) -> Option<Result<String, AssistantError>> {
        let entry = self.entry(kind)?;
        let mut session = entry.session.lock().await;
        info!(assistant = %kind, "Initializing assistant on request");
        let result = session.ensure_initialized().await.map(|status| {
            status.unwrap_or_else(|| format!("{} is already initialized", entry.info.display_name))
        });
        entry.record(&session);
        Some(result)
    }

    pub async fn reconnect(&self, kind: AssistantKind) -> Option<()> {
        let entry = self.entry(kind)?;
        let mut session = entry.session.lock().await;
        info!(assistant = %kind, "Reconnecting assistant");
        session.reconnect().await;
        entry.record(&session);
        Some(())
    }

    pub async fn refresh(&self, kind: AssistantKind) -> Option<Result<String, AssistantError>> {
        let entry = self.entry(kind)?;
        let mut session = entry.session.lock().await;
        let result = session.refresh().await;
        entry.record(&session);
        Some(result)
    }

    /// Releases every initialized assistant's resources. Sessions initialize
    /// again on their next prompt.
    pub async fn shutdown(&self) {
        for entry in &self.entries {
            info!(assistant = %entry.info.name, "Shutting down assistant");
            let mut session = entry.session.lock().await;
            session.shutdown().await;
            entry.record(&session);
        }
    }
}
