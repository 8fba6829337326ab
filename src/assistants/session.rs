use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    describe_tools, find_tool, refresh_unsupported, Assistant, AssistantError, ToolDefinition,
    NO_TOOL,
};
use crate::llm::LanguageModel;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n?(\{.*?\})\s*\n?```").expect("fenced JSON pattern")
});

static INLINE_TOOL_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)(\{"name":\s*"[^"]+",\s*"arguments":\s*\{.*?\}\})"#)
        .expect("inline tool call pattern")
});

const LIST_TOOLS_PHRASES: [&str; 3] = ["list tools", "available tools", "show tools"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Error { text: String },
    ToolListing { tools: Vec<ToolDefinition> },
    ToolInvocation { name: String, arguments: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text {
                text: text.to_string(),
            },
        }
    }

    fn assistant(content: MessageContent) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Plain-text rendering used by the terminal chat.
    pub fn render(&self) -> String {
        match &self.content {
            MessageContent::Text { text } => text.clone(),
            MessageContent::Error { text } => format!("❌ {}", text),
            MessageContent::ToolInvocation { name, arguments } => {
                format!("**Executing:** `{}` with arguments `{}`", name, arguments)
            }
            MessageContent::ToolListing { tools } => {
                let mut out = String::from("### Available Tools:\n");
                for tool in tools.iter() {
                    out.push_str(&format!("**{}**: {}\n", tool.name, tool.description));
                    if !tool.required_args.is_empty() {
                        out.push_str(&format!("- **Required**: {}\n", tool.required_args.join(", ")));
                    }
                    if !tool.optional_args.is_empty() {
                        out.push_str(&format!("- **Optional**: {}\n", tool.optional_args.join(", ")));
                    }
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Finds the JSON object in a model reply: the whole reply, a fenced code
/// block, or an inline `{"name": ..., "arguments": {...}}` object.
pub fn extract_json_candidate(response: &str) -> Option<&str> {
    let response = response.trim();
    if response.starts_with('{') && response.ends_with('}') {
        return Some(response);
    }
    if let Some(captures) = FENCED_JSON.captures(response) {
        return captures.get(1).map(|m| m.as_str().trim());
    }
    INLINE_TOOL_CALL
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Interprets a model reply as a tool call when it carries a JSON object with a
/// string `name` and an object `arguments`.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let candidate = extract_json_candidate(response)?;
    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => {
            debug!("JSON parsing of tool call candidate failed: {}", e);
            return None;
        }
    };

    let Value::Object(mut object) = value else {
        return None;
    };
    let name = object.get("name")?.as_str()?.to_string();
    match object.remove("arguments")? {
        Value::Object(arguments) => Some(ToolCall { name, arguments }),
        _ => None,
    }
}

/// Conversation state for one assistant: history, lazy initialization, the
/// prompt/tool-call loop and error reporting.
pub struct ChatSession {
    assistant: Box<dyn Assistant>,
    model: Arc<dyn LanguageModel>,
    messages: Vec<ChatMessage>,
    initialized: bool,
}

impl ChatSession {
    pub fn new(assistant: Box<dyn Assistant>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            assistant,
            model,
            messages: Vec::new(),
            initialized: false,
        }
    }

    pub fn assistant(&self) -> &dyn Assistant {
        self.assistant.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    /// Initializes the assistant's resources once. Returns the status line on
    /// the call that performed the initialization.
    pub async fn ensure_initialized(&mut self) -> Result<Option<String>, AssistantError> {
        if self.initialized {
            return Ok(None);
        }
        info!(assistant = %self.assistant.kind(), "Initializing assistant resources");
        let status = self.assistant.initialize().await?;
        self.initialized = true;
        info!(assistant = %self.assistant.kind(), "{}", status);
        Ok(Some(status))
    }

    /// Releases resources; the next prompt initializes them again.
    pub async fn reconnect(&mut self) {
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        if self.initialized {
            self.assistant.cleanup().await;
            self.initialized = false;
        }
    }

    pub async fn refresh(&mut self) -> Result<String, AssistantError> {
        if !self.assistant.supports_refresh() {
            return Err(refresh_unsupported(self.assistant.display_name()));
        }
        self.ensure_initialized().await?;
        self.assistant.refresh().await
    }

    pub fn system_prompt(&self) -> String {
        let tool_list = describe_tools(self.assistant.tool_definitions()).join("\n");
        format!(
            "You are a specialized AI assistant with access to these tools:\n{}\n\n\
             When you need to use a tool, respond with ONLY valid JSON:\n\
             {{\"name\": \"tool_name\", \"arguments\": {{...}}}}\n\n\
             For queries that combine multiple filters, include all relevant arguments in the JSON.\n\
             If you can answer without tools, respond naturally.\n\n{}",
            tool_list,
            self.assistant.prompt_guidance()
        )
    }

    /// Handles one user prompt and returns the messages it appended to the history,
    /// starting with the user's own message.
    pub async fn submit(&mut self, prompt: &str) -> Vec<ChatMessage> {
        let start = self.messages.len();
        self.messages.push(ChatMessage::user(prompt));
        self.process_prompt(prompt).await;
        self.messages[start..].to_vec()
    }

    fn push(&mut self, content: MessageContent) {
        self.messages.push(ChatMessage::assistant(content));
    }

    async fn process_prompt(&mut self, prompt: &str) {
        debug!(assistant = %self.assistant.kind(), prompt, "Processing prompt");

        if let Err(e) = self.ensure_initialized().await {
            error!(assistant = %self.assistant.kind(), "Initialization failed: {}", e);
            self.push(MessageContent::Error {
                text: format!("Error running {}: {}", self.assistant.kind(), e),
            });
            return;
        }

        if self.handle_special_commands(prompt) {
            return;
        }

        let full_prompt = format!("{}\nUser: {}", self.system_prompt(), prompt);
        let raw = match self.model.generate(&full_prompt).await {
            Ok(raw) => raw.trim().to_string(),
            Err(e) => {
                error!(assistant = %self.assistant.kind(), "Model request failed: {}", e);
                self.push(MessageContent::Error {
                    text: format!("Error processing request: {}", e),
                });
                return;
            }
        };
        debug!(assistant = %self.assistant.kind(), response = %raw, "Model response");

        match parse_tool_call(&raw) {
            Some(call) => self.execute_tool_call(call).await,
            None => self.push(MessageContent::Text { text: raw }),
        }
    }

    fn handle_special_commands(&mut self, prompt: &str) -> bool {
        let lower = prompt.trim().to_lowercase();
        if !LIST_TOOLS_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            return false;
        }

        let tools = self
            .assistant
            .tool_definitions()
            .iter()
            .filter(|t| t.name != NO_TOOL)
            .copied()
            .collect();
        self.push(MessageContent::ToolListing { tools });
        true
    }

    async fn execute_tool_call(&mut self, call: ToolCall) {
        info!(assistant = %self.assistant.kind(), tool = %call.name, arguments = ?call.arguments, "Executing tool");

        match self.run_tool(call).await {
            Ok(formatted) => self.push(MessageContent::Text { text: formatted }),
            Err(e) => {
                error!(assistant = %self.assistant.kind(), "Tool execution failed: {}", e);
                self.push(MessageContent::Error {
                    text: format!("Tool execution error: {}", e),
                });
            }
        }
    }

    async fn run_tool(&mut self, call: ToolCall) -> Result<String, AssistantError> {
        let spec = find_tool(self.assistant.tool_definitions(), &call.name)
            .ok_or_else(|| AssistantError::UnknownTool(call.name.clone()))?;

        let missing: Vec<String> = spec
            .required_args
            .iter()
            .filter(|arg| !call.arguments.contains_key(**arg))
            .map(|arg| arg.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AssistantError::MissingArguments(missing));
        }

        self.push(MessageContent::ToolInvocation {
            name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()),
        });

        let result = self
            .assistant
            .handle_tool_call(&call.name, call.arguments)
            .await?;
        Ok(self.assistant.format_tool_response(&call.name, &result).await)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;
    use crate::assistants::{AssistantKind, ComponentState, ComponentStatus};
    use async_trait::async_trait;
    use serde_json::json;

    const ECHO_TOOLS: &[ToolDefinition] = &[
        ToolDefinition {
            name: "lookup",
            description: "Look something up",
            required_args: &["key"],
            optional_args: &["limit"],
        },
        ToolDefinition {
            name: NO_TOOL,
            description: "No tool needed - normal conversation",
            required_args: &[],
            optional_args: &[],
        },
    ];

    #[derive(Default)]
    struct EchoAssistant {
        init_calls: usize,
        fail_init: bool,
    }

    #[async_trait]
    impl Assistant for EchoAssistant {
        fn kind(&self) -> AssistantKind {
            AssistantKind::TicketsManager
        }
        fn display_name(&self) -> &'static str {
            "Echo"
        }
        fn description(&self) -> &'static str {
            "Echoes arguments"
        }
        fn tool_definitions(&self) -> &'static [ToolDefinition] {
            ECHO_TOOLS
        }
        fn prompt_guidance(&self) -> &'static str {
            "Echo guidance."
        }
        async fn initialize(&mut self) -> Result<String, AssistantError> {
            self.init_calls += 1;
            if self.fail_init {
                return Err(AssistantError::NotInitialized("Echo backend"));
            }
            Ok("ready".to_string())
        }
        async fn cleanup(&mut self) {}
        async fn handle_tool_call(
            &mut self,
            _tool_name: &str,
            args: Map<String, Value>,
        ) -> Result<Value, AssistantError> {
            Ok(Value::Object(args))
        }
        async fn format_tool_response(&self, tool_name: &str, result: &Value) -> String {
            format!("{} -> {}", tool_name, result)
        }
        fn status(&self) -> Vec<ComponentStatus> {
            vec![ComponentStatus::new("echo", ComponentState::Running)]
        }
    }

    fn session(replies: Vec<Result<&str, &str>>) -> (ChatSession, Arc<ScriptedModel>) {
        let model = Arc::new(ScriptedModel::new(replies));
        let session = ChatSession::new(Box::<EchoAssistant>::default(), model.clone());
        (session, model)
    }

    #[test]
    fn extracts_tool_calls_from_various_reply_shapes() {
        let pure = r#"{"name": "lookup", "arguments": {"key": "a"}}"#;
        assert_eq!(parse_tool_call(pure).unwrap().name, "lookup");

        let fenced = "Sure:\n```json\n{\"name\": \"lookup\", \"arguments\": {\"key\": \"b\"}}\n```";
        assert_eq!(parse_tool_call(fenced).unwrap().arguments["key"], "b");

        let generic = "```\n{\"name\": \"lookup\", \"arguments\": {}}\n```";
        assert!(parse_tool_call(generic).unwrap().arguments.is_empty());

        let inline = r#"I will call {"name": "lookup", "arguments": {"key": "c"}} now."#;
        assert_eq!(parse_tool_call(inline).unwrap().arguments["key"], "c");
    }

    #[test]
    fn rejects_replies_that_are_not_tool_calls() {
        assert_eq!(parse_tool_call("There are 3 agents online."), None);
        assert_eq!(parse_tool_call(r#"{"answer": 42}"#), None);
        assert_eq!(parse_tool_call(r#"{"name": "lookup", "arguments": "key=a"}"#), None);
        assert_eq!(parse_tool_call("{not json}"), None);
    }

    #[tokio::test]
    async fn natural_language_reply_is_kept_verbatim() {
        let (mut session, model) = session(vec![Ok("  Hello analyst.  ")]);
        let new = session.submit("hi").await;

        assert_eq!(new.len(), 2);
        assert_eq!(new[0], ChatMessage::user("hi"));
        assert_eq!(
            new[1].content,
            MessageContent::Text {
                text: "Hello analyst.".to_string()
            }
        );

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("You are a specialized AI assistant"));
        assert!(prompts[0].contains("- lookup: Look something up (Required args: key)"));
        assert!(!prompts[0].contains("- none:"));
        assert!(prompts[0].contains("Echo guidance."));
        assert!(prompts[0].ends_with("\nUser: hi"));
    }

    #[tokio::test]
    async fn executes_tool_calls_and_formats_results() {
        let (mut session, _) = session(vec![Ok(r#"{"name": "lookup", "arguments": {"key": "x"}}"#)]);
        let new = session.submit("look up x").await;

        assert_eq!(new.len(), 3);
        assert_eq!(
            new[1].content,
            MessageContent::ToolInvocation {
                name: "lookup".to_string(),
                arguments: json!({"key": "x"})
            }
        );
        assert_eq!(
            new[2].content,
            MessageContent::Text {
                text: r#"lookup -> {"key":"x"}"#.to_string()
            }
        );
    }

    #[tokio::test]
    async fn reports_unknown_tools_and_missing_arguments() {
        let (mut session, _) = session(vec![
            Ok(r#"{"name": "delete_everything", "arguments": {}}"#),
            Ok(r#"{"name": "lookup", "arguments": {"limit": 1}}"#),
        ]);

        let unknown = session.submit("do it").await;
        assert_eq!(
            unknown[1].content,
            MessageContent::Error {
                text: "Tool execution error: Unknown tool: delete_everything".to_string()
            }
        );

        let missing = session.submit("look up").await;
        assert_eq!(
            missing[1].content,
            MessageContent::Error {
                text: "Tool execution error: Missing required arguments: key".to_string()
            }
        );
    }

    #[tokio::test]
    async fn list_tools_command_skips_the_model() {
        let (mut session, model) = session(vec![]);
        let new = session.submit("Please LIST TOOLS").await;

        match &new[1].content {
            MessageContent::ToolListing { tools } => {
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0].name, "lookup");
            }
            other => panic!("unexpected content: {other:?}"),
        }
        assert!(model.prompts.lock().unwrap().is_empty());
        assert!(new[1].render().contains("- **Optional**: limit"));
    }

    #[tokio::test]
    async fn model_failure_becomes_error_message() {
        let (mut session, _) = session(vec![Err("quota exceeded")]);
        let new = session.submit("hi").await;
        assert_eq!(
            new[1].content,
            MessageContent::Error {
                text: "Error processing request: Language model error: quota exceeded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn initializes_once_until_reconnect() {
        let (mut session, _) = session(vec![Ok("a"), Ok("b"), Ok("c")]);
        assert_eq!(session.ensure_initialized().await.unwrap(), Some("ready".to_string()));
        session.submit("one").await;
        session.submit("two").await;
        assert!(session.is_initialized());

        session.reconnect().await;
        assert!(!session.is_initialized());
        session.submit("three").await;
        assert!(session.is_initialized());
        assert_eq!(session.messages().len(), 6);

        session.clear_history();
        assert!(session.messages().is_empty());
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn initialization_failure_is_reported_in_history() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let assistant = EchoAssistant {
            fail_init: true,
            ..Default::default()
        };
        let mut session = ChatSession::new(Box::new(assistant), model);

        let new = session.submit("hi").await;
        assert_eq!(
            new[1].content,
            MessageContent::Error {
                text: "Error running tickets_manager: Echo backend not initialized".to_string()
            }
        );
        assert!(!session.is_initialized());
    }

    #[test]
    fn refresh_is_unsupported_by_default() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let mut session = ChatSession::new(Box::<EchoAssistant>::default(), model);
        let err = tokio_test::block_on(session.refresh()).unwrap_err();
        assert_eq!(err.to_string(), "Echo does not support refreshing data");
        assert!(!session.is_initialized());
    }
}
