pub mod client;
pub mod error;

pub use client::{flatten_tool_result, McpClient, McpServerCommand, ToolInfo};
pub use error::McpError;
