use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to start MCP server '{path}': {source}")]
    SpawnError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to MCP server: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("MCP initialization error: {0}")]
    InitializationError(String),

    #[error("MCP tool error: {message}")]
    RpcError { code: i64, message: String },

    #[error("Timeout waiting for MCP response to '{0}'")]
    Timeout(String),

    #[error("MCP server closed the connection")]
    ConnectionClosed,

    #[error("MCP process not running")]
    NotRunning,

    #[error("Invalid MCP response: {0}")]
    InvalidResponse(String),
}
