use std::path::PathBuf;

/// Errors from the MCP client layer.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Unknown MCP server: {0}")]
    UnknownServer(String),

    #[error("MCP server {0} is disabled")]
    ServerDisabled(String),

    #[error("Failed to connect to MCP server {server} after {attempts} attempts: {last_error}")]
    ConnectionFailed {
        server: String,
        attempts: u32,
        last_error: String,
    },

    #[error("MCP server {0} is not connected")]
    NotConnected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to read server registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid server registry: {0}")]
    Config(String),
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Protocol(e.to_string())
    }
}
