//! MCP error types.

use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Bad configuration (malformed endpoint URL, HTTP client setup).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The server answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Tool execution failed.
    #[error("Tool execution failed: {0}")]
    ToolError(String),

    /// Invalid argument passed by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// The server rejected the bearer token.
    #[error("Authentication required")]
    AuthRequired,

    /// The client has been closed.
    #[error("Client is closed")]
    Closed,

    /// Both the RPC call and its REST fallback failed.
    #[error("Call failed: {primary}; fallback also failed: {fallback}")]
    CallFailed {
        primary: Box<McpError>,
        fallback: Box<McpError>,
    },
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    /// Create a tool error.
    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::ToolError(message.into())
    }

    /// Combine a primary failure with the failure of its fallback.
    pub fn call_failed(primary: McpError, fallback: McpError) -> Self {
        Self::CallFailed {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}
