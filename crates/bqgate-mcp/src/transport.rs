//! MCP transport abstraction.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};

/// Header naming the project billed for quota.
pub const QUOTA_PROJECT_HEADER: &str = "X-Goog-User-Project";

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for a response.
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()>;

    /// Release the transport.
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Attach the quota project header when a project is set.
pub(crate) fn with_quota_project(
    req: RequestBuilder,
    project: Option<&str>,
) -> RequestBuilder {
    match project {
        Some(project) => req.header(QUOTA_PROJECT_HEADER, project),
        None => req,
    }
}

/// Map a failure to send an HTTP request.
pub(crate) fn send_error(e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Timeout
    } else if e.is_connect() {
        McpError::connection_failed(e.to_string())
    } else {
        McpError::protocol_error(format!("Request failed: {e}"))
    }
}

/// Reject unauthorized and non-success responses, keeping the body text.
pub(crate) async fn check_status(response: Response) -> McpResult<Response> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(McpError::AuthRequired);
    }

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(McpError::protocol_error(format!(
            "Server returned {status}: {text}"
        )));
    }

    Ok(response)
}

/// Parse a JSON-RPC response body.
pub(crate) fn parse_json_response(text: &str) -> McpResult<JsonRpcResponse> {
    serde_json::from_str(text)
        .map_err(|e| McpError::protocol_error(format!("Invalid JSON response: {e}")))
}
