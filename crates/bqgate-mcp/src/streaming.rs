//! Streamable HTTP transport for remote MCP servers.
//!
//! Requests are HTTP POSTs. The server answers each one either with a JSON
//! body or with an SSE stream carrying the response as a `data:` event. The
//! session id handed out on `initialize` is echoed on every later request.

use crate::error::{McpError, McpResult};
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_INITIALIZE, METHOD_INITIALIZED,
};
use crate::transport::{
    check_status, parse_json_response, send_error, with_quota_project, Transport,
};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Streaming transport bound to one endpoint and bearer token.
pub struct StreamingTransport {
    endpoint: Url,
    authorization: String,
    quota_project: Option<String>,
    client: Client,
    connected: AtomicBool,
    session_id: RwLock<Option<String>>,
}

impl StreamingTransport {
    /// Create a transport. Nothing is sent until [`initialize`](Self::initialize).
    pub fn new(endpoint: Url, authorization: String, timeout: Duration) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            authorization,
            quota_project: None,
            client,
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    /// Bill requests to `project`. An empty project sends no header.
    pub fn with_quota_project(mut self, project: &str) -> Self {
        self.quota_project = (!project.is_empty()).then(|| project.to_string());
        self
    }

    /// Session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Run the `initialize` handshake and confirm it with
    /// `notifications/initialized`.
    pub async fn initialize(&self, id: u64) -> McpResult<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self
            .request(JsonRpcRequest::new(id, METHOD_INITIALIZE, Some(params)))
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let result: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol_error("Missing initialize result"))?,
        )
        .map_err(|e| McpError::protocol_error(e.to_string()))?;

        self.notify(JsonRpcNotification::new(METHOD_INITIALIZED, None))
            .await?;
        self.connected.store(true, Ordering::SeqCst);

        debug!(
            protocol_version = %result.protocol_version,
            server_name = %result.server_info.name,
            "Streaming session initialized"
        );

        Ok(result)
    }

    /// Build request with common headers.
    async fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let req = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("Authorization", &self.authorization)
            .body(body);
        let mut req = with_quota_project(req, self.quota_project.as_deref());

        if let Some(ref id) = *self.session_id.read().await {
            req = req.header(SESSION_HEADER, id);
        }

        req
    }

    /// Parse a JSON or SSE response for the request with the given id.
    async fn parse_response(
        &self,
        response: reqwest::Response,
        id: Option<u64>,
    ) -> McpResult<JsonRpcResponse> {
        let response = check_status(response).await?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.contains("text/event-stream") {
            self.parse_sse_stream(response, id).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| McpError::protocol_error(format!("Failed to read response: {e}")))?;
            parse_json_response(&text)
        }
    }

    /// Read events until the response to `id` arrives.
    async fn parse_sse_stream(
        &self,
        response: reqwest::Response,
        id: Option<u64>,
    ) -> McpResult<JsonRpcResponse> {
        use futures::StreamExt;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| McpError::protocol_error(format!("Stream error: {e}")))?;

            for data in decoder.push(&chunk) {
                if let Some(response) = match_response(&data, id) {
                    return Ok(response);
                }
            }
        }

        if let Some(response) = decoder.finish().and_then(|data| match_response(&data, id)) {
            return Ok(response);
        }

        Err(McpError::protocol_error("SSE stream ended without response"))
    }
}

/// Accept an event payload only if it is the response to `id`.
fn match_response(data: &str, id: Option<u64>) -> Option<JsonRpcResponse> {
    let response: JsonRpcResponse = serde_json::from_str(data).ok()?;
    let answered = response.result.is_some() || response.error.is_some();
    (answered && response.id == id).then_some(response)
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Buffers raw bytes so a character split across chunks survives, and
/// yields the joined `data:` lines of every complete event.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else {
                self.field(line);
            }
        }

        events
    }

    fn field(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    /// Flush an event left open when the stream ends.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        self.field(rest.trim_end_matches('\r'));

        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}

#[async_trait]
impl Transport for StreamingTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let request_json = serde_json::to_string(&request)?;

        debug!(id = request.id, method = %request.method, "Sending streaming request");

        let response = self
            .build_request(request_json)
            .await
            .send()
            .await
            .map_err(send_error)?;

        if let Some(session_id) = response.headers().get(SESSION_HEADER) {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write().await = Some(id.to_string());
            }
        }

        self.parse_response(response, request.id).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let notification_json = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "Sending streaming notification");

        let response = self
            .build_request(notification_json)
            .await
            .send()
            .await
            .map_err(send_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }

        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(id) = self.session_id.write().await.take() {
            let result = self
                .client
                .delete(self.endpoint.clone())
                .header("Authorization", &self.authorization)
                .header(SESSION_HEADER, &id)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Session termination request failed");
            }
        }

        debug!("Closed streaming transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
