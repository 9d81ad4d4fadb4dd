//! Direct transport: one authenticated JSON-RPC POST per request, no
//! handshake and no session state.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{
    check_status, parse_json_response, send_error, with_quota_project, Transport,
};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Direct transport bound to one endpoint and bearer token.
pub struct DirectTransport {
    endpoint: Url,
    authorization: String,
    quota_project: Option<String>,
    client: Client,
    open: AtomicBool,
}

impl DirectTransport {
    /// Create a transport.
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
            open: AtomicBool::new(true),
        })
    }

    /// Bill requests to `project`. An empty project sends no header.
    pub fn with_quota_project(mut self, project: &str) -> Self {
        self.quota_project = (!project.is_empty()).then(|| project.to_string());
        self
    }

    async fn post(&self, body: String) -> McpResult<reqwest::Response> {
        let req = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", &self.authorization)
            .body(body);

        with_quota_project(req, self.quota_project.as_deref())
            .send()
            .await
            .map_err(send_error)
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        debug!(id = request.id, method = %request.method, "Sending direct request");

        let response = check_status(self.post(serde_json::to_string(&request)?).await?).await?;
        let text = response
            .text()
            .await
            .map_err(|e| McpError::protocol_error(format!("Failed to read response: {e}")))?;

        parse_json_response(&text)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        debug!(method = %notification.method, "Sending direct notification");
        check_status(self.post(serde_json::to_string(&notification)?).await?).await?;
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.open.store(false, Ordering::SeqCst);
        debug!("Closed direct transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
