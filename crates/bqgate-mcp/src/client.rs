//! MCP client implementation.

use crate::config::ClientConfig;
use crate::error::{McpError, McpResult};
use crate::negotiate::{self, Session, TransportKind};
use crate::protocol::{
    CallToolParams, JsonRpcRequest, ListToolsResult, ServerInfo, ToolDescriptor, ToolResult,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::rest::RestFallback;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// RPC client over one negotiated session.
///
/// Every call is bounded by the configured timeout. Calls to the SQL tool
/// that fail on the session are retried once through the REST query API.
pub struct RpcClient {
    session: Session,
    rest: RestFallback,
    config: ClientConfig,
    /// Request ID counter.
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RpcClient {
    /// Negotiate a session and build a client on it.
    pub async fn connect(config: ClientConfig, token: &str) -> McpResult<Self> {
        let session = negotiate::connect(&config, token).await?;
        Self::with_session(session, config)
    }

    /// Build a client on an established session.
    pub fn with_session(session: Session, config: ClientConfig) -> McpResult<Self> {
        let rest = RestFallback::new(
            &config.rest_base_url,
            session.authorization().to_string(),
            config.timeout(),
        )?;

        Ok(Self {
            session,
            rest,
            config,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Kind of the underlying session.
    pub fn transport_kind(&self) -> TransportKind {
        self.session.kind()
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Get the next request ID.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Whether the client is open and its transport still usable.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.session.transport().is_connected()
    }

    fn ensure_open(&self) -> McpResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(McpError::Closed)
        }
    }

    /// Server identity.
    ///
    /// Streaming sessions are initialized during negotiation, so this returns
    /// the cached handshake result. Direct sessions have no handshake and get
    /// a description of the endpoint instead. No request is sent either way.
    pub async fn initialize(&self) -> McpResult<ServerInfo> {
        self.ensure_open()?;

        Ok(match self.session.initialize_result() {
            Some(init) => init.server_info.clone(),
            None => ServerInfo {
                name: self
                    .session
                    .endpoint()
                    .host_str()
                    .unwrap_or("direct")
                    .to_string(),
                version: None,
            },
        })
    }

    /// List the remote tools.
    ///
    /// If the session cannot list tools, the catalog of the REST path is
    /// returned instead.
    pub async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        self.ensure_open()?;

        match self.rpc(METHOD_TOOLS_LIST, None).await.and_then(|result| {
            serde_json::from_value::<ListToolsResult>(result)
                .map_err(|e| McpError::protocol_error(e.to_string()))
        }) {
            Ok(result) => {
                debug!(tool_count = result.tools.len(), "Listed tools");
                Ok(result.tools)
            }
            Err(McpError::AuthRequired) => Err(McpError::AuthRequired),
            Err(e) => {
                warn!(error = %e, "Tool listing failed, using REST catalog");
                Ok(vec![self.rest_tool()])
            }
        }
    }

    /// Call a tool.
    ///
    /// A failed call to the SQL tool is retried through the REST query API.
    /// When that fails too the error carries both causes.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<ToolResult> {
        self.ensure_open()?;
        debug!(tool = name, transport = %self.transport_kind(), "Calling tool");

        let primary = match self.call_tool_rpc(name, &arguments).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let Some(query) = self.fallback_query(name, &arguments) else {
            return Err(primary);
        };

        warn!(tool = name, error = %primary, "Tool call failed, retrying through REST");
        let project = self.fallback_project(&arguments);

        match self.rest.query(&project, &query).await {
            Ok(value) => {
                info!(tool = name, "Tool call served by REST fallback");
                Ok(ToolResult::from_json(value))
            }
            Err(fallback) => Err(McpError::call_failed(primary, fallback)),
        }
    }

    /// Read up to `limit` rows of a `project.dataset.table`.
    pub async fn query_table(&self, table_id: &str, limit: u32) -> McpResult<ToolResult> {
        self.ensure_open()?;

        let sql = table_query(table_id, limit)?;
        let mut arguments = Map::new();
        arguments.insert(self.config.query_argument.clone(), Value::String(sql));
        if !self.session.project_id().is_empty() {
            arguments.insert(
                self.config.project_argument.clone(),
                Value::String(self.session.project_id().to_string()),
            );
        }

        self.call_tool(&self.config.sql_tool, arguments).await
    }

    /// Release the session. Later calls fail with [`McpError::Closed`];
    /// closing twice is a no-op.
    pub async fn close(&self) -> McpResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Client already closed");
            return Ok(());
        }

        self.session.transport().close().await?;
        info!(transport = %self.transport_kind(), "MCP session closed");
        Ok(())
    }

    async fn call_tool_rpc(&self, name: &str, arguments: &Map<String, Value>) -> McpResult<ToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: arguments.clone(),
        };

        let result: ToolResult =
            serde_json::from_value(self.rpc(METHOD_TOOLS_CALL, Some(serde_json::to_value(&params)?)).await?)
                .map_err(|e| McpError::protocol_error(e.to_string()))?;

        if result.is_error {
            return Err(McpError::tool_error(result.text()));
        }

        Ok(result)
    }

    /// Send one request on the session and unwrap its result.
    async fn rpc(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);

        let response = tokio::time::timeout(
            self.config.timeout(),
            self.session.transport().request(request),
        )
        .await
        .map_err(|_| McpError::Timeout)??;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| McpError::protocol_error(format!("Missing {method} result")))
    }

    /// SQL text of a call that the REST path can serve.
    fn fallback_query(&self, name: &str, arguments: &Map<String, Value>) -> Option<String> {
        if name != self.config.sql_tool {
            return None;
        }
        arguments
            .get(&self.config.query_argument)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn fallback_project(&self, arguments: &Map<String, Value>) -> String {
        arguments
            .get(&self.config.project_argument)
            .and_then(Value::as_str)
            .unwrap_or(self.session.project_id())
            .to_string()
    }

    /// Descriptor of the SQL tool as served by the REST path.
    fn rest_tool(&self) -> ToolDescriptor {
        let mut properties = Map::new();
        properties.insert(self.config.query_argument.clone(), json!({"type": "string"}));
        properties.insert(self.config.project_argument.clone(), json!({"type": "string"}));

        ToolDescriptor {
            name: self.config.sql_tool.clone(),
            description: Some("Run a GoogleSQL query through the BigQuery REST API".to_string()),
            input_schema: Some(json!({
                "type": "object",
                "properties": properties,
                "required": [self.config.query_argument]
            })),
        }
    }
}

/// Build the row-reading query for a fully qualified table id.
pub fn table_query(table_id: &str, limit: u32) -> McpResult<String> {
    if limit == 0 {
        return Err(McpError::InvalidArgument(
            "limit must be a positive integer".to_string(),
        ));
    }

    let parts: Vec<&str> = table_id.split('.').collect();
    let valid = parts.len() == 3
        && parts.iter().all(|part| {
            !part.is_empty() && !part.chars().any(|c| c == '`' || c.is_whitespace())
        });
    if !valid {
        return Err(McpError::InvalidArgument(format!(
            "'{table_id}' is not a project.dataset.table id"
        )));
    }

    Ok(format!("SELECT * FROM `{table_id}` LIMIT {limit}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_query() {
        assert_eq!(
            table_query("proj.ds.tbl", 5).unwrap(),
            "SELECT * FROM `proj.ds.tbl` LIMIT 5"
        );
        assert_eq!(
            table_query("my-proj.sales_2024.orders", 1000).unwrap(),
            "SELECT * FROM `my-proj.sales_2024.orders` LIMIT 1000"
        );
    }

    #[test]
    fn test_table_query_rejects_zero_limit() {
        assert!(matches!(
            table_query("proj.ds.tbl", 0),
            Err(McpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_table_query_rejects_bad_ids() {
        for id in [
            "ds.tbl",
            "a.b.c.d",
            "proj..tbl",
            "proj.ds.tbl` ; DROP",
            "proj.ds.t bl",
            "",
        ] {
            assert!(
                matches!(table_query(id, 5), Err(McpError::InvalidArgument(_))),
                "{id}"
            );
        }
    }
}
