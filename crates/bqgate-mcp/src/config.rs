//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// BigQuery's remote MCP endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/mcp";

/// BigQuery REST API root used by the query fallback.
pub const DEFAULT_REST_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Remote tool that runs SQL.
pub const DEFAULT_SQL_TOOL: &str = "execute_sql";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for one RPC client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// MCP endpoint URL.
    pub endpoint: String,
    /// Project the queries are billed to and run in.
    pub project_id: String,
    /// Name of the remote SQL tool.
    pub sql_tool: String,
    /// Argument of the SQL tool carrying the query text.
    pub query_argument: String,
    /// Argument of the SQL tool carrying the project id.
    pub project_argument: String,
    /// REST API root for the query fallback.
    pub rest_base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Try the streaming transport before the direct one.
    pub prefer_streaming: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project_id: String::new(),
            sql_tool: DEFAULT_SQL_TOOL.to_string(),
            query_argument: "query".to_string(),
            project_argument: "projectId".to_string(),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            prefer_streaming: true,
        }
    }
}

impl ClientConfig {
    /// Default configuration for a project.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Set the MCP endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the REST API root.
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable or disable the streaming transport.
    pub fn with_streaming(mut self, prefer_streaming: bool) -> Self {
        self.prefer_streaming = prefer_streaming;
        self
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
