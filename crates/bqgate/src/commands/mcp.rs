//! MCP command handlers.
//!
//! Each command authenticates, negotiates a session, runs one operation and
//! closes the session.

use super::auth::access_token;
use crate::config::Config;
use anyhow::Context;
use bqgate_mcp::{McpError, RpcClient, ToolResult};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Default number of rows read by `query`.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// List the tools offered by the endpoint.
pub async fn list_tools(config: &Config) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let result = client.list_tools().await;
    let tools = settle(result, client.close().await)?;
    for tool in &tools {
        match &tool.description {
            Some(description) => println!("{}\n    {}", tool.name, first_line(description)),
            None => println!("{}", tool.name),
        }
    }
    info!(tool_count = tools.len(), "Listed tools");
    Ok(())
}

/// Read rows of a table and print them as JSON.
pub async fn query_table(config: &Config, table: &str, limit: u32) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let result = client.query_table(table, limit).await;
    print_result(&settle(result, client.close().await)?)
}

/// Call a tool with JSON object arguments.
pub async fn call_tool(config: &Config, tool: &str, args: Option<&str>) -> anyhow::Result<()> {
    let arguments = parse_arguments(args)?;

    let client = connect(config).await?;
    let result = client.call_tool(tool, arguments).await;
    print_result(&settle(result, client.close().await)?)
}

async fn connect(config: &Config) -> anyhow::Result<RpcClient> {
    let token = access_token(config).await?;
    let client = RpcClient::connect(config.mcp.clone(), &token)
        .await
        .map_err(mcp_failure)?;

    let server = client.initialize().await?;
    debug!(
        server = %server.name,
        transport = %client.transport_kind(),
        "Connected"
    );
    Ok(client)
}

/// Combine an operation's result with the outcome of closing the session.
/// A close failure is reported only when the operation itself succeeded.
fn settle<T>(result: Result<T, McpError>, closed: Result<(), McpError>) -> anyhow::Result<T> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close)) => Err(mcp_failure(close)),
        (Err(e), Ok(())) => Err(mcp_failure(e)),
        (Err(e), Err(close)) => {
            warn!(error = %close, "Failed to close MCP session");
            Err(mcp_failure(e))
        }
    }
}

fn parse_arguments(args: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    match args {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str(text).context("--args is not valid JSON")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("--args must be a JSON object"),
        },
    }
}

fn print_result(result: &ToolResult) -> anyhow::Result<()> {
    let output = match (&result.structured_content, result.rows()) {
        (_, Some(rows)) => serde_json::to_string_pretty(&rows)?,
        (Some(structured), None) => serde_json::to_string_pretty(structured)?,
        (None, None) => result.text(),
    };
    println!("{output}");
    Ok(())
}

fn mcp_failure(error: McpError) -> anyhow::Error {
    match error {
        McpError::AuthRequired => anyhow::anyhow!(
            "The endpoint rejected the access token. Run `bqgate auth login` and retry."
        ),
        other => other.into(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
