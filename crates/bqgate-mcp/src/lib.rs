//! Model Context Protocol (MCP) client for BigQuery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │   bqgate    │────▶│  RpcClient   │────▶│ BigQuery MCP    │
//! │             │◀────│              │◀────│ endpoint        │
//! └─────────────┘     └──────┬───────┘     └─────────────────┘
//!                            │ fallback    ┌─────────────────┐
//!                            └────────────▶│ BigQuery REST   │
//!                                          └─────────────────┘
//! ```
//!
//! # Transports
//!
//! - **Streaming**: streamable HTTP with an `initialize` handshake and a
//!   server-assigned session id
//! - **Direct**: plain JSON-RPC POSTs, used when the handshake fails
//!
//! # Example
//!
//! ```no_run
//! use bqgate_mcp::{ClientConfig, RpcClient};
//!
//! # async fn example(token: &str) -> bqgate_mcp::McpResult<()> {
//! let client = RpcClient::connect(ClientConfig::new("my-project"), token).await?;
//!
//! let tools = client.list_tools().await?;
//! let rows = client.query_table("my-project.sales.orders", 10).await?;
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod direct;
mod error;
mod negotiate;
pub mod protocol;
mod rest;
mod streaming;
mod transport;

pub use client::{table_query, RpcClient};
pub use config::{
    ClientConfig, DEFAULT_ENDPOINT, DEFAULT_REST_BASE_URL, DEFAULT_SQL_TOOL, DEFAULT_TIMEOUT_SECS,
};
pub use direct::DirectTransport;
pub use error::{McpError, McpResult};
pub use negotiate::{connect, strategies, Session, SessionTransport, TransportKind};
pub use protocol::{ServerInfo, ToolContent, ToolDescriptor, ToolResult};
pub use rest::RestFallback;
pub use streaming::{StreamingTransport, SESSION_HEADER};
pub use transport::Transport;
