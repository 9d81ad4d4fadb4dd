//! Transport negotiation.
//!
//! Strategies are tried in order: the streaming transport (with its
//! `initialize` handshake) when enabled, then the direct transport. The
//! first one that succeeds fixes the session kind for the session's life.

use crate::config::ClientConfig;
use crate::direct::DirectTransport;
use crate::error::{McpError, McpResult};
use crate::protocol::InitializeResult;
use crate::streaming::StreamingTransport;
use crate::transport::Transport;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Request id used by the streaming handshake. Client calls start at 1.
const HANDSHAKE_ID: u64 = 0;

/// Kind of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Streamable HTTP with an initialized MCP session.
    Streaming,
    /// Authenticated request client without handshake.
    Direct,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Streaming => write!(f, "streaming"),
            TransportKind::Direct => write!(f, "direct"),
        }
    }
}

/// Transport behind a session.
pub enum SessionTransport {
    Streaming {
        transport: StreamingTransport,
        init: InitializeResult,
    },
    Direct(DirectTransport),
}

/// An established, authenticated session with the MCP endpoint.
pub struct Session {
    transport: SessionTransport,
    endpoint: Url,
    authorization: String,
    project_id: String,
}

impl Session {
    /// Kind of the session.
    pub fn kind(&self) -> TransportKind {
        match self.transport {
            SessionTransport::Streaming { .. } => TransportKind::Streaming,
            SessionTransport::Direct(_) => TransportKind::Direct,
        }
    }

    /// Endpoint the session talks to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Project the session operates on.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// `Authorization` header value.
    pub(crate) fn authorization(&self) -> &str {
        &self.authorization
    }

    /// Handshake result of a streaming session.
    pub fn initialize_result(&self) -> Option<&InitializeResult> {
        match &self.transport {
            SessionTransport::Streaming { init, .. } => Some(init),
            SessionTransport::Direct(_) => None,
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        match &self.transport {
            SessionTransport::Streaming { transport, .. } => transport,
            SessionTransport::Direct(transport) => transport,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind())
            .field("endpoint", &self.endpoint.as_str())
            .field("project_id", &self.project_id)
            .field("authorization", &"[REDACTED]")
            .finish()
    }
}

/// Ordered strategies for a configuration.
pub fn strategies(config: &ClientConfig) -> Vec<TransportKind> {
    if config.prefer_streaming {
        vec![TransportKind::Streaming, TransportKind::Direct]
    } else {
        vec![TransportKind::Direct]
    }
}

/// Establish a session with the configured endpoint.
///
/// Fails with [`McpError::Config`] on a malformed endpoint and with the
/// direct transport's error when no strategy succeeds. A failing streaming
/// attempt is logged and never surfaces.
pub async fn connect(config: &ClientConfig, token: &str) -> McpResult<Session> {
    let endpoint = parse_endpoint(&config.endpoint)?;
    let authorization = format!("Bearer {token}");
    let timeout = config.timeout();

    let mut last_error = None;
    for kind in strategies(config) {
        match establish(kind, &endpoint, &authorization, &config.project_id, timeout).await {
            Ok(transport) => {
                info!(%endpoint, transport = %kind, "MCP session established");
                return Ok(Session {
                    transport,
                    endpoint,
                    authorization,
                    project_id: config.project_id.clone(),
                });
            }
            Err(e) => {
                warn!(%endpoint, transport = %kind, error = %e, "Transport unavailable");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| McpError::connection_failed("No transport strategy")))
}

async fn establish(
    kind: TransportKind,
    endpoint: &Url,
    authorization: &str,
    project_id: &str,
    timeout: Duration,
) -> McpResult<SessionTransport> {
    match kind {
        TransportKind::Streaming => {
            let transport =
                StreamingTransport::new(endpoint.clone(), authorization.to_string(), timeout)?
                    .with_quota_project(project_id);
            let init = tokio::time::timeout(timeout, transport.initialize(HANDSHAKE_ID))
                .await
                .map_err(|_| McpError::Timeout)??;
            Ok(SessionTransport::Streaming { transport, init })
        }
        TransportKind::Direct => Ok(SessionTransport::Direct(
            DirectTransport::new(endpoint.clone(), authorization.to_string(), timeout)?
                .with_quota_project(project_id),
        )),
    }
}

fn parse_endpoint(endpoint: &str) -> McpResult<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| McpError::Config(format!("Invalid endpoint '{endpoint}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(McpError::Config(format!(
            "Unsupported endpoint scheme '{scheme}'"
        ))),
    }
}
