//! One-shot HTTP listener for the OAuth redirect.
//!
//! The listener accepts exactly one authorization result. It is owned by a
//! guard that aborts the accept task on drop, releasing the socket on every
//! exit path of the flow.

use crate::error::{AuthError, AuthResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Path the provider redirects to.
pub const CALLBACK_PATH: &str = "/";

/// How long a connected client may take to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// HTML response for successful authorization.
const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>bqgate - Authentication Successful</title>
  <style>
    body { font-family: system-ui, -apple-system, sans-serif; padding: 40px; text-align: center; }
    h1 { color: #15803d; }
    p { color: #555; }
  </style>
</head>
<body>
  <h1>Authentication Successful</h1>
  <p>You can close this window and return to your terminal.</p>
</body>
</html>"#;

/// HTML response for failed authorization.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>bqgate - Authentication Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; padding: 40px; text-align: center; }}
    h1 {{ color: #b91c1c; }}
    .error {{ font-family: monospace; margin-top: 1rem; }}
  </style>
</head>
<body>
  <h1>Authentication Failed</h1>
  <div class="error">{}</div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// A bound redirect listener waiting for its single authorization result.
pub struct CallbackListener {
    port: u16,
    result: oneshot::Receiver<AuthResult<String>>,
    task: JoinHandle<()>,
}

impl CallbackListener {
    /// Bind `127.0.0.1:<port>` and start accepting callbacks.
    ///
    /// Port `0` picks an ephemeral port; see [`port`](Self::port). When
    /// `expected_state` is set, a callback carrying a different `state` is
    /// rejected as [`AuthError::StateMismatch`].
    pub async fn bind(port: u16, expected_state: Option<String>) -> AuthResult<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::PortUnavailable {
                port,
                message: e.to_string(),
            })?;
        let port = listener.local_addr()?.port();

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, expected_state, tx));

        info!(port, "OAuth callback listener started");

        Ok(Self {
            port,
            result: rx,
            task,
        })
    }

    /// Port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI to register with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Wait for the authorization result.
    pub async fn wait(&mut self, timeout: Duration) -> AuthResult<String> {
        match tokio::time::timeout(timeout, &mut self.result).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::Io(std::io::Error::other(
                "OAuth callback listener stopped unexpectedly",
            ))),
            Err(_) => Err(AuthError::UserTimeout(timeout)),
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.task.abort();
        debug!(port = self.port, "OAuth callback listener released");
    }
}

/// Sender of the single authorization result, shared by connection tasks.
type ResultSlot = Arc<Mutex<Option<oneshot::Sender<AuthResult<String>>>>>;

/// Accept connections, serving each on its own task so an idle client
/// cannot hold up the redirect. The first callback takes the slot.
async fn accept_loop(
    listener: TcpListener,
    expected_state: Option<String>,
    sender: oneshot::Sender<AuthResult<String>>,
) {
    let slot: ResultSlot = Arc::new(Mutex::new(Some(sender)));
    let expected_state: Option<Arc<str>> = expected_state.map(Arc::from);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted OAuth callback connection");
                let slot = Arc::clone(&slot);
                let expected_state = expected_state.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_connection(stream, expected_state.as_deref(), &slot).await
                    {
                        warn!(error = %e, "Error handling OAuth callback");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Error accepting connection");
            }
        }
    }
}

/// Handle one HTTP request on the redirect listener.
async fn handle_connection(
    mut stream: TcpStream,
    expected_state: Option<&str>,
    slot: &ResultSlot,
) -> AuthResult<()> {
    let mut buffer = [0u8; 4096];
    let n = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buffer)).await {
        Ok(read) => read?,
        Err(_) => return Ok(()),
    };

    let request = String::from_utf8_lossy(&buffer[..n]);

    // Parse HTTP request line
    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        return respond(&mut stream, 400, "text/plain", "Bad Request").await;
    }

    if parts[0] != "GET" {
        return respond(&mut stream, 405, "text/plain", "Method Not Allowed").await;
    }

    let parsed = match url::Url::parse(&format!("http://127.0.0.1{}", parts[1])) {
        Ok(u) => u,
        Err(_) => return respond(&mut stream, 400, "text/plain", "Invalid URL").await,
    };

    if parsed.path() != CALLBACK_PATH {
        return respond(&mut stream, 404, "text/plain", "Not Found").await;
    }

    let params: HashMap<String, String> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let taken = slot.lock().await.take();
    let Some(sender) = taken else {
        debug!("Ignoring OAuth callback after the first");
        let html = html_error("Authorization was already completed for this request.");
        return respond(&mut stream, 400, "text/html", &html).await;
    };

    let outcome = callback_outcome(&params, expected_state);
    debug!(
        has_code = params.contains_key("code"),
        success = outcome.is_ok(),
        "Received OAuth callback"
    );

    let written = match &outcome {
        Ok(_) => respond(&mut stream, 200, "text/html", HTML_SUCCESS).await,
        Err(e) => respond(&mut stream, 400, "text/html", &html_error(&e.to_string())).await,
    };

    // The waiter may drop the listener as soon as it has a result, so the
    // response goes out first.
    let _ = sender.send(outcome);
    written
}

/// Decide the terminal value carried by a callback's query parameters.
fn callback_outcome(
    params: &HashMap<String, String>,
    expected_state: Option<&str>,
) -> AuthResult<String> {
    if let Some(error) = params.get("error") {
        let message = match params.get("error_description") {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        return Err(AuthError::AuthorizationDenied(message));
    }

    if let Some(expected) = expected_state {
        if params.get("state").map(String::as_str) != Some(expected) {
            return Err(AuthError::StateMismatch);
        }
    }

    match params.get("code") {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => Err(AuthError::MissingCode),
    }
}

/// Write an HTTP response.
async fn respond(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
) -> AuthResult<()> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Unknown",
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn get(port: u16, query: &str) -> reqwest::Response {
        reqwest::get(format!("http://127.0.0.1:{port}/{query}"))
            .await
            .unwrap()
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
        assert_eq!(html_escape("it's"), "it&#39;s");
    }

    #[test]
    fn test_html_error_escapes() {
        let html = html_error("<script>alert('xss')</script>");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>alert"));
    }

    #[test]
    fn test_outcome_code() {
        let result = callback_outcome(&params(&[("code", "4/abc"), ("state", "s")]), Some("s"));
        assert_eq!(result.unwrap(), "4/abc");
    }

    #[test]
    fn test_outcome_error_param() {
        let result = callback_outcome(
            &params(&[("error", "access_denied"), ("error_description", "User said no")]),
            None,
        );
        match result {
            Err(AuthError::AuthorizationDenied(msg)) => {
                assert_eq!(msg, "access_denied: User said no");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_outcome_missing_code() {
        let result = callback_outcome(&params(&[("scope", "x")]), None);
        assert!(matches!(result, Err(AuthError::MissingCode)));
    }

    #[test]
    fn test_outcome_state_mismatch() {
        let result = callback_outcome(&params(&[("code", "c"), ("state", "other")]), Some("s"));
        assert!(matches!(result, Err(AuthError::StateMismatch)));

        let result = callback_outcome(&params(&[("code", "c")]), Some("s"));
        assert!(matches!(result, Err(AuthError::StateMismatch)));
    }

    #[tokio::test]
    async fn test_only_first_callback_counts() {
        let mut listener = CallbackListener::bind(0, None).await.unwrap();
        let port = listener.port();

        let first = get(port, "?code=first").await;
        assert_eq!(first.status(), 200);
        assert!(first.text().await.unwrap().contains("Authentication Successful"));

        let second = get(port, "?code=second").await;
        assert_eq!(second.status(), 400);
        assert!(second.text().await.unwrap().contains("already completed"));

        let code = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "first");
    }

    #[tokio::test]
    async fn test_other_paths_do_not_count() {
        let mut listener = CallbackListener::bind(0, None).await.unwrap();
        let port = listener.port();

        let favicon = reqwest::get(format!("http://127.0.0.1:{port}/favicon.ico"))
            .await
            .unwrap();
        assert_eq!(favicon.status(), 404);

        assert_eq!(get(port, "?code=real").await.status(), 200);
        assert_eq!(listener.wait(Duration::from_secs(5)).await.unwrap(), "real");
    }

    #[tokio::test]
    async fn test_error_callback_responds_400() {
        let mut listener = CallbackListener::bind(0, None).await.unwrap();
        let response = get(listener.port(), "?error=access_denied").await;
        assert_eq!(response.status(), 400);

        let result = listener.wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AuthError::AuthorizationDenied(_))));
    }

    #[tokio::test]
    async fn test_missing_code_responds_400() {
        let mut listener = CallbackListener::bind(0, None).await.unwrap();
        let response = get(listener.port(), "").await;
        assert_eq!(response.status(), 400);

        let result = listener.wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AuthError::MissingCode)));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let mut listener = CallbackListener::bind(0, None).await.unwrap();
        let result = listener.wait(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AuthError::UserTimeout(_))));
    }

    #[tokio::test]
    async fn test_port_unavailable() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = CallbackListener::bind(port, None).await;
        match result {
            Err(AuthError::PortUnavailable { port: p, .. }) => assert_eq!(p, port),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("bind should fail on a taken port"),
        }
    }

    #[tokio::test]
    async fn test_drop_releases_port() {
        let listener = CallbackListener::bind(0, None).await.unwrap();
        let port = listener.port();
        drop(listener);

        // The aborted task drops the socket once the runtime polls it.
        let mut rebound = None;
        for _ in 0..50 {
            match CallbackListener::bind(port, None).await {
                Ok(l) => {
                    rebound = Some(l);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        assert!(rebound.is_some());
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_delay_callback() {
        let mut listener = CallbackListener::bind(0, None).await.unwrap();
        let port = listener.port();

        // Connected but silent, like a browser's speculative socket.
        let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let response = get(port, "?code=real").await;
        assert_eq!(response.status(), 200);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "callback took {:?}",
            started.elapsed()
        );

        let code = listener.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(code, "real");
    }

    #[tokio::test]
    async fn test_redirect_uri() {
        let listener = CallbackListener::bind(0, None).await.unwrap();
        assert_eq!(
            listener.redirect_uri(),
            format!("http://localhost:{}", listener.port())
        );
    }
}
