//! OAuth 2.0 authorization-code flow with a local redirect.
//!
//! Implements the installed-application flow with PKCE: bind the redirect
//! listener, send the user to the consent page, wait for the single callback,
//! then exchange the code at the token endpoint.

use crate::callback::CallbackListener;
use crate::client_secret::ClientSecret;
use crate::credential::{CredentialRecord, TokenResponse};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default redirect listener port.
pub const DEFAULT_REDIRECT_PORT: u16 = 8080;

/// Default time the user has to complete the browser consent.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout for token endpoint requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives the authorization URL so it can be shown to the user.
pub type UrlHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Obtains fresh credentials: either a full interactive flow or a refresh.
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// Run the full authorization-code flow.
    async fn run_flow(&self, scopes: &[String], redirect_port: u16)
        -> AuthResult<CredentialRecord>;

    /// Exchange the record's refresh token for a new access token.
    async fn refresh(&self, record: &CredentialRecord) -> AuthResult<TokenResponse>;
}

/// An authorization request waiting for its redirect.
pub struct PendingAuthorization {
    /// URL the user must open.
    pub authorization_url: String,
    /// Port the redirect listener is bound to.
    pub redirect_port: u16,
    redirect_uri: String,
    code_verifier: String,
    listener: CallbackListener,
}

/// Drives the interactive authorization flow for one OAuth client.
pub struct FlowController {
    client: ClientSecret,
    http: reqwest::Client,
    callback_timeout: Duration,
    open_browser: bool,
    url_handler: Option<UrlHandler>,
    /// Held for the duration of a flow.
    active: Mutex<()>,
}

impl FlowController {
    /// Create a controller for the given client registration.
    pub fn new(client: ClientSecret) -> AuthResult<Self> {
        Ok(Self {
            client,
            http: build_http_client(DEFAULT_HTTP_TIMEOUT)?,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            open_browser: true,
            url_handler: None,
            active: Mutex::new(()),
        })
    }

    /// Set how long to wait for the browser redirect.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Set the timeout for token endpoint requests.
    pub fn with_http_timeout(mut self, timeout: Duration) -> AuthResult<Self> {
        self.http = build_http_client(timeout)?;
        Ok(self)
    }

    /// Enable or disable launching the system browser.
    pub fn with_open_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Register a handler that receives the authorization URL.
    pub fn with_url_handler(mut self, handler: UrlHandler) -> Self {
        self.url_handler = Some(handler);
        self
    }

    /// Client registration in use.
    pub fn client(&self) -> &ClientSecret {
        &self.client
    }

    /// Bind the redirect listener and build the authorization URL.
    async fn begin(&self, scopes: &[String], redirect_port: u16) -> AuthResult<PendingAuthorization> {
        let state = generate_state();
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);

        // The listener must be ready before the user can finish consenting.
        let listener = CallbackListener::bind(redirect_port, Some(state.clone())).await?;
        let redirect_uri = listener.redirect_uri();

        let authorization_url = build_auth_url(
            &self.client.auth_uri,
            &self.client.client_id,
            &redirect_uri,
            scopes,
            &state,
            &code_challenge,
        );

        Ok(PendingAuthorization {
            authorization_url,
            redirect_port: listener.port(),
            redirect_uri,
            code_verifier,
            listener,
        })
    }

    /// Show the authorization URL and try to open it in a browser.
    fn present(&self, url: &str) {
        info!(url = %url, "Open this URL to authorize access");

        if let Some(handler) = &self.url_handler {
            handler(url);
        }

        if self.open_browser {
            if let Err(e) = open::that(url) {
                warn!(error = %e, "Could not open browser; open the URL manually");
            }
        }
    }
}

#[async_trait]
impl AuthorizationFlow for FlowController {
    async fn run_flow(
        &self,
        scopes: &[String],
        redirect_port: u16,
    ) -> AuthResult<CredentialRecord> {
        let _active = self.active.try_lock().map_err(|_| AuthError::FlowInProgress)?;

        let mut pending = self.begin(scopes, redirect_port).await?;
        self.present(&pending.authorization_url);

        let code = pending.listener.wait(self.callback_timeout).await?;
        debug!(port = pending.redirect_port, "Received authorization code");

        let tokens = exchange_code(
            &self.http,
            &self.client.token_uri,
            &self.client.client_id,
            &self.client.client_secret,
            &code,
            &pending.redirect_uri,
            &pending.code_verifier,
        )
        .await?;

        info!(client_id = %self.client.client_id, "Authorization flow completed");
        Ok(CredentialRecord::from_token_response(
            tokens,
            &self.client,
            scopes,
        ))
    }

    async fn refresh(&self, record: &CredentialRecord) -> AuthResult<TokenResponse> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::RefreshFailed("No refresh token".to_string()))?;

        refresh_tokens(
            &self.http,
            &record.token_uri,
            &record.client_id,
            &record.client_secret,
            refresh_token,
        )
        .await
    }
}

fn build_http_client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {e}")))
}

/// Generate PKCE code verifier.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate PKCE code challenge from verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate OAuth state parameter.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Build authorization URL.
///
/// Requests offline access with forced consent so the provider issues a
/// refresh token.
pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    code_challenge: &str,
) -> String {
    let separator = if auth_endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
        auth_endpoint,
        separator,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    )
}

/// Exchange authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> AuthResult<TokenResponse> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("code_verifier", code_verifier),
    ];

    let response = http
        .post(token_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::ExchangeFailed(format!("Token request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::ExchangeFailed(format!("{status}: {text}")));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::ExchangeFailed(format!("Invalid token response: {e}")))
}

/// Refresh tokens using refresh token.
pub async fn refresh_tokens(
    http: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> AuthResult<TokenResponse> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];

    let response = http
        .post(token_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("Refresh request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!("{status}: {text}")));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("Invalid refresh response: {e}")))
}
