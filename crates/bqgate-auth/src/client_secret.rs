//! OAuth client registration loaded from the provider's client secret file.

use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default authorization endpoint for Google installed applications.
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Default token endpoint for Google installed applications.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth client registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Layout of the downloaded file: the registration sits under `installed` or `web`.
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Create a registration with the default Google endpoints.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            project_id: None,
            redirect_uris: Vec::new(),
        }
    }

    /// Override the authorization and token endpoints.
    pub fn with_endpoints(mut self, auth_uri: impl Into<String>, token_uri: impl Into<String>) -> Self {
        self.auth_uri = auth_uri.into();
        self.token_uri = token_uri.into();
        self
    }

    /// Parse the contents of a client secret file.
    pub fn from_json(content: &str) -> AuthResult<Self> {
        let file: ClientSecretFile = serde_json::from_str(content)
            .map_err(|e| AuthError::Config(format!("Invalid client secret file: {e}")))?;

        let secret = file.installed.or(file.web).ok_or_else(|| {
            AuthError::Config(
                "Client secret file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })?;

        for (name, value) in [("auth_uri", &secret.auth_uri), ("token_uri", &secret.token_uri)] {
            url::Url::parse(value)
                .map_err(|e| AuthError::Config(format!("Invalid {name} '{value}': {e}")))?;
        }

        Ok(secret)
    }

    /// Load a client secret file from disk.
    pub async fn load(path: &Path) -> AuthResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AuthError::Config(format!(
                "Cannot read client secret file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }
}
