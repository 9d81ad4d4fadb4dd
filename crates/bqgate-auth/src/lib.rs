//! OAuth 2.0 credential lifecycle for bqgate.
//!
//! This crate obtains, stores and refreshes bearer credentials for Google
//! APIs using the installed-application authorization-code flow.
//!
//! # Components
//!
//! - [`CredentialStore`]: one JSON credential file, written atomically and
//!   checked against the scopes the caller needs
//! - [`FlowController`]: the interactive flow, with a one-shot local redirect
//!   listener and PKCE
//! - [`TokenManager`]: returns a valid token, refreshing or re-authorizing
//!
//! # Storage Location
//!
//! By default credentials live in the platform data directory:
//! - Linux: `~/.local/share/bqgate/token.json`
//! - macOS: `~/Library/Application Support/bqgate/token.json`
//! - Windows: `%APPDATA%/bqgate/token.json`
//!
//! The file is created with restrictive permissions (0600 on Unix).
//!
//! # Example
//!
//! ```no_run
//! use bqgate_auth::{ClientSecret, CredentialStore, FlowController, TokenManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), bqgate_auth::AuthError> {
//! let client = ClientSecret::load("client_secret.json".as_ref()).await?;
//! let scopes = vec!["https://www.googleapis.com/auth/bigquery".to_string()];
//!
//! let manager = TokenManager::new(
//!     CredentialStore::new(scopes)?,
//!     Arc::new(FlowController::new(client)?),
//!     8080,
//! );
//! let token = manager.get_valid_token().await?;
//! # Ok(())
//! # }
//! ```

pub mod callback;
mod client_secret;
mod credential;
mod error;
pub mod flow;
mod manager;
mod store;

pub use callback::CallbackListener;
pub use client_secret::{ClientSecret, GOOGLE_AUTH_URI, GOOGLE_TOKEN_URI};
pub use credential::{CredentialRecord, TokenResponse, EXPIRY_SKEW_SECS, TOKEN_TYPE};
pub use error::{AuthError, AuthResult};
pub use flow::{
    AuthorizationFlow, FlowController, PendingAuthorization, UrlHandler, DEFAULT_CALLBACK_TIMEOUT,
    DEFAULT_REDIRECT_PORT,
};
pub use manager::TokenManager;
pub use store::CredentialStore;

/// Scopes requested for BigQuery access.
pub const BIGQUERY_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/bigquery",
    "https://www.googleapis.com/auth/bigquery.readonly",
    "https://www.googleapis.com/auth/cloud-platform",
];

/// Get the default credential file path for the current platform.
///
/// Returns `None` if the data directory cannot be determined.
pub fn default_credentials_path() -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|p| p.join("bqgate").join("token.json"))
}
