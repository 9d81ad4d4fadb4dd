//! Error types for authentication operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading, obtaining or refreshing credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad configuration (missing client secret file, malformed URL, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable credentials at the given location.
    #[error("No usable credentials at {}", .0.display())]
    NotFound(PathBuf),

    /// The credential file exists but cannot be parsed.
    #[error("Corrupt credential file {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    /// Failed to read or write a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to set file permissions.
    #[error("Failed to set file permissions: {0}")]
    Permissions(String),

    /// Could not determine the data directory.
    #[error("Could not determine data directory")]
    NoDataDir,

    /// The redirect listener could not bind its port.
    #[error("Could not listen for the OAuth redirect on port {port}: {message}")]
    PortUnavailable { port: u16, message: String },

    /// No callback arrived before the deadline.
    #[error("Timed out after {}s waiting for the browser authorization", .0.as_secs())]
    UserTimeout(Duration),

    /// The provider redirected back with an error parameter.
    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    /// The callback carried a state parameter we did not issue.
    #[error("OAuth state mismatch in redirect callback")]
    StateMismatch,

    /// The callback carried neither a code nor an error.
    #[error("No authorization code in redirect callback")]
    MissingCode,

    /// Exchanging the authorization code for tokens failed.
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// Refreshing an expired access token failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Another flow is already running on this controller.
    #[error("An authorization flow is already in progress")]
    FlowInProgress,
}

impl AuthError {
    /// Name of the authentication step that produced this error.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::NoDataDir => "configuration",
            Self::NotFound(_)
            | Self::Corrupt { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Permissions(_) => "credential storage",
            Self::PortUnavailable { .. } => "listener bind",
            Self::UserTimeout(_) => "callback wait",
            Self::AuthorizationDenied(_) | Self::StateMismatch | Self::MissingCode => {
                "authorization callback"
            }
            Self::ExchangeFailed(_) => "token exchange",
            Self::RefreshFailed(_) => "token refresh",
            Self::FlowInProgress => "flow start",
        }
    }

    /// Whether this error was raised by the interactive authorization flow.
    pub fn is_flow_error(&self) -> bool {
        matches!(
            self,
            Self::PortUnavailable { .. }
                | Self::UserTimeout(_)
                | Self::AuthorizationDenied(_)
                | Self::StateMismatch
                | Self::MissingCode
                | Self::ExchangeFailed(_)
                | Self::FlowInProgress
        )
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        let err = AuthError::PortUnavailable {
            port: 8080,
            message: "in use".to_string(),
        };
        assert_eq!(err.step(), "listener bind");
        assert_eq!(
            AuthError::UserTimeout(Duration::from_secs(5)).step(),
            "callback wait"
        );
        assert_eq!(
            AuthError::ExchangeFailed("bad".to_string()).step(),
            "token exchange"
        );
    }

    #[test]
    fn test_error_display() {
        let err = AuthError::UserTimeout(Duration::from_secs(300));
        assert_eq!(
            err.to_string(),
            "Timed out after 300s waiting for the browser authorization"
        );

        let err = AuthError::NotFound(PathBuf::from("/tmp/token.json"));
        assert_eq!(err.to_string(), "No usable credentials at /tmp/token.json");
    }

    #[test]
    fn test_is_flow_error() {
        assert!(AuthError::MissingCode.is_flow_error());
        assert!(AuthError::ExchangeFailed("x".to_string()).is_flow_error());
        assert!(!AuthError::RefreshFailed("x".to_string()).is_flow_error());
        assert!(!AuthError::Config("x".to_string()).is_flow_error());
    }
}
