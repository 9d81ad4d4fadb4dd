//! Token lifecycle: load, refresh or re-authorize, then persist.

use crate::credential::CredentialRecord;
use crate::error::{AuthError, AuthResult};
use crate::flow::AuthorizationFlow;
use crate::store::CredentialStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle state of the managed credentials.
#[derive(Debug, Clone)]
enum TokenState {
    /// Nothing loaded yet, or the store had nothing usable.
    NoCredentials,
    /// A record is in memory.
    Loaded(CredentialRecord),
}

/// Hands out valid access tokens, refreshing or re-authorizing as needed.
pub struct TokenManager {
    store: CredentialStore,
    flow: Arc<dyn AuthorizationFlow>,
    redirect_port: u16,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Create a manager. Required scopes are those of the store.
    pub fn new(store: CredentialStore, flow: Arc<dyn AuthorizationFlow>, redirect_port: u16) -> Self {
        Self {
            store,
            flow,
            redirect_port,
            state: Mutex::new(TokenState::NoCredentials),
        }
    }

    /// Credential store backing this manager.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Return a valid access token.
    ///
    /// Loads stored credentials on first use, refreshes expired ones when a
    /// refresh token exists, and otherwise runs the full authorization flow.
    /// A failed refresh falls through to the full flow. New credentials are
    /// persisted before the token is returned.
    pub async fn get_valid_token(&self) -> AuthResult<String> {
        let mut state = self.state.lock().await;

        if let TokenState::NoCredentials = *state {
            match self.store.load().await {
                Ok(record) => *state = TokenState::Loaded(record),
                Err(AuthError::NotFound(path)) => {
                    debug!(path = %path.display(), "No stored credentials");
                }
                Err(e @ AuthError::Corrupt { .. }) => {
                    warn!(error = %e, "Ignoring corrupt credential file");
                }
                Err(e) => return Err(e),
            }
        }

        if let TokenState::Loaded(record) = &mut *state {
            if !record.is_expired() {
                return Ok(record.access_token.clone());
            }

            if record.can_refresh() {
                info!("Refreshing expired access token");
                match self.flow.refresh(record).await {
                    Ok(tokens) => {
                        record.apply_refresh(tokens);
                        self.store.save(record).await?;
                        return Ok(record.access_token.clone());
                    }
                    Err(e) => {
                        warn!(error = %e, "Token refresh failed, starting a new authorization");
                    }
                }
            } else {
                info!("Access token expired and cannot be refreshed");
            }
        }

        let record = self.authorize().await?;
        let token = record.access_token.clone();
        *state = TokenState::Loaded(record);
        Ok(token)
    }

    /// Run the full flow and persist the result, replacing any stored record.
    ///
    /// Used by `get_valid_token` and for an explicit re-login.
    pub async fn login(&self) -> AuthResult<CredentialRecord> {
        let mut state = self.state.lock().await;
        let record = self.authorize().await?;
        *state = TokenState::Loaded(record.clone());
        Ok(record)
    }

    /// Current in-memory record, if any.
    pub async fn credentials(&self) -> Option<CredentialRecord> {
        match &*self.state.lock().await {
            TokenState::Loaded(record) => Some(record.clone()),
            TokenState::NoCredentials => None,
        }
    }

    async fn authorize(&self) -> AuthResult<CredentialRecord> {
        let record = self
            .flow
            .run_flow(self.store.required_scopes(), self.redirect_port)
            .await?;
        self.store.save(&record).await?;
        info!(path = %self.store.path().display(), "Saved new credentials");
        Ok(record)
    }
}
