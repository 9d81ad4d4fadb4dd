//! Authentication command handlers.
//!
//! Handles login and status for the Google OAuth credentials.

use crate::config::Config;
use bqgate_auth::{
    AuthError, ClientSecret, CredentialRecord, CredentialStore, FlowController, TokenManager,
};
use chrono::Utc;
use clap::Subcommand;
use std::sync::Arc;

/// Authentication subcommands.
#[derive(Subcommand)]
pub enum AuthCommands {
    /// Run the browser authorization flow and store fresh credentials
    Login,
    /// Show the stored credentials
    Status,
}

/// Handle authentication commands.
pub async fn handle_auth(command: AuthCommands, config: &Config) -> anyhow::Result<()> {
    match command {
        AuthCommands::Login => auth_login(config).await,
        AuthCommands::Status => auth_status(config).await,
    }
}

/// Credential store for the configured path and scopes.
pub fn credential_store(config: &Config) -> anyhow::Result<CredentialStore> {
    Ok(CredentialStore::with_path(
        config.credentials_path()?,
        config.scopes.clone(),
    ))
}

/// Build the token manager from configuration.
pub async fn token_manager(config: &Config) -> anyhow::Result<TokenManager> {
    let client = ClientSecret::load(config.client_secret_path()?)
        .await
        .map_err(|e| auth_failure(&e))?;

    let flow = FlowController::new(client)
        .map_err(|e| auth_failure(&e))?
        .with_callback_timeout(config.callback_timeout())
        .with_open_browser(config.open_browser);

    Ok(TokenManager::new(
        credential_store(config)?,
        Arc::new(flow),
        config.redirect_port,
    ))
}

/// Obtain a valid access token, authorizing interactively if needed.
pub async fn access_token(config: &Config) -> anyhow::Result<String> {
    token_manager(config)
        .await?
        .get_valid_token()
        .await
        .map_err(|e| auth_failure(&e))
}

/// Wrap an authentication error with the step that failed.
pub fn auth_failure(error: &AuthError) -> anyhow::Error {
    anyhow::anyhow!("Authentication failed during {}: {error}", error.step())
}

async fn auth_login(config: &Config) -> anyhow::Result<()> {
    let manager = token_manager(config).await?;

    if config.open_browser {
        eprintln!("Opening browser for Google sign-in...");
    }
    let record = manager.login().await.map_err(|e| auth_failure(&e))?;

    println!("Logged in.");
    println!("Credentials saved to {}", manager.store().path().display());
    print_record(&record);
    Ok(())
}

async fn auth_status(config: &Config) -> anyhow::Result<()> {
    let store = credential_store(config)?;
    println!("Credentials file: {}", store.path().display());

    match store.load().await {
        Ok(record) => {
            print_record(&record);
            Ok(())
        }
        Err(AuthError::NotFound(_)) => {
            println!("Not logged in (or stored scopes are insufficient).");
            println!("Run `bqgate auth login` to authenticate.");
            Ok(())
        }
        Err(e) => Err(auth_failure(&e)),
    }
}

fn print_record(record: &CredentialRecord) {
    match record.expiry {
        Some(expiry) if record.is_expired() => println!("Access token: expired at {expiry}"),
        Some(expiry) => {
            let minutes = (expiry - Utc::now()).num_minutes();
            println!("Access token: valid until {expiry} ({minutes} min)");
        }
        None => println!("Access token: no expiry recorded"),
    }

    println!(
        "Refresh token: {}",
        if record.can_refresh() { "present" } else { "absent" }
    );

    println!("Scopes:");
    for scope in &record.scopes {
        println!("  {scope}");
    }
}
