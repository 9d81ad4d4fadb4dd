//! Token lifecycle tests: the manager driving the real flow controller
//! against a mock token endpoint.

use bqgate_auth::{
    ClientSecret, CredentialRecord, CredentialStore, FlowController, TokenManager, UrlHandler,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/bigquery".to_string()]
}

fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
}

/// Plays the browser: follows the redirect with the given code.
fn browser(code: &'static str) -> UrlHandler {
    Arc::new(move |url: &str| {
        let state = query_param(url, "state").unwrap();
        let redirect = query_param(url, "redirect_uri")
            .unwrap()
            .replace("localhost", "127.0.0.1");
        tokio::spawn(async move {
            let _ = reqwest::get(format!("{redirect}/?code={code}&state={state}")).await;
        });
    })
}

fn manager(server: &MockServer, dir: &TempDir) -> TokenManager {
    let client = ClientSecret::new("client-id", "client-secret")
        .with_endpoints("https://accounts.example.com/auth", format!("{}/token", server.uri()));
    let flow = FlowController::new(client)
        .unwrap()
        .with_open_browser(false)
        .with_callback_timeout(Duration::from_secs(10))
        .with_url_handler(browser("auth-code"));

    TokenManager::new(
        CredentialStore::with_path(dir.path().join("token.json"), scopes()),
        Arc::new(flow),
        0,
    )
}

async fn mount_exchange(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.from-flow",
            "token_type": "Bearer",
            "expires_in": 3599,
            "refresh_token": "1//refresh",
            "scope": "https://www.googleapis.com/auth/bigquery"
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn expired_record(server: &MockServer) -> CredentialRecord {
    CredentialRecord {
        access_token: "ya29.stale".to_string(),
        refresh_token: Some("1//refresh".to_string()),
        token_uri: format!("{}/token", server.uri()),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        scopes: scopes().into_iter().collect(),
        expiry: Some(Utc::now() - ChronoDuration::hours(1)),
    }
}

#[tokio::test]
async fn test_first_use_authorizes_and_persists() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_exchange(&server, 1).await;

    let token = manager(&server, &dir).get_valid_token().await.unwrap();
    assert_eq!(token, "ya29.from-flow");

    // A new process finds the saved record and needs no network.
    let again = manager(&server, &dir).get_valid_token().await.unwrap();
    assert_eq!(again, "ya29.from-flow");

    let saved = CredentialStore::with_path(dir.path().join("token.json"), scopes())
        .load()
        .await
        .unwrap();
    assert_eq!(saved.refresh_token.as_deref(), Some("1//refresh"));
    assert!(saved.expiry.is_some());
}

#[tokio::test]
async fn test_expired_record_is_refreshed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_exchange(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.refreshed",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = CredentialStore::with_path(dir.path().join("token.json"), scopes());
    store.save(&expired_record(&server)).await.unwrap();

    let manager = manager(&server, &dir);
    assert_eq!(manager.get_valid_token().await.unwrap(), "ya29.refreshed");
    assert_eq!(manager.get_valid_token().await.unwrap(), "ya29.refreshed");

    let saved = store.load().await.unwrap();
    assert_eq!(saved.access_token, "ya29.refreshed");
    assert_eq!(saved.refresh_token.as_deref(), Some("1//refresh"));
    assert!(!saved.is_expired());
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_flow() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_exchange(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error": "invalid_grant"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = CredentialStore::with_path(dir.path().join("token.json"), scopes());
    store.save(&expired_record(&server)).await.unwrap();

    let token = manager(&server, &dir).get_valid_token().await.unwrap();
    assert_eq!(token, "ya29.from-flow");
    assert_eq!(store.load().await.unwrap().access_token, "ya29.from-flow");
}
