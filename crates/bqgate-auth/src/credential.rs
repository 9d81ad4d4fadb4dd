//! Credential record and token endpoint responses.

use crate::client_secret::ClientSecret;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tokens are treated as expired this long before their real expiry.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Token type of every record issued by this crate.
pub const TOKEN_TYPE: &str = "Bearer";

/// Bearer credentials as persisted to disk.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "expiry_format")]
    pub expiry: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Build a record from a successful authorization-code exchange.
    ///
    /// Granted scopes come from the response when the provider reports them,
    /// otherwise the requested scopes are assumed.
    pub fn from_token_response(
        tokens: TokenResponse,
        client: &ClientSecret,
        requested_scopes: &[String],
    ) -> Self {
        let scopes = match tokens.granted_scopes() {
            Some(granted) => granted,
            None => requested_scopes.iter().cloned().collect(),
        };

        Self {
            expiry: tokens.expiry_from(Utc::now()),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_uri: client.token_uri.clone(),
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            scopes,
        }
    }

    /// Apply a refresh response in place. The refresh token is kept unless the
    /// provider rotated it.
    pub fn apply_refresh(&mut self, tokens: TokenResponse) {
        self.expiry = tokens.expiry_from(Utc::now());
        if let Some(granted) = tokens.granted_scopes() {
            self.scopes = granted;
        }
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        self.access_token = tokens.access_token;
    }

    /// Token type, always `Bearer`.
    pub fn token_type(&self) -> &'static str {
        TOKEN_TYPE
    }

    /// Value for the HTTP `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{TOKEN_TYPE} {}", self.access_token)
    }

    /// Whether a refresh token is available.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the access token is expired (or about to be) right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the access token is expired at `now`. Records without an
    /// expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    /// Required scopes this record was not granted.
    pub fn missing_scopes<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|scope| !self.scopes.contains(scope.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Response body of the provider token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Scopes reported by the provider, if any.
    pub fn granted_scopes(&self) -> Option<BTreeSet<String>> {
        let scope = self.scope.as_deref()?.trim();
        if scope.is_empty() {
            return None;
        }
        Some(scope.split_whitespace().map(str::to_string).collect())
    }

    /// Absolute expiry, truncated to whole seconds so it survives persistence.
    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| (now + Duration::seconds(secs)).trunc_subsecs(0))
    }
}

/// `expiry` is written as `YYYY-MM-DDTHH:MM:SSZ` and read as RFC 3339 or a
/// naive timestamp in UTC.
mod expiry_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(expiry) => serializer.serialize_str(&expiry.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub(super) fn parse(value: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid expiry '{value}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(expiry: Option<DateTime<Utc>>, refresh: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            access_token: "ya29.access".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: ["a".to_string(), "b".to_string()].into_iter().collect(),
            expiry,
        }
    }

    #[test]
    fn test_is_expired_with_skew() {
        let expiry = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let rec = record(Some(expiry), None);

        assert!(!rec.is_expired_at(expiry - Duration::seconds(120)));
        assert!(rec.is_expired_at(expiry - Duration::seconds(30)));
        assert!(rec.is_expired_at(expiry + Duration::seconds(1)));
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let rec = record(None, None);
        assert!(!rec.is_expired());
    }

    #[test]
    fn test_can_refresh() {
        assert!(record(None, Some("1//refresh")).can_refresh());
        assert!(!record(None, None).can_refresh());
        assert!(!record(None, Some("")).can_refresh());
    }

    #[test]
    fn test_missing_scopes() {
        let rec = record(None, None);
        let required = vec!["a".to_string(), "c".to_string()];
        assert_eq!(rec.missing_scopes(&required), vec!["c"]);
        assert!(rec.missing_scopes(&["b".to_string()]).is_empty());
    }

    #[test]
    fn test_authorization_header() {
        let rec = record(None, None);
        assert_eq!(rec.token_type(), "Bearer");
        assert_eq!(rec.authorization_header(), "Bearer ya29.access");
    }

    #[test]
    fn test_expiry_serialization_format() {
        let expiry = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let json = serde_json::to_value(record(Some(expiry), Some("r"))).unwrap();
        assert_eq!(json["expiry"], "2026-03-04T05:06:07Z");
        assert_eq!(json["scopes"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_expiry_accepts_naive_and_fractional() {
        let parsed = expiry_format::parse("2026-03-04T05:06:07.123456").unwrap();
        assert_eq!(parsed.timestamp(), 1_772_600_767);

        let parsed = expiry_format::parse("2026-03-04T05:06:07+00:00").unwrap();
        assert_eq!(parsed.timestamp(), 1_772_600_767);

        assert!(expiry_format::parse("yesterday").is_err());
    }

    #[test]
    fn test_accepts_token_alias() {
        let json = r#"{
            "token": "abc",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id",
            "client_secret": "secret",
            "scopes": ["x"]
        }"#;
        let rec: CredentialRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.access_token, "abc");
        assert!(rec.expiry.is_none());
        assert!(rec.refresh_token.is_none());
    }

    #[test]
    fn test_apply_refresh_keeps_refresh_token() {
        let mut rec = record(Some(Utc::now() - Duration::hours(1)), Some("keep-me"));
        rec.apply_refresh(TokenResponse {
            access_token: "new".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3599),
            refresh_token: None,
            scope: None,
        });

        assert_eq!(rec.access_token, "new");
        assert_eq!(rec.refresh_token.as_deref(), Some("keep-me"));
        assert!(!rec.is_expired());
        assert_eq!(rec.scopes.len(), 2);
    }

    #[test]
    fn test_from_token_response_scopes() {
        let client = ClientSecret::new("id", "secret");
        let requested = vec!["a".to_string()];

        let tokens = TokenResponse {
            access_token: "t".to_string(),
            token_type: None,
            expires_in: Some(3600),
            refresh_token: Some("r".to_string()),
            scope: Some("x y".to_string()),
        };
        let rec = CredentialRecord::from_token_response(tokens.clone(), &client, &requested);
        assert_eq!(rec.scopes.len(), 2);
        assert!(rec.scopes.contains("y"));
        assert_eq!(rec.client_id, "id");
        assert_eq!(rec.expiry.unwrap().timestamp_subsec_nanos(), 0);

        let rec = CredentialRecord::from_token_response(
            TokenResponse { scope: None, ..tokens },
            &client,
            &requested,
        );
        assert_eq!(rec.scopes.iter().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rec = record(None, Some("refresh-secret"));
        let debug = format!("{rec:?}");
        assert!(!debug.contains("ya29.access"));
        assert!(!debug.contains("refresh-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
