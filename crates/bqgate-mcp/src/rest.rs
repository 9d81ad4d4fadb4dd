//! REST query fallback against the BigQuery `jobs.query` endpoint.

use crate::error::{McpError, McpResult};
use crate::transport::{check_status, send_error};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Runs SQL through `POST {base}/projects/{project}/queries`.
pub struct RestFallback {
    base_url: Url,
    authorization: String,
    client: Client,
}

impl RestFallback {
    /// Create a fallback client for the given API root.
    pub fn new(base_url: &str, authorization: String, timeout: Duration) -> McpResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| McpError::Config(format!("Invalid REST base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(McpError::Config(format!(
                "REST base URL '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            authorization,
            client,
        })
    }

    /// URL of the query endpoint for a project.
    pub fn query_url(&self, project_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("projects")
                .push(project_id)
                .push("queries");
        }
        url
    }

    /// Run a standard-SQL query and return the response document.
    pub async fn query(&self, project_id: &str, sql: &str) -> McpResult<Value> {
        if project_id.is_empty() {
            return Err(McpError::InvalidArgument(
                "A project id is required for REST queries".to_string(),
            ));
        }

        let url = self.query_url(project_id);
        debug!(%url, "Running REST query");

        let response = self
            .client
            .post(url)
            .header("Authorization", &self.authorization)
            .json(&json!({"query": sql, "useLegacySql": false}))
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| McpError::protocol_error(format!("Invalid REST response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_query_url() {
        let rest = RestFallback::new(
            "https://bigquery.googleapis.com/bigquery/v2/",
            "Bearer t".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            rest.query_url("my-proj").as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/my-proj/queries"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = RestFallback::new("not a url", "Bearer t".to_string(), Duration::from_secs(5));
        assert!(matches!(result, Err(McpError::Config(_))));
    }

    #[tokio::test]
    async fn test_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/p1/queries"))
            .and(header("authorization", "Bearer t"))
            .and(body_json(json!({"query": "SELECT 1", "useLegacySql": false})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"jobComplete": true, "rows": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rest = RestFallback::new(&server.uri(), "Bearer t".to_string(), Duration::from_secs(5))
            .unwrap();
        let value = rest.query("p1", "SELECT 1").await.unwrap();
        assert_eq!(value["jobComplete"], true);
    }

    #[tokio::test]
    async fn test_query_error_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Syntax error at [1:8]"))
            .mount(&server)
            .await;

        let rest = RestFallback::new(&server.uri(), "Bearer t".to_string(), Duration::from_secs(5))
            .unwrap();
        let err = rest.query("p1", "SELEC 1").await.unwrap_err();
        assert!(err.to_string().contains("Syntax error"));
    }

    #[tokio::test]
    async fn test_query_requires_project() {
        let rest = RestFallback::new("http://127.0.0.1:1", "Bearer t".to_string(), Duration::from_secs(1))
            .unwrap();
        let err = rest.query("", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, McpError::InvalidArgument(_)));
    }
}
