//! Configuration loading.
//!
//! Configuration is JSON with comments (JSONC). String values may reference:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents (relative to the config file)
//!
//! Files are layered: the global `bqgate.json`/`bqgate.jsonc`, then the one in
//! the working directory. Nested objects merge key by key. `BQGATE_*`
//! environment variables are applied last.

use anyhow::{anyhow, bail, Context};
use bqgate_auth::{BIGQUERY_SCOPES, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_REDIRECT_PORT};
use bqgate_mcp::ClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Config file names, in lookup order within a directory.
const CONFIG_FILES: [&str; 2] = ["bqgate.jsonc", "bqgate.json"];

/// Path of the OAuth client secret file.
pub const ENV_CLIENT_SECRET: &str = "BQGATE_CLIENT_SECRET";
/// Project id for queries.
pub const ENV_PROJECT: &str = "BQGATE_PROJECT";
/// MCP endpoint URL.
pub const ENV_ENDPOINT: &str = "BQGATE_ENDPOINT";

static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// bqgate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OAuth client secret JSON downloaded from the cloud console.
    pub client_secret_file: Option<PathBuf>,
    /// Where credentials are stored. Defaults to the platform data dir.
    pub credentials_file: Option<PathBuf>,
    /// Port of the local redirect listener.
    pub redirect_port: u16,
    /// Scopes requested and required of stored credentials.
    pub scopes: Vec<String>,
    /// How long to wait for the browser redirect, in seconds.
    pub callback_timeout_secs: u64,
    /// Open the authorization URL in a browser.
    pub open_browser: bool,
    /// MCP client settings.
    pub mcp: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_secret_file: None,
            credentials_file: None,
            redirect_port: DEFAULT_REDIRECT_PORT,
            scopes: BIGQUERY_SCOPES.iter().map(|s| s.to_string()).collect(),
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT.as_secs(),
            open_browser: true,
            mcp: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With `explicit` set, only that file is read. Otherwise the global and
    /// working-directory files are layered. Returns the files that were read.
    pub async fn load(explicit: Option<&Path>, cwd: &Path) -> anyhow::Result<(Self, Vec<PathBuf>)> {
        let sources = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                vec![path.to_path_buf()]
            }
            None => Self::discover(cwd),
        };

        let mut config = Self::load_layers(&sources).await?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok((config, sources))
    }

    /// Config files present in the global directory and `cwd`.
    fn discover(cwd: &Path) -> Vec<PathBuf> {
        Self::global_config_dir()
            .into_iter()
            .chain(std::iter::once(cwd.to_path_buf()))
            .filter_map(|dir| {
                CONFIG_FILES
                    .iter()
                    .map(|name| dir.join(name))
                    .find(|path| path.exists())
            })
            .collect()
    }

    /// Get the global config directory.
    ///
    /// On Unix, prefers `~/.config/bqgate` over the platform-specific
    /// directory when it exists.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("bqgate");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("bqgate"))
    }

    /// Merge the given files in order, later ones winning.
    pub async fn load_layers(paths: &[PathBuf]) -> anyhow::Result<Self> {
        let mut merged = Value::Object(Default::default());
        for path in paths {
            merge_values(&mut merged, Self::load_file(path).await?);
        }

        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Read one config file into a JSON document.
    async fn load_file(path: &Path) -> anyhow::Result<Value> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let content = strip_comments(&content);
        let content = substitute_variables(&content, path)?;

        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        if !value.is_object() {
            bail!("{} must contain a JSON object", path.display());
        }
        Ok(value)
    }

    /// Apply `BQGATE_*` overrides.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(ENV_CLIENT_SECRET).filter(|v| !v.is_empty()) {
            self.client_secret_file = Some(PathBuf::from(path));
        }
        if let Some(project) = var(ENV_PROJECT).filter(|v| !v.is_empty()) {
            self.mcp.project_id = project;
        }
        if let Some(endpoint) = var(ENV_ENDPOINT).filter(|v| !v.is_empty()) {
            self.mcp.endpoint = endpoint;
        }
    }

    /// Client secret file, required for any authorization.
    pub fn client_secret_path(&self) -> anyhow::Result<&Path> {
        self.client_secret_file.as_deref().ok_or_else(|| {
            anyhow!("No OAuth client configured: set client_secret_file or {ENV_CLIENT_SECRET}")
        })
    }

    /// Credential file location.
    pub fn credentials_path(&self) -> anyhow::Result<PathBuf> {
        match &self.credentials_file {
            Some(path) => Ok(path.clone()),
            None => bqgate_auth::default_credentials_path()
                .ok_or_else(|| anyhow!("Could not determine data directory")),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

/// Merge `overlay` into `base`. Objects merge recursively, anything else
/// is replaced.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Strip JSON comments.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            continue;
        }

        if c == '"' {
            in_string = !in_string;
            result.push(c);
            continue;
        }

        if in_string {
            result.push(c);
            continue;
        }

        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            result.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        // Keep line numbers stable for parse errors
                        if c == '\n' {
                            result.push('\n');
                        }
                        prev = c;
                    }
                    continue;
                }
                _ => {}
            }
        }

        result.push(c);
    }

    result
}

/// Substitute `{env:...}` and `{file:...}` references.
fn substitute_variables(content: &str, config_path: &Path) -> anyhow::Result<String> {
    let config_dir = config_path.parent().unwrap_or(Path::new("."));
    let mut result = content.to_string();

    for cap in var_regex().captures_iter(content) {
        let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
        else {
            continue;
        };

        let replacement = match kind.as_str() {
            "env" => std::env::var(value.as_str()).map_err(|_| {
                anyhow!(
                    "Environment variable {} referenced in {} is not set",
                    value.as_str(),
                    config_path.display()
                )
            })?,
            "file" => {
                let file_path = config_dir.join(value.as_str());
                std::fs::read_to_string(&file_path)
                    .with_context(|| {
                        format!("File {} referenced in config not found", file_path.display())
                    })?
                    .trim()
                    .to_string()
            }
            _ => continue,
        };

        result = result.replace(full_match.as_str(), &replacement);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // line comment
            "a": "http://keep//this", /* block
            comment */ "b": 1
        }"#;
        let value: Value = serde_json::from_str(&strip_comments(input)).unwrap();
        assert_eq!(value["a"], "http://keep//this");
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn test_strip_comments_escaped_quote() {
        let input = r#"{"a": "say \"hi\" // not a comment"}"#;
        assert_eq!(strip_comments(input), input);
    }

    #[test]
    fn test_merge_values() {
        let mut base = serde_json::json!({"mcp": {"endpoint": "a", "project_id": "p"}, "redirect_port": 1});
        merge_values(
            &mut base,
            serde_json::json!({"mcp": {"endpoint": "b"}, "open_browser": false}),
        );
        assert_eq!(
            base,
            serde_json::json!({
                "mcp": {"endpoint": "b", "project_id": "p"},
                "redirect_port": 1,
                "open_browser": false
            })
        );
    }

    #[tokio::test]
    async fn test_defaults_without_files() {
        let config = Config::load_layers(&[]).await.unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.redirect_port, 8080);
        assert_eq!(config.scopes.len(), 3);
        assert_eq!(config.callback_timeout(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_layers_later_file_wins() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.jsonc");
        let local = dir.path().join("bqgate.json");
        std::fs::write(
            &global,
            r#"{
                // shared settings
                "client_secret_file": "/etc/bqgate/client.json",
                "mcp": {"project_id": "global-proj", "timeout_secs": 10}
            }"#,
        )
        .unwrap();
        std::fs::write(&local, r#"{"mcp": {"project_id": "local-proj"}}"#).unwrap();

        let config = Config::load_layers(&[global, local]).await.unwrap();
        assert_eq!(config.mcp.project_id, "local-proj");
        assert_eq!(config.mcp.timeout_secs, 10);
        assert_eq!(
            config.client_secret_file,
            Some(PathBuf::from("/etc/bqgate/client.json"))
        );
    }

    #[tokio::test]
    async fn test_file_substitution() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("project.txt"), "from-file\n").unwrap();
        let path = dir.path().join("bqgate.json");
        std::fs::write(&path, r#"{"mcp": {"project_id": "{file:project.txt}"}}"#).unwrap();

        let config = Config::load_layers(&[path]).await.unwrap();
        assert_eq!(config.mcp.project_id, "from-file");
    }

    #[tokio::test]
    async fn test_missing_env_reference_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bqgate.json");
        std::fs::write(
            &path,
            r#"{"mcp": {"project_id": "{env:BQGATE_TEST_SURELY_UNSET_VARIABLE}"}}"#,
        )
        .unwrap();

        let err = Config::load_layers(&[path]).await.unwrap_err();
        assert!(err.to_string().contains("BQGATE_TEST_SURELY_UNSET_VARIABLE"));
    }

    #[tokio::test]
    async fn test_commented_reference_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bqgate.jsonc");
        std::fs::write(
            &path,
            "{\n  // \"redirect_port\": \"{env:BQGATE_TEST_SURELY_UNSET_VARIABLE}\"\n  \"redirect_port\": 9000\n}",
        )
        .unwrap();

        let config = Config::load_layers(&[path]).await.unwrap();
        assert_eq!(config.redirect_port, 9000);
    }

    #[tokio::test]
    async fn test_invalid_json_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bqgate.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load_layers(&[path]).await.unwrap_err();
        assert!(err.to_string().contains("bqgate.json"));
    }

    #[tokio::test]
    async fn test_explicit_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Config::load(Some(&missing), dir.path()).await.is_err());
    }

    #[test]
    fn test_discover_prefers_jsonc_in_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bqgate.json"), "{}").unwrap();
        std::fs::write(dir.path().join("bqgate.jsonc"), "{}").unwrap();

        let found = Config::discover(dir.path());
        assert_eq!(found.last().unwrap(), &dir.path().join("bqgate.jsonc"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CLIENT_SECRET, "/tmp/client.json"),
            (ENV_PROJECT, "env-proj"),
            (ENV_ENDPOINT, ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.client_secret_path().unwrap(), Path::new("/tmp/client.json"));
        assert_eq!(config.mcp.project_id, "env-proj");
        assert_eq!(config.mcp.endpoint, bqgate_mcp::DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_client_secret_required() {
        let err = Config::default().client_secret_path().unwrap_err();
        assert!(err.to_string().contains(ENV_CLIENT_SECRET));
    }
}
