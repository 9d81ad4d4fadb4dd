//! Durable storage for a single credential record.

use crate::credential::CredentialRecord;
use crate::error::{AuthError, AuthResult};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Reads and writes one credential file, checking it against the scopes the
/// caller needs.
pub struct CredentialStore {
    /// Path to the credential file.
    path: PathBuf,
    /// Scopes a stored record must have been granted to be usable.
    required_scopes: Vec<String>,
}

impl CredentialStore {
    /// Create a store at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn new(required_scopes: Vec<String>) -> AuthResult<Self> {
        let path = crate::default_credentials_path().ok_or(AuthError::NoDataDir)?;
        Ok(Self::with_path(path, required_scopes))
    }

    /// Create a store with a custom path.
    pub fn with_path(path: PathBuf, required_scopes: Vec<String>) -> Self {
        Self {
            path,
            required_scopes,
        }
    }

    /// Path to the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scopes a stored record must carry.
    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    /// Load the stored record.
    ///
    /// A missing file, or a record lacking any required scope, is
    /// [`AuthError::NotFound`]. Unparseable content is [`AuthError::Corrupt`].
    pub async fn load(&self) -> AuthResult<CredentialRecord> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: CredentialRecord =
            serde_json::from_str(&content).map_err(|e| AuthError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        let missing = record.missing_scopes(&self.required_scopes);
        if !missing.is_empty() {
            warn!(
                path = %self.path.display(),
                missing = ?missing,
                "Stored credentials lack required scopes"
            );
            return Err(AuthError::NotFound(self.path.clone()));
        }

        debug!(path = %self.path.display(), "Loaded credentials");
        Ok(record)
    }

    /// Persist a record, replacing the file atomically.
    pub async fn save(&self, record: &CredentialRecord) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(record)?;
        let tmp_path = self.temp_path();

        let written = self.write_temp(&tmp_path, content.as_bytes()).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Wrote credential file");
        Ok(())
    }

    /// Write and flush the temporary file, restricting permissions on Unix.
    async fn write_temp(&self, tmp_path: &Path, content: &[u8]) -> AuthResult<()> {
        let mut file = tokio::fs::File::create(tmp_path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(tmp_path, perms)
                .await
                .map_err(|e| {
                    AuthError::Permissions(format!(
                        "Failed to set permissions on {:?}: {}",
                        tmp_path, e
                    ))
                })?;
        }

        file.write_all(content).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Sibling temporary path used during [`save`](Self::save).
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("required_scopes", &self.required_scopes)
            .finish()
    }
}
