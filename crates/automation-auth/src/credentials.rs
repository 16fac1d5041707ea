//! Local credential storage for the CLI
//!
//! One JSON file under the user's home directory holds the current
//! application token and identity snapshot. Writes go to a temp file in the
//! same directory and are renamed over the target, so a crash never leaves a
//! half-written file. The directory is 0700 and the file 0600.
//!
//! Every access resolves the path through `canonicalize` and requires the
//! result to stay inside the canonical credentials directory. This catches
//! symlinks pointing elsewhere as well as `..` segments.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::constants::TOKEN_TYPE;
use crate::error::{Error, Result};
use crate::identity::ProviderIdentity;

/// Token bundle persisted after login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Signed application token
    pub access_token: String,
    pub token_type: String,
    /// Absolute expiry of `access_token`
    pub expires_at: DateTime<Utc>,
    pub user_info: ProviderIdentity,
    /// Provider refresh token, when the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl StoredCredentials {
    /// Bundle a freshly minted token that lives for `lifetime_secs` from now.
    ///
    /// Fails when the expiry falls outside the representable date range.
    pub fn new(
        access_token: String,
        lifetime_secs: i64,
        user_info: ProviderIdentity,
        refresh_token: Option<String>,
    ) -> Result<Self> {
        let expires_at = Duration::try_seconds(lifetime_secs)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "token lifetime of {lifetime_secs} seconds is out of range"
                ))
            })?;
        Ok(Self {
            access_token,
            token_type: TOKEN_TYPE.to_owned(),
            expires_at,
            user_info,
            refresh_token,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).max(Duration::zero())
    }
}

/// Reads and writes the credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    base_dir: PathBuf,
    file_name: String,
}

impl CredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_name: file_name.into(),
        }
    }

    /// `~/<credentials_dir>/<credentials_file>`, or relative to the working
    /// directory when no home directory can be resolved.
    pub fn from_config(config: &AuthConfig) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(&config.credentials_dir), &config.credentials_file)
    }

    /// Unresolved location of the credential file, for display.
    pub fn location(&self) -> PathBuf {
        self.base_dir.join(&self.file_name)
    }

    /// Read stored credentials.
    pub async fn load(&self) -> Result<StoredCredentials> {
        if !self.base_dir.exists() {
            return Err(not_logged_in());
        }
        let path = self.resolve().await?;

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_logged_in()),
            Err(e) => return Err(Error::Storage(format!("reading credential file: {e}"))),
        };

        let credentials = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("parsing credential file: {e}")))?;
        debug!(path = %path.display(), "loaded credentials");
        Ok(credentials)
    }

    /// Persist credentials, replacing any existing file.
    pub async fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.resolve().await?;
        write_atomic(&path, credentials).await?;
        info!(path = %path.display(), "saved credentials");
        Ok(())
    }

    /// Remove the credential file. A missing file is not an error.
    pub async fn delete(&self) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }
        let path = self.resolve().await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "deleted credentials");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("deleting credential file: {e}"))),
        }
    }

    async fn ensure_dir(&self) -> Result<()> {
        if has_parent_segment(&self.base_dir) {
            return Err(traversal(&self.base_dir));
        }
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| Error::Storage(format!("creating credentials directory: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.base_dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(|e| {
                    Error::Storage(format!("setting credentials directory permissions: {e}"))
                })?;
        }
        Ok(())
    }

    /// Canonical path of the credential file, confined to the canonical base dir.
    async fn resolve(&self) -> Result<PathBuf> {
        let file = Path::new(&self.file_name);
        let mut components = file.components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(traversal(file));
        }
        if has_parent_segment(&self.base_dir) {
            return Err(traversal(&self.base_dir));
        }

        let base = tokio::fs::canonicalize(&self.base_dir)
            .await
            .map_err(|e| Error::Storage(format!("resolving credentials directory: {e}")))?;
        let candidate = base.join(file);

        // A file that does not exist yet cannot be a symlink out of `base`.
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => candidate,
            Err(e) => return Err(Error::Storage(format!("resolving credential file: {e}"))),
        };

        if has_parent_segment(&resolved) || !resolved.starts_with(&base) || resolved == base {
            return Err(traversal(&resolved));
        }
        Ok(resolved)
    }
}

fn has_parent_segment(path: &Path) -> bool {
    path.components().any(|c| c == Component::ParentDir)
}

fn traversal(path: &Path) -> Error {
    Error::Storage(format!(
        "credential path escapes the credentials directory: {}",
        path.display()
    ))
}

fn not_logged_in() -> Error {
    Error::NotFound("no stored credentials; run `auth-cli login` first".into())
}

/// Write credentials atomically with 0600 permissions.
///
/// The temp file is created with its final mode, so the token is never
/// readable by other users, then renamed over the target.
async fn write_atomic(path: &Path, credentials: &StoredCredentials) -> Result<()> {
    let json = serde_json::to_string_pretty(credentials)
        .map_err(|e| Error::Storage(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("credential path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    let result = write_then_rename(&tmp_path, path, json.as_bytes()).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

async fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(tmp_path)
        .await
        .map_err(|e| Error::Storage(format!("creating temp credential file: {e}")))?;
    file.write_all(bytes)
        .await
        .map_err(|e| Error::Storage(format!("writing temp credential file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Storage(format!("flushing temp credential file: {e}")))?;
    drop(file);

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
