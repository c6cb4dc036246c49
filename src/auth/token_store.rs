//! Credential bundle persistence
//!
//! The bearer-credential bundle is stored as a single JSON file. It is read
//! once at startup and rewritten after every successful token exchange. Writes
//! go through a temporary file and an atomic rename so that a crash mid-write
//! never leaves a truncated file behind; on unix the file is created `0600`.
//!
//! The file is not encrypted. A single controlling process per path is
//! assumed.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AirlinkError, AuthError, Result};

/// Access tokens are refreshed this long before they actually expire.
pub const EXPIRY_SKEW_MS: i64 = 60_000;

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

// ---------------------------------------------------------------------------
// CredentialBundle
// ---------------------------------------------------------------------------

/// The bearer credentials returned by the identity provider.
///
/// `expires_at` is an absolute epoch-millisecond timestamp computed locally as
/// issue time plus `expires_in`; it is never taken from the server. Provider
/// fields this crate does not interpret are kept in `extra` and written back
/// unchanged.
///
/// # Examples
///
/// ```
/// use airlink::auth::token_store::CredentialBundle;
///
/// let bundle = CredentialBundle::issued_at(
///     1_700_000_000_000,
///     "access".to_string(),
///     "id".to_string(),
///     "refresh".to_string(),
///     Some(3600),
/// );
/// assert_eq!(bundle.expires_at, 1_700_003_600_000);
/// assert!(bundle.is_fresh_at(1_700_000_000_000));
/// assert!(!bundle.is_fresh_at(1_700_003_550_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// Bearer token for the vendor API and the MQTT authorizer
    pub access_token: String,

    /// OIDC identity token, used to resolve the account id
    pub id_token: String,

    /// Refresh token for the `refresh_token` grant
    pub refresh_token: String,

    /// Lifetime in seconds reported at issue time
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,

    /// Absolute expiry in epoch milliseconds
    pub expires_at: i64,

    /// Opaque provider fields (`token_type`, `scope`, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

impl CredentialBundle {
    /// Builds a bundle whose expiry is derived from `issued_at_ms`.
    pub fn issued_at(
        issued_at_ms: i64,
        access_token: String,
        id_token: String,
        refresh_token: String,
        expires_in: Option<u64>,
    ) -> Self {
        let expires_in = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let lifetime_ms = i64::try_from(expires_in)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        Self {
            access_token,
            id_token,
            refresh_token,
            expires_in,
            expires_at: issued_at_ms.saturating_add(lifetime_ms),
            extra: serde_json::Map::new(),
        }
    }

    /// Returns `true` while `now_ms < expires_at - 60s`.
    pub fn is_fresh_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at - EXPIRY_SKEW_MS
    }

    /// [`is_fresh_at`](Self::is_fresh_at) against the wall clock.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now().timestamp_millis())
    }

    /// Expiry as a UTC timestamp, for display.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// File-backed store for a single [`CredentialBundle`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Creates a store for the given file path. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted bundle.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Io`] on read failures and
    /// [`AirlinkError::Serialization`] when the file is not a valid bundle.
    pub fn load(&self) -> Result<Option<CredentialBundle>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AirlinkError::Io(e).into()),
        };
        let bundle = serde_json::from_str(&contents).map_err(AirlinkError::Serialization)?;
        Ok(Some(bundle))
    }

    /// Persists the bundle, replacing any previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the directory cannot be created or
    /// the file cannot be written.
    pub fn save(&self, bundle: &CredentialBundle) -> Result<()> {
        let json = serde_json::to_string_pretty(bundle).map_err(AirlinkError::Serialization)?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            AirlinkError::Auth(AuthError::Storage(format!(
                "{}: {e}",
                self.path.display()
            )))
        })?;
        tracing::debug!("Persisted credentials to {}", self.path.display());
        Ok(())
    }

    /// Deletes the credential file. Missing files are not an error.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AirlinkError::Io(e).into()),
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("credentials.json");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let result = (|| {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(expires_at: i64) -> CredentialBundle {
        CredentialBundle {
            access_token: "access".to_string(),
            id_token: "id".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in: 3600,
            expires_at,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_expiry_is_derived_from_issue_time() {
        let b = CredentialBundle::issued_at(
            10_000,
            "a".to_string(),
            "i".to_string(),
            "r".to_string(),
            Some(120),
        );
        assert_eq!(b.expires_at, 130_000);
        assert_eq!(b.expires_in, 120);
    }

    #[test]
    fn test_missing_expires_in_defaults_to_one_hour() {
        let b = CredentialBundle::issued_at(
            0,
            "a".to_string(),
            "i".to_string(),
            "r".to_string(),
            None,
        );
        assert_eq!(b.expires_at, 3_600_000);
    }

    #[test]
    fn test_fresh_outside_skew_window() {
        let b = bundle(1_000_000);
        assert!(b.is_fresh_at(1_000_000 - EXPIRY_SKEW_MS - 1));
    }

    #[test]
    fn test_not_fresh_at_skew_boundary() {
        let b = bundle(1_000_000);
        assert!(!b.is_fresh_at(1_000_000 - EXPIRY_SKEW_MS));
        assert!(!b.is_fresh_at(1_000_000));
    }

    #[test]
    fn test_extra_fields_survive_serialization() {
        let json = r#"{
            "access_token": "a",
            "id_token": "i",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 42,
            "token_type": "Bearer",
            "scope": "openid"
        }"#;
        let b: CredentialBundle = serde_json::from_str(json).unwrap();
        assert_eq!(b.extra.get("token_type").unwrap(), "Bearer");

        let out = serde_json::to_value(&b).unwrap();
        assert_eq!(out["scope"], "openid");
        assert_eq!(out["expires_at"], 42);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("credentials.json"));
        let original = bundle(1_800_000_000_000);

        store.save(&original).unwrap();
        let loaded = store.load().unwrap().expect("bundle present");

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{not json").unwrap();
        assert!(TokenStore::new(path).load().is_err());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("credentials.json"));
        store.save(&bundle(1)).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("credentials.json")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("credentials.json"));
        store.save(&bundle(1)).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("credentials.json"));
        store.save(&bundle(1)).unwrap();
        store.delete().unwrap();
        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
