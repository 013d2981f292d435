//! File-backed credential store with a secure and a plain namespace
//!
//! Tokens live in `secrets.json` (mode 0600) and cached records such as the
//! user profile live in `cache.json`, both inside one storage directory. All
//! writes use atomic temp-file + rename so a crash never leaves a torn file.
//! Each namespace has its own tokio Mutex; reads clone out of memory.
//!
//! The token pair is always written or removed as a unit, which keeps the
//! "both tokens or none" invariant on disk as well as in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::Secret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY};
use crate::error::{Error, Result};
use crate::token::TokenPair;

const SECURE_FILE: &str = "secrets.json";
const PLAIN_FILE: &str = "cache.json";

/// Storage namespace. Secrets are segregated from ordinary cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Secure,
    Plain,
}

impl Namespace {
    fn file_name(self) -> &'static str {
        match self {
            Namespace::Secure => SECURE_FILE,
            Namespace::Plain => PLAIN_FILE,
        }
    }
}

/// Persistent key/value store for session credentials.
pub struct CredentialStore {
    dir: PathBuf,
    secure: Mutex<HashMap<String, String>>,
    plain: Mutex<HashMap<String, serde_json::Value>>,
}

impl CredentialStore {
    /// Load both namespaces from `dir`, creating the directory and empty
    /// files on first use.
    pub async fn load(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("creating storage dir {}: {e}", dir.display())))?;

        let secure = load_namespace(&dir, Namespace::Secure).await?;
        let plain = load_namespace(&dir, Namespace::Plain).await?;
        info!(
            path = %dir.display(),
            secure_keys = secure.len(),
            plain_keys = plain.len(),
            "loaded credential store"
        );

        Ok(Self {
            dir,
            secure: Mutex::new(secure),
            plain: Mutex::new(plain),
        })
    }

    /// Directory holding the namespace files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a secret. Missing keys are `None`, never an error.
    pub async fn get_secure(&self, key: &str) -> Option<String> {
        self.secure.lock().await.get(key).cloned()
    }

    /// Store a secret and persist the secure namespace.
    pub async fn set_secure(&self, key: &str, value: String) -> Result<()> {
        let mut state = self.secure.lock().await;
        let mut next = state.clone();
        next.insert(key.to_owned(), value);
        write_atomic(&self.dir, Namespace::Secure, &next).await?;
        *state = next;
        debug!(key, "stored secret");
        Ok(())
    }

    /// Remove a secret. Removing a missing key is a no-op.
    pub async fn remove_secure(&self, key: &str) -> Result<()> {
        let mut state = self.secure.lock().await;
        if !state.contains_key(key) {
            return Ok(());
        }
        let mut next = state.clone();
        next.remove(key);
        write_atomic(&self.dir, Namespace::Secure, &next).await?;
        *state = next;
        debug!(key, "removed secret");
        Ok(())
    }

    /// Read a cached record. A record that no longer matches `T` is treated
    /// as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.plain.lock().await.get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "cached record has unexpected shape, ignoring");
                None
            }
        }
    }

    /// Store a serializable record in the plain namespace.
    pub async fn set<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| Error::CredentialParse(format!("serializing {key}: {e}")))?;
        let mut state = self.plain.lock().await;
        let mut next = state.clone();
        next.insert(key.to_owned(), value);
        write_atomic(&self.dir, Namespace::Plain, &next).await?;
        *state = next;
        debug!(key, "stored record");
        Ok(())
    }

    /// Remove a cached record. Removing a missing key is a no-op.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.plain.lock().await;
        if !state.contains_key(key) {
            return Ok(());
        }
        let mut next = state.clone();
        next.remove(key);
        write_atomic(&self.dir, Namespace::Plain, &next).await?;
        *state = next;
        debug!(key, "removed record");
        Ok(())
    }

    /// Current access token, if any.
    pub async fn access_token(&self) -> Option<Secret<String>> {
        self.get_secure(ACCESS_TOKEN_KEY).await.map(Secret::new)
    }

    /// Current refresh token, if any.
    pub async fn refresh_token(&self) -> Option<Secret<String>> {
        self.get_secure(REFRESH_TOKEN_KEY).await.map(Secret::new)
    }

    /// The stored token pair, or `None` unless both tokens are present.
    pub async fn tokens(&self) -> Option<TokenPair> {
        let state = self.secure.lock().await;
        let access = state.get(ACCESS_TOKEN_KEY)?;
        let refresh = state.get(REFRESH_TOKEN_KEY)?;
        Some(TokenPair::new(access.clone(), refresh.clone()))
    }

    /// Replace both tokens in a single write. On failure the previous pair
    /// stays in place.
    pub async fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        let mut state = self.secure.lock().await;
        let mut next = state.clone();
        next.insert(
            ACCESS_TOKEN_KEY.to_owned(),
            tokens.access_token.expose().clone(),
        );
        next.insert(
            REFRESH_TOKEN_KEY.to_owned(),
            tokens.refresh_token.expose().clone(),
        );
        write_atomic(&self.dir, Namespace::Secure, &next).await?;
        *state = next;
        debug!("stored token pair");
        Ok(())
    }

    /// Remove both tokens and the cached profile. Idempotent.
    ///
    /// The session is dropped from memory even when persisting fails, so a
    /// cleared session never stays usable in this process. Both namespace
    /// files are attempted and the first error is returned.
    pub async fn clear_session(&self) -> Result<()> {
        let secure = drop_keys(
            &self.dir,
            Namespace::Secure,
            &self.secure,
            &[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
        )
        .await;
        let plain = drop_keys(&self.dir, Namespace::Plain, &self.plain, &[USER_DATA_KEY]).await;

        match secure.and(plain) {
            Ok(()) => {
                info!("session cleared");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session cleared in memory but not on disk");
                Err(e)
            }
        }
    }
}

/// Remove `keys` from one namespace and persist it if anything changed.
async fn drop_keys<V: Serialize>(
    dir: &Path,
    namespace: Namespace,
    state: &Mutex<HashMap<String, V>>,
    keys: &[&str],
) -> Result<()> {
    let mut state = state.lock().await;
    let mut removed = false;
    for key in keys {
        removed |= state.remove(*key).is_some();
    }
    if removed {
        write_atomic(dir, namespace, &*state).await?;
    }
    Ok(())
}

/// Read one namespace file, creating it as `{}` if it doesn't exist yet.
async fn load_namespace<V>(dir: &Path, namespace: Namespace) -> Result<HashMap<String, V>>
where
    V: Serialize + DeserializeOwned,
{
    let path = dir.join(namespace.file_name());
    if !path.exists() {
        let empty = HashMap::new();
        write_atomic(dir, namespace, &empty).await?;
        return Ok(empty);
    }

    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::Io(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::CredentialParse(format!("parsing {}: {e}", path.display())))
}

/// Write a namespace file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. The secure namespace is restricted to 0600 on unix.
async fn write_atomic<V: Serialize>(
    dir: &Path,
    namespace: Namespace,
    data: &HashMap<String, V>,
) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing {namespace:?} store: {e}")))?;

    let path = dir.join(namespace.file_name());
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        namespace.file_name(),
        std::process::id()
    ));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing {}: {e}", tmp_path.display())))?;

    #[cfg(unix)]
    if namespace == Namespace::Secure {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting secret file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| Error::Io(format!("renaming {}: {e}", tmp_path.display())))?;

    debug!(path = %path.display(), "persisted namespace");
    Ok(())
}
