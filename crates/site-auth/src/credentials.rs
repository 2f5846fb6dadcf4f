//! Site credentials and their stores
//!
//! A credential is one account able to log in to one site. Besides the secret
//! it carries the selection state the token pool maintains: the `preferred`
//! flag, the last successful login, the consecutive failure streak and an
//! optional blacklist deadline. The store is the single source of truth for
//! that state; the pool reads it at selection time and writes counters back
//! after every terminal login attempt.
//!
//! `FileCredentialStore` persists to a JSON file using atomic temp-file +
//! rename writes. A tokio Mutex serializes concurrent writers.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One account for one site.
///
/// Timestamps are unix milliseconds (absolute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub site: String,
    pub account: String,
    pub secret: Secret<String>,
    /// Ranked ahead of every non-preferred account during selection
    #[serde(default)]
    pub preferred: bool,
    #[serde(default)]
    pub last_success_at: Option<u64>,
    /// Consecutive failed logins since the last success
    #[serde(default)]
    pub failure_streak: u32,
    /// Excluded from automatic selection until this instant
    #[serde(default)]
    pub blacklist_until: Option<u64>,
}

/// The mutable selection counters of a credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialStats {
    pub last_success_at: Option<u64>,
    pub failure_streak: u32,
    pub blacklist_until: Option<u64>,
}

impl Credential {
    /// A credential with no history.
    pub fn new(
        site: impl Into<String>,
        account: impl Into<String>,
        secret: impl Into<Secret<String>>,
    ) -> Self {
        Self {
            site: site.into(),
            account: account.into(),
            secret: secret.into(),
            preferred: false,
            last_success_at: None,
            failure_streak: 0,
            blacklist_until: None,
        }
    }

    /// Mark the credential as preferred.
    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    /// Whether the blacklist window is still open at `now_millis`.
    pub fn is_blacklisted_at(&self, now_millis: u64) -> bool {
        self.blacklist_until.is_some_and(|until| now_millis < until)
    }

    pub fn stats(&self) -> CredentialStats {
        CredentialStats {
            last_success_at: self.last_success_at,
            failure_streak: self.failure_streak,
            blacklist_until: self.blacklist_until,
        }
    }

    pub fn apply_stats(&mut self, stats: CredentialStats) {
        self.last_success_at = stats.last_success_at;
        self.failure_streak = stats.failure_streak;
        self.blacklist_until = stats.blacklist_until;
    }
}

/// Source of credentials for the token pool.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
/// `Arc<dyn CredentialStore>`.
pub trait CredentialStore: Send + Sync {
    /// All credentials configured for `site`, in no particular order.
    fn list_credentials<'a>(
        &'a self,
        site: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + 'a>>;

    /// Overwrite the selection counters of one credential.
    ///
    /// Returns `NotFound` if the credential no longer exists.
    fn update_credential_stats<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
        stats: CredentialStats,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

type CredentialKey = (String, String);

fn key_of(site: &str, account: &str) -> CredentialKey {
    (site.to_owned(), account.to_owned())
}

/// Thread-safe credential file manager.
///
/// The file holds a JSON array of credentials. The Mutex serializes all
/// writes; reads hold it only long enough to clone.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<CredentialKey, Credential>>,
}

impl FileCredentialStore {
    /// Load credentials from the given file path.
    ///
    /// A missing file is created as `[]` (cold start with zero accounts).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credentials: Vec<Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), accounts = credentials.len(), "loaded credentials");
            credentials
                .into_iter()
                .map(|c| (key_of(&c.site, &c.account), c))
                .collect()
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let store = HashMap::new();
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of a specific credential.
    pub async fn get(&self, site: &str, account: &str) -> Option<Credential> {
        let state = self.state.lock().await;
        state.get(&key_of(site, account)).cloned()
    }

    /// Add or replace a credential and persist to disk.
    pub async fn add(&self, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(site = %credential.site, account = %credential.account, "added credential");
        state.insert(key_of(&credential.site, &credential.account), credential);
        write_atomic(&self.path, &state).await
    }

    /// Remove a credential and persist to disk.
    pub async fn remove(&self, site: &str, account: &str) -> Result<Option<Credential>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(&key_of(site, account));
        if removed.is_some() {
            debug!(site, account, "removed credential");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    /// Number of stored credentials across all sites.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CredentialStore for FileCredentialStore {
    fn list_credentials<'a>(
        &'a self,
        site: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.values().filter(|c| c.site == site).cloned().collect())
        })
    }

    fn update_credential_stats<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
        stats: CredentialStats,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let credential = state
                .get_mut(&key_of(site, account))
                .ok_or_else(|| Error::NotFound(format!("{site}/{account}")))?;
            credential.apply_stats(stats);
            debug!(site, account, failure_streak = stats.failure_streak, "updated credential stats");
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write credentials to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over the
/// target. The file holds secrets, so it is created with 0600 permissions.
async fn write_atomic(path: &Path, data: &HashMap<CredentialKey, Credential>) -> Result<()> {
    let mut credentials: Vec<&Credential> = data.values().collect();
    credentials.sort_by(|a, b| (&a.site, &a.account).cmp(&(&b.site, &b.account)));

    let json = serde_json::to_string_pretty(&credentials)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

/// In-process credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<HashMap<CredentialKey, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let state = credentials
            .into_iter()
            .map(|c| (key_of(&c.site, &c.account), c))
            .collect();
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn get(&self, site: &str, account: &str) -> Option<Credential> {
        self.state.lock().await.get(&key_of(site, account)).cloned()
    }

    pub async fn insert(&self, credential: Credential) {
        let mut state = self.state.lock().await;
        state.insert(key_of(&credential.site, &credential.account), credential);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn list_credentials<'a>(
        &'a self,
        site: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.values().filter(|c| c.site == site).cloned().collect())
        })
    }

    fn update_credential_stats<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
        stats: CredentialStats,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let credential = state
                .get_mut(&key_of(site, account))
                .ok_or_else(|| Error::NotFound(format!("{site}/{account}")))?;
            credential.apply_stats(stats);
            Ok(())
        })
    }
}
