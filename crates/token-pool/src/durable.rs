//! Durable storage for tokens and acquisition history
//!
//! The durable tier outlives the process: tokens written here are served
//! after a restart, and the history log backs `statistics` and `cleanup`.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::{AcquisitionAttempt, TokenRecord};

type StoreResult<T> = std::result::Result<T, StoreError>;
type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Persistent store for the cache's slow tier and the history log.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
/// `Arc<dyn DurableStore>`.
pub trait DurableStore: Send + Sync {
    fn load_token<'a>(&'a self, site: &'a str, account: &'a str)
    -> StoreFuture<'a, Option<TokenRecord>>;

    /// Insert or replace the record for `(record.site, record.account)`.
    fn save_token<'a>(&'a self, record: &'a TokenRecord) -> StoreFuture<'a, ()>;

    /// Remove a record. Deleting a missing record is not an error.
    fn delete_token<'a>(&'a self, site: &'a str, account: &'a str) -> StoreFuture<'a, ()>;

    /// Remove the record only if it still expires at `expires_at`, so a stale
    /// read can never delete a record written after it. Returns whether a
    /// record was removed.
    fn delete_token_if_expires<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
        expires_at: u64,
    ) -> StoreFuture<'a, bool>;

    /// All records for `site`, expired ones included.
    fn list_tokens<'a>(&'a self, site: &'a str) -> StoreFuture<'a, Vec<TokenRecord>>;

    fn append_attempt<'a>(&'a self, attempt: &'a AcquisitionAttempt) -> StoreFuture<'a, ()>;

    /// Attempts with `timestamp >= since`, oldest first.
    fn list_attempts<'a>(&'a self, since: u64) -> StoreFuture<'a, Vec<AcquisitionAttempt>>;

    /// Drop attempts with `timestamp < older_than`; returns how many went.
    fn prune_attempts<'a>(&'a self, older_than: u64) -> StoreFuture<'a, usize>;
}

type TokenKey = (String, String);

#[derive(Debug, Default)]
struct State {
    tokens: HashMap<TokenKey, TokenRecord>,
    attempts: Vec<AcquisitionAttempt>,
}

impl State {
    fn from_document(doc: Document) -> Self {
        Self {
            tokens: doc
                .tokens
                .into_iter()
                .map(|r| ((r.site.clone(), r.account.clone()), r))
                .collect(),
            attempts: doc.attempts,
        }
    }

    fn to_document(&self) -> Document {
        let mut tokens: Vec<TokenRecord> = self.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| (&a.site, &a.account).cmp(&(&b.site, &b.account)));
        Document {
            tokens,
            attempts: self.attempts.clone(),
        }
    }

    fn tokens_for(&self, site: &str) -> Vec<TokenRecord> {
        self.tokens
            .values()
            .filter(|r| r.site == site)
            .cloned()
            .collect()
    }

    fn attempts_since(&self, since: u64) -> Vec<AcquisitionAttempt> {
        let mut attempts: Vec<AcquisitionAttempt> = self
            .attempts
            .iter()
            .filter(|a| a.timestamp >= since)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.timestamp);
        attempts
    }

    fn remove_if_expires(&mut self, site: &str, account: &str, expires_at: u64) -> bool {
        let key = key_of(site, account);
        if self.tokens.get(&key).is_some_and(|r| r.expires_at == expires_at) {
            self.tokens.remove(&key);
            true
        } else {
            false
        }
    }

    fn prune(&mut self, older_than: u64) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|a| a.timestamp >= older_than);
        before - self.attempts.len()
    }
}

fn key_of(site: &str, account: &str) -> TokenKey {
    (site.to_owned(), account.to_owned())
}

/// In-process durable store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn load_token<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
    ) -> StoreFuture<'a, Option<TokenRecord>> {
        Box::pin(async move { Ok(self.state.lock().await.tokens.get(&key_of(site, account)).cloned()) })
    }

    fn save_token<'a>(&'a self, record: &'a TokenRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state
                .tokens
                .insert(key_of(&record.site, &record.account), record.clone());
            Ok(())
        })
    }

    fn delete_token<'a>(&'a self, site: &'a str, account: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().await.tokens.remove(&key_of(site, account));
            Ok(())
        })
    }

    fn delete_token_if_expires<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
        expires_at: u64,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .remove_if_expires(site, account, expires_at))
        })
    }

    fn list_tokens<'a>(&'a self, site: &'a str) -> StoreFuture<'a, Vec<TokenRecord>> {
        Box::pin(async move { Ok(self.state.lock().await.tokens_for(site)) })
    }

    fn append_attempt<'a>(&'a self, attempt: &'a AcquisitionAttempt) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().await.attempts.push(attempt.clone());
            Ok(())
        })
    }

    fn list_attempts<'a>(&'a self, since: u64) -> StoreFuture<'a, Vec<AcquisitionAttempt>> {
        Box::pin(async move { Ok(self.state.lock().await.attempts_since(since)) })
    }

    fn prune_attempts<'a>(&'a self, older_than: u64) -> StoreFuture<'a, usize> {
        Box::pin(async move { Ok(self.state.lock().await.prune(older_than)) })
    }
}

/// On-disk layout of `JsonFileStore`.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Document {
    #[serde(default)]
    tokens: Vec<TokenRecord>,
    #[serde(default)]
    attempts: Vec<AcquisitionAttempt>,
}

/// Durable store kept in a single JSON document.
///
/// Every mutation rewrites the whole file atomically, so the file is always a
/// complete snapshot. Suited to the modest volumes of one broker instance.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating an empty document if it's missing.
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError(format!("reading token store: {e}")))?;
            let doc: Document = serde_json::from_str(&contents)
                .map_err(|e| StoreError(format!("parsing token store: {e}")))?;
            info!(
                path = %path.display(),
                tokens = doc.tokens.len(),
                attempts = doc.attempts.len(),
                "loaded token store"
            );
            State::from_document(doc)
        } else {
            info!(path = %path.display(), "token store not found, starting empty");
            let state = State::default();
            write_atomic(&path, &state.to_document()).await?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl DurableStore for JsonFileStore {
    fn load_token<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
    ) -> StoreFuture<'a, Option<TokenRecord>> {
        Box::pin(async move { Ok(self.state.lock().await.tokens.get(&key_of(site, account)).cloned()) })
    }

    fn save_token<'a>(&'a self, record: &'a TokenRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state
                .tokens
                .insert(key_of(&record.site, &record.account), record.clone());
            write_atomic(&self.path, &state.to_document()).await
        })
    }

    fn delete_token<'a>(&'a self, site: &'a str, account: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.tokens.remove(&key_of(site, account)).is_some() {
                write_atomic(&self.path, &state.to_document()).await?;
            }
            Ok(())
        })
    }

    fn delete_token_if_expires<'a>(
        &'a self,
        site: &'a str,
        account: &'a str,
        expires_at: u64,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let removed = state.remove_if_expires(site, account, expires_at);
            if removed {
                write_atomic(&self.path, &state.to_document()).await?;
            }
            Ok(removed)
        })
    }

    fn list_tokens<'a>(&'a self, site: &'a str) -> StoreFuture<'a, Vec<TokenRecord>> {
        Box::pin(async move { Ok(self.state.lock().await.tokens_for(site)) })
    }

    fn append_attempt<'a>(&'a self, attempt: &'a AcquisitionAttempt) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.attempts.push(attempt.clone());
            write_atomic(&self.path, &state.to_document()).await
        })
    }

    fn list_attempts<'a>(&'a self, since: u64) -> StoreFuture<'a, Vec<AcquisitionAttempt>> {
        Box::pin(async move { Ok(self.state.lock().await.attempts_since(since)) })
    }

    fn prune_attempts<'a>(&'a self, older_than: u64) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let removed = state.prune(older_than);
            if removed > 0 {
                write_atomic(&self.path, &state.to_document()).await?;
            }
            Ok(removed)
        })
    }
}

/// Replace the store file via temp file + rename. Tokens are bearer secrets,
/// so the file is 0600.
async fn write_atomic(path: &Path, doc: &Document) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| StoreError(format!("serializing token store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| StoreError("token store path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError(format!("writing temp token store: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| StoreError(format!("setting token store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError(format!("renaming temp token store: {e}")))?;

    debug!(path = %path.display(), "persisted token store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::Secret;

    use super::*;
    use crate::types::{AttemptOutcome, AttemptSource};

    fn record(site: &str, account: &str, issued_at: u64) -> TokenRecord {
        TokenRecord::new(
            site,
            account,
            Secret::from(format!("tok_{account}")),
            issued_at,
            Duration::from_secs(60),
        )
    }

    fn attempt(id: &str, timestamp: u64) -> AcquisitionAttempt {
        AcquisitionAttempt {
            correlation_id: id.into(),
            site: "court_zxfw".into(),
            account: Some("a".into()),
            outcome: AttemptOutcome::Success,
            source: AttemptSource::Login,
            duration_ms: 12,
            error: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn memory_store_replaces_tokens_per_account() {
        let store = MemoryStore::new();
        store.save_token(&record("court_zxfw", "a", 1_000)).await.unwrap();
        store.save_token(&record("court_zxfw", "a", 2_000)).await.unwrap();
        store.save_token(&record("court_zxfw", "b", 1_000)).await.unwrap();
        store.save_token(&record("other", "a", 1_000)).await.unwrap();

        let loaded = store.load_token("court_zxfw", "a").await.unwrap().unwrap();
        assert_eq!(loaded.issued_at, 2_000);
        assert_eq!(store.list_tokens("court_zxfw").await.unwrap().len(), 2);

        store.delete_token("court_zxfw", "a").await.unwrap();
        store.delete_token("court_zxfw", "missing").await.unwrap();
        assert!(store.load_token("court_zxfw", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_delete_spares_a_replaced_record() {
        let store = MemoryStore::new();
        let stale = record("court_zxfw", "a", 1_000);
        store.save_token(&stale).await.unwrap();
        store.save_token(&record("court_zxfw", "a", 5_000)).await.unwrap();

        let removed = store
            .delete_token_if_expires("court_zxfw", "a", stale.expires_at)
            .await
            .unwrap();
        assert!(!removed);
        let kept = store.load_token("court_zxfw", "a").await.unwrap().unwrap();
        assert_eq!(kept.issued_at, 5_000);

        let removed = store
            .delete_token_if_expires("court_zxfw", "a", kept.expires_at)
            .await
            .unwrap();
        assert!(removed);
        assert!(store.load_token("court_zxfw", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_conditional_delete_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = JsonFileStore::open(path.clone()).await.unwrap();
        let saved = record("court_zxfw", "a", 1_000);
        store.save_token(&saved).await.unwrap();

        assert!(!store.delete_token_if_expires("court_zxfw", "a", 1).await.unwrap());
        assert!(store
            .delete_token_if_expires("court_zxfw", "a", saved.expires_at)
            .await
            .unwrap());
        drop(store);

        let reopened = JsonFileStore::open(path).await.unwrap();
        assert!(reopened.load_token("court_zxfw", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn attempts_filter_and_prune_by_timestamp() {
        let store = MemoryStore::new();
        for (id, ts) in [("c", 300), ("a", 100), ("b", 200)] {
            store.append_attempt(&attempt(id, ts)).await.unwrap();
        }

        let since: Vec<String> = store
            .list_attempts(200)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.correlation_id)
            .collect();
        assert_eq!(since, vec!["b", "c"]);

        assert_eq!(store.prune_attempts(250).await.unwrap(), 2);
        assert_eq!(store.list_attempts(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = JsonFileStore::open(path.clone()).await.unwrap();
        store.save_token(&record("court_zxfw", "a", 1_000)).await.unwrap();
        store.append_attempt(&attempt("acq_1", 1_000)).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(path).await.unwrap();
        let loaded = reopened.load_token("court_zxfw", "a").await.unwrap().unwrap();
        assert_eq!(loaded.token.expose(), "tok_a");
        assert_eq!(reopened.list_attempts(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn json_store_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let _store = JsonFileStore::open(path.clone()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(doc["tokens"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();

        let result = JsonFileStore::open(path).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn json_store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = JsonFileStore::open(path.clone()).await.unwrap();
        store.save_token(&record("court_zxfw", "a", 1_000)).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
