//! Two-tier token cache
//!
//! The fast tier is a bounded in-memory map; the durable tier is any
//! `DurableStore`. Reads fall through fast → durable and promote valid durable
//! hits. Writes go to both tiers. Expiry always wins: an expired record is
//! never returned from either tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::Secret;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::StoreRetryConfig;
use crate::durable::DurableStore;
use crate::error::Result;
use crate::retry::with_retry;
use crate::types::TokenRecord;

type TokenKey = (String, String);

fn key_of(site: &str, account: &str) -> TokenKey {
    (site.to_owned(), account.to_owned())
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries currently held in the fast tier
    pub size: usize,
}

pub struct TokenCache {
    fast: RwLock<HashMap<TokenKey, TokenRecord>>,
    durable: Arc<dyn DurableStore>,
    capacity: usize,
    retry: StoreRetryConfig,
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
}

impl TokenCache {
    pub fn new(durable: Arc<dyn DurableStore>, capacity: usize, retry: StoreRetryConfig) -> Self {
        Self {
            fast: RwLock::new(HashMap::new()),
            durable,
            capacity: capacity.max(1),
            retry,
            fast_hits: AtomicU64::new(0),
            durable_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a valid token for `(site, account)`.
    ///
    /// Errors only when the durable tier stays unavailable after retries.
    pub async fn get(&self, site: &str, account: &str) -> Result<Option<TokenRecord>> {
        let now = common::unix_millis();
        let key = key_of(site, account);

        {
            let fast = self.fast.read().await;
            if let Some(record) = fast.get(&key).filter(|r| r.is_valid_at(now)) {
                self.fast_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(record.clone()));
            }
        }
        // Drop a stale fast entry so it can't be served later
        self.remove_expired_fast(&key, now).await;

        let loaded = with_retry(&self.retry, "load token", || self.durable.load_token(site, account))
            .await?;

        match loaded {
            Some(record) if record.is_valid_at(now) => {
                debug!(site, account, "promoting durable token into fast tier");
                self.durable_hits.fetch_add(1, Ordering::Relaxed);
                self.insert_fast(record.clone(), now).await;
                Ok(Some(record))
            }
            Some(stale) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                // A login may have replaced the record since it was loaded
                if let Err(e) = self
                    .durable
                    .delete_token_if_expires(site, account, stale.expires_at)
                    .await
                {
                    warn!(site, account, error = %e, "failed to delete expired durable token");
                }
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Build a record issued now and write it through both tiers.
    pub async fn put(
        &self,
        site: &str,
        account: &str,
        token: Secret<String>,
        ttl: Duration,
    ) -> Result<TokenRecord> {
        let record = TokenRecord::new(site, account, token, common::unix_millis(), ttl);
        self.store(record.clone()).await?;
        Ok(record)
    }

    /// Write an existing record through both tiers.
    ///
    /// The fast tier is updated first, so a durable failure still leaves the
    /// token servable by this process.
    pub async fn store(&self, record: TokenRecord) -> Result<()> {
        self.insert_fast(record.clone(), common::unix_millis()).await;
        with_retry(&self.retry, "save token", || self.durable.save_token(&record)).await
    }

    /// Remove `(site, account)` from both tiers.
    pub async fn invalidate(&self, site: &str, account: &str) -> Result<()> {
        self.fast.write().await.remove(&key_of(site, account));
        with_retry(&self.retry, "delete token", || self.durable.delete_token(site, account)).await?;
        debug!(site, account, "invalidated cached token");
        Ok(())
    }

    /// Valid durable records for `site`.
    pub async fn records_for_site(&self, site: &str) -> Result<Vec<TokenRecord>> {
        let now = common::unix_millis();
        let records = with_retry(&self.retry, "list tokens", || self.durable.list_tokens(site)).await?;
        Ok(records.into_iter().filter(|r| r.is_valid_at(now)).collect())
    }

    /// Copy every valid durable record of `site` into the fast tier.
    pub async fn warm_up(&self, site: &str) -> Result<usize> {
        let now = common::unix_millis();
        let records = self.records_for_site(site).await?;
        let count = records.len();
        for record in records {
            self.insert_fast(record, now).await;
        }
        info!(site, count, "warmed token cache");
        Ok(count)
    }

    /// Remove every record of `site` from both tiers; returns how many
    /// distinct accounts were cleared.
    pub async fn clear_site(&self, site: &str) -> Result<usize> {
        let mut accounts: Vec<String> = {
            let mut fast = self.fast.write().await;
            let keys: Vec<TokenKey> = fast.keys().filter(|(s, _)| s == site).cloned().collect();
            for key in &keys {
                fast.remove(key);
            }
            keys.into_iter().map(|(_, account)| account).collect()
        };

        let durable = with_retry(&self.retry, "list tokens", || self.durable.list_tokens(site)).await?;
        for record in durable {
            with_retry(&self.retry, "delete token", || {
                self.durable.delete_token(site, &record.account)
            })
            .await?;
            accounts.push(record.account);
        }
        accounts.sort();
        accounts.dedup();

        info!(site, count = accounts.len(), "cleared token cache");
        Ok(accounts.len())
    }

    /// Drop expired entries from the fast tier.
    pub async fn purge_expired(&self) -> usize {
        let now = common::unix_millis();
        let mut fast = self.fast.write().await;
        let before = fast.len();
        fast.retain(|_, r| r.is_valid_at(now));
        before - fast.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let fast_hits = self.fast_hits.load(Ordering::Relaxed);
        let durable_hits = self.durable_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = fast_hits + durable_hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (fast_hits + durable_hits) as f64 / lookups as f64
        };
        CacheStats {
            fast_hits,
            durable_hits,
            misses,
            hit_rate,
            size: self.fast.read().await.len(),
        }
    }

    async fn remove_expired_fast(&self, key: &TokenKey, now: u64) {
        let mut fast = self.fast.write().await;
        if fast.get(key).is_some_and(|r| !r.is_valid_at(now)) {
            fast.remove(key);
        }
    }

    async fn insert_fast(&self, record: TokenRecord, now: u64) {
        let mut fast = self.fast.write().await;
        let key = key_of(&record.site, &record.account);
        if !fast.contains_key(&key) && fast.len() >= self.capacity {
            fast.retain(|_, r| r.is_valid_at(now));
            if fast.len() >= self.capacity {
                let victim = fast
                    .iter()
                    .min_by_key(|(_, r)| r.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    debug!(site = %victim.0, account = %victim.1, "evicting fast tier entry");
                    fast.remove(&victim);
                }
            }
        }
        fast.insert(key, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;

    fn cache_with(durable: Arc<MemoryStore>, capacity: usize) -> TokenCache {
        TokenCache::new(durable, capacity, StoreRetryConfig::default())
    }

    fn expired_record(site: &str, account: &str) -> TokenRecord {
        let now = common::unix_millis();
        TokenRecord::new(site, account, Secret::from("old"), now - 10_000, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn put_then_get_hits_fast_tier() {
        let durable = Arc::new(MemoryStore::new());
        let cache = cache_with(durable.clone(), 8);

        let record = cache
            .put("court_zxfw", "a", Secret::from("tok"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(record.expires_at - record.issued_at, 3_600_000);

        let hit = cache.get("court_zxfw", "a").await.unwrap().unwrap();
        assert_eq!(hit.token.expose(), "tok");
        assert!(durable.load_token("court_zxfw", "a").await.unwrap().is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.fast_hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn durable_hit_is_promoted() {
        let durable = Arc::new(MemoryStore::new());
        let record = TokenRecord::new(
            "court_zxfw",
            "a",
            Secret::from("tok"),
            common::unix_millis(),
            Duration::from_secs(60),
        );
        durable.save_token(&record).await.unwrap();

        let cache = cache_with(durable, 8);
        assert_eq!(cache.get("court_zxfw", "a").await.unwrap(), Some(record.clone()));
        assert_eq!(cache.get("court_zxfw", "a").await.unwrap(), Some(record));

        let stats = cache.stats().await;
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.fast_hits, 1);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[tokio::test]
    async fn expired_records_are_misses_in_both_tiers() {
        let durable = Arc::new(MemoryStore::new());
        let cache = cache_with(durable.clone(), 8);
        cache.store(expired_record("court_zxfw", "a")).await.unwrap();

        assert!(cache.get("court_zxfw", "a").await.unwrap().is_none());
        // The expired durable copy is cleaned up on the miss
        assert!(durable.load_token("court_zxfw", "a").await.unwrap().is_none());
        assert_eq!(cache.stats().await.misses, 1);
        assert_eq!(cache.stats().await.size, 0);
    }

    /// Hands out an expired record while a fresh one lands behind it, as if a
    /// login finished between the load and the cleanup.
    struct RefreshedBehindStore {
        inner: MemoryStore,
        fresh: TokenRecord,
    }

    type StoreFuture<'a, T> = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<T, crate::error::StoreError>> + Send + 'a>,
    >;

    impl DurableStore for RefreshedBehindStore {
        fn load_token<'a>(&'a self, site: &'a str, account: &'a str) -> StoreFuture<'a, Option<TokenRecord>> {
            Box::pin(async move {
                let stale = self.inner.load_token(site, account).await?;
                self.inner.save_token(&self.fresh).await?;
                Ok(stale)
            })
        }

        fn save_token<'a>(&'a self, record: &'a TokenRecord) -> StoreFuture<'a, ()> {
            self.inner.save_token(record)
        }

        fn delete_token<'a>(&'a self, site: &'a str, account: &'a str) -> StoreFuture<'a, ()> {
            self.inner.delete_token(site, account)
        }

        fn delete_token_if_expires<'a>(
            &'a self,
            site: &'a str,
            account: &'a str,
            expires_at: u64,
        ) -> StoreFuture<'a, bool> {
            self.inner.delete_token_if_expires(site, account, expires_at)
        }

        fn list_tokens<'a>(&'a self, site: &'a str) -> StoreFuture<'a, Vec<TokenRecord>> {
            self.inner.list_tokens(site)
        }

        fn append_attempt<'a>(
            &'a self,
            attempt: &'a crate::types::AcquisitionAttempt,
        ) -> StoreFuture<'a, ()> {
            self.inner.append_attempt(attempt)
        }

        fn list_attempts<'a>(
            &'a self,
            since: u64,
        ) -> StoreFuture<'a, Vec<crate::types::AcquisitionAttempt>> {
            self.inner.list_attempts(since)
        }

        fn prune_attempts<'a>(&'a self, older_than: u64) -> StoreFuture<'a, usize> {
            self.inner.prune_attempts(older_than)
        }
    }

    #[tokio::test]
    async fn expired_cleanup_keeps_a_record_refreshed_in_between() {
        let fresh = TokenRecord::new(
            "court_zxfw",
            "a",
            Secret::from("fresh"),
            common::unix_millis(),
            Duration::from_secs(3600),
        );
        let durable = Arc::new(RefreshedBehindStore {
            inner: MemoryStore::new(),
            fresh: fresh.clone(),
        });
        durable
            .inner
            .save_token(&expired_record("court_zxfw", "a"))
            .await
            .unwrap();
        let cache = TokenCache::new(durable.clone(), 8, StoreRetryConfig::default());

        assert!(cache.get("court_zxfw", "a").await.unwrap().is_none());
        let kept = durable.inner.load_token("court_zxfw", "a").await.unwrap();
        assert_eq!(kept, Some(fresh));
    }

    #[tokio::test]
    async fn invalidate_removes_both_tiers() {
        let durable = Arc::new(MemoryStore::new());
        let cache = cache_with(durable.clone(), 8);
        cache
            .put("court_zxfw", "a", Secret::from("tok"), Duration::from_secs(60))
            .await
            .unwrap();

        cache.invalidate("court_zxfw", "a").await.unwrap();
        assert!(cache.get("court_zxfw", "a").await.unwrap().is_none());
        assert!(durable.load_token("court_zxfw", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn warm_up_loads_only_valid_records() {
        let durable = Arc::new(MemoryStore::new());
        let now = common::unix_millis();
        for account in ["a", "b"] {
            let record = TokenRecord::new(
                "court_zxfw",
                account,
                Secret::from("tok"),
                now,
                Duration::from_secs(60),
            );
            durable.save_token(&record).await.unwrap();
        }
        durable.save_token(&expired_record("court_zxfw", "c")).await.unwrap();
        durable.save_token(&expired_record("other", "a")).await.unwrap();

        let cache = cache_with(durable, 8);
        assert_eq!(cache.warm_up("court_zxfw").await.unwrap(), 2);
        assert_eq!(cache.stats().await.size, 2);
    }

    #[tokio::test]
    async fn capacity_evicts_earliest_expiry() {
        let cache = cache_with(Arc::new(MemoryStore::new()), 2);
        for (account, secs) in [("a", 600), ("b", 60), ("c", 300)] {
            cache
                .put("court_zxfw", account, Secret::from("tok"), Duration::from_secs(secs))
                .await
                .unwrap();
        }

        assert_eq!(cache.stats().await.size, 2);
        let fast = cache.fast.read().await;
        assert!(fast.contains_key(&key_of("court_zxfw", "a")));
        assert!(!fast.contains_key(&key_of("court_zxfw", "b")));
        assert!(fast.contains_key(&key_of("court_zxfw", "c")));
    }

    #[tokio::test]
    async fn clear_site_leaves_other_sites() {
        let durable = Arc::new(MemoryStore::new());
        let cache = cache_with(durable.clone(), 8);
        for (site, account) in [("court_zxfw", "a"), ("court_zxfw", "b"), ("other", "a")] {
            cache
                .put(site, account, Secret::from("tok"), Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert_eq!(cache.clear_site("court_zxfw").await.unwrap(), 2);
        assert!(durable.list_tokens("court_zxfw").await.unwrap().is_empty());
        assert!(cache.get("other", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_expired_only_touches_stale_entries() {
        let cache = cache_with(Arc::new(MemoryStore::new()), 8);
        cache.store(expired_record("court_zxfw", "a")).await.unwrap();
        cache
            .put("court_zxfw", "b", Secret::from("tok"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().await.size, 1);
    }
}
