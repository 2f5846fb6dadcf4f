//! Account selection and per-account counters
//!
//! Ranking is deterministic: preferred accounts first, then the most recent
//! success, then the shortest failure streak, then account id. Blacklisted and
//! excluded accounts are never chosen. Accounts with a login already in flight
//! are skipped while an idle account remains; otherwise the best in-flight
//! account is returned so the caller joins that login instead of starting
//! another one.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use site_auth::{Credential, CredentialStats, CredentialStore};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{BlacklistConfig, StoreRetryConfig};
use crate::error::Result;
use crate::retry::with_retry;

/// The chosen credential and whether a login for it is already running.
#[derive(Debug, Clone)]
pub struct Selection {
    pub credential: Credential,
    pub busy: bool,
}

type CredentialKey = (String, String);

pub struct AccountSelector {
    store: Arc<dyn CredentialStore>,
    blacklist: BlacklistConfig,
    retry: StoreRetryConfig,
    locks: std::sync::Mutex<HashMap<CredentialKey, Arc<Mutex<()>>>>,
}

/// Selection order between two credentials; `Less` means `a` is better.
pub fn rank(a: &Credential, b: &Credential) -> Ordering {
    b.preferred
        .cmp(&a.preferred)
        .then_with(|| b.last_success_at.cmp(&a.last_success_at))
        .then_with(|| a.failure_streak.cmp(&b.failure_streak))
        .then_with(|| a.account.cmp(&b.account))
}

/// Pick from `credentials` at `now_millis`.
pub fn choose(
    mut credentials: Vec<Credential>,
    exclude: &HashSet<String>,
    in_flight: &HashSet<String>,
    now_millis: u64,
) -> Option<Selection> {
    credentials.retain(|c| !exclude.contains(&c.account) && !c.is_blacklisted_at(now_millis));
    credentials.sort_by(rank);

    let idle = credentials
        .iter()
        .position(|c| !in_flight.contains(&c.account));
    match idle {
        Some(index) => Some(Selection {
            credential: credentials.swap_remove(index),
            busy: false,
        }),
        None => credentials.into_iter().next().map(|credential| Selection {
            credential,
            busy: true,
        }),
    }
}

impl AccountSelector {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        blacklist: BlacklistConfig,
        retry: StoreRetryConfig,
    ) -> Self {
        Self {
            store,
            blacklist,
            retry,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// All credentials of `site`, best first, blacklisted ones included.
    pub async fn ranked(&self, site: &str) -> Result<Vec<Credential>> {
        let mut credentials = with_retry(&self.retry, "list credentials", || {
            self.store.list_credentials(site)
        })
        .await?;
        credentials.sort_by(rank);
        Ok(credentials)
    }

    /// Credentials automatic selection could pick right now, best first.
    pub async fn eligible(&self, site: &str) -> Result<Vec<Credential>> {
        let now = common::unix_millis();
        let mut credentials = self.ranked(site).await?;
        credentials.retain(|c| !c.is_blacklisted_at(now));
        Ok(credentials)
    }

    pub async fn find(&self, site: &str, account: &str) -> Result<Option<Credential>> {
        Ok(self
            .ranked(site)
            .await?
            .into_iter()
            .find(|c| c.account == account))
    }

    /// Choose the best credential for `site` not in `exclude`.
    ///
    /// `in_flight` names accounts with a login currently running.
    pub async fn select(
        &self,
        site: &str,
        exclude: &HashSet<String>,
        in_flight: &HashSet<String>,
    ) -> Result<Option<Selection>> {
        let credentials = self.ranked(site).await?;
        let total = credentials.len();
        let selection = choose(credentials, exclude, in_flight, common::unix_millis());
        match &selection {
            Some(s) => debug!(
                site,
                account = %s.credential.account,
                busy = s.busy,
                candidates = total,
                "selected account"
            ),
            None => debug!(site, candidates = total, excluded = exclude.len(), "no eligible account"),
        }
        Ok(selection)
    }

    /// Reset the failure streak and stamp the success.
    pub async fn record_success(&self, site: &str, account: &str) -> Result<CredentialStats> {
        let now = common::unix_millis();
        self.update(site, account, |_| CredentialStats {
            last_success_at: Some(now),
            failure_streak: 0,
            blacklist_until: None,
        })
        .await
    }

    /// Count a failed login and open a blacklist window at the threshold.
    pub async fn record_failure(&self, site: &str, account: &str) -> Result<CredentialStats> {
        self.penalize(site, account, false).await
    }

    /// The site refused the credential itself. Retrying won't help, so the
    /// streak jumps straight to the blacklist threshold.
    pub async fn record_rejection(&self, site: &str, account: &str) -> Result<CredentialStats> {
        self.penalize(site, account, true).await
    }

    async fn penalize(&self, site: &str, account: &str, rejected: bool) -> Result<CredentialStats> {
        let now = common::unix_millis();
        let blacklist = self.blacklist.clone();
        let stats = self
            .update(site, account, |current| {
                let mut failure_streak = current.failure_streak.saturating_add(1);
                if rejected {
                    failure_streak = failure_streak.max(blacklist.failure_threshold);
                }
                let blacklist_until = match blacklist.backoff(failure_streak) {
                    Some(window) => Some(now.saturating_add(window.as_millis() as u64)),
                    None => current.blacklist_until,
                };
                CredentialStats {
                    last_success_at: current.last_success_at,
                    failure_streak,
                    blacklist_until,
                }
            })
            .await?;
        if let Some(until) = stats.blacklist_until.filter(|until| *until > now) {
            warn!(
                site,
                account,
                failure_streak = stats.failure_streak,
                rejected,
                blacklist_ms = until - now,
                "account blacklisted"
            );
        }
        Ok(stats)
    }

    async fn update<F>(&self, site: &str, account: &str, next: F) -> Result<CredentialStats>
    where
        F: FnOnce(CredentialStats) -> CredentialStats,
    {
        let lock = self.lock_for(site, account);
        let _guard = lock.lock().await;

        let current = self
            .find(site, account)
            .await?
            .map(|c| c.stats())
            .unwrap_or_default();
        let stats = next(current);
        with_retry(&self.retry, "update credential stats", || {
            self.store.update_credential_stats(site, account, stats)
        })
        .await?;
        Ok(stats)
    }

    fn lock_for(&self, site: &str, account: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((site.to_owned(), account.to_owned()))
            .or_default()
            .clone()
    }
}
