//! Records shared by the cache, the history log and the coordinator

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};

/// A token issued for one (site, account) pair.
///
/// `issued_at` and `expires_at` are unix milliseconds; `expires_at` is always
/// strictly greater than `issued_at`. Records are immutable: a refresh
/// replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub site: String,
    pub account: String,
    pub token: Secret<String>,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl TokenRecord {
    /// Build a record valid for `ttl` from `issued_at`.
    ///
    /// A zero ttl is bumped to one millisecond to keep `expires_at > issued_at`.
    pub fn new(
        site: impl Into<String>,
        account: impl Into<String>,
        token: Secret<String>,
        issued_at: u64,
        ttl: Duration,
    ) -> Self {
        let ttl_millis = (ttl.as_millis() as u64).max(1);
        Self {
            site: site.into(),
            account: account.into(),
            token,
            issued_at,
            expires_at: issued_at.saturating_add(ttl_millis),
        }
    }

    /// Whether the token may still be served at `now_millis`.
    pub fn is_valid_at(&self, now_millis: u64) -> bool {
        now_millis < self.expires_at
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining_at(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_millis))
    }
}

/// Terminal outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Timeout => "timeout",
        }
    }
}

/// Where a history entry's outcome came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptSource {
    /// This request ran the login itself
    #[default]
    Login,
    /// This request joined another request's in-flight login
    Shared,
    /// Served from the token cache
    Cache,
    /// Ended before any login (validation, no account, store outage)
    Rejected,
}

impl AttemptSource {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptSource::Login => "login",
            AttemptSource::Shared => "shared",
            AttemptSource::Cache => "cache",
            AttemptSource::Rejected => "rejected",
        }
    }
}

/// One entry of the acquisition history log. Immutable once written.
///
/// Login attempts are recorded under the correlation id of the request that
/// ran them. Every other request gets one entry of its own, so each
/// correlation id can be traced to its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionAttempt {
    pub correlation_id: String,
    pub site: String,
    /// Absent when the request failed before an account was resolved
    pub account: Option<String>,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub source: AttemptSource,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Unix milliseconds at which the attempt ended
    pub timestamp: u64,
}

/// A caller's request for a token.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub site: String,
    /// Pin the login to this account instead of letting the selector choose
    pub credential_id: Option<String>,
    /// Total time the caller is willing to wait; the pool default when unset
    pub timeout: Option<Duration>,
    /// Skip the cache and always log in
    pub force_refresh: bool,
}

impl AcquisitionRequest {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            credential_id: None,
            timeout: None,
            force_refresh: false,
        }
    }

    pub fn with_credential(mut self, account: impl Into<String>) -> Self {
        self.credential_id = Some(account.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// Unique id tying a request's log lines, metrics and history entries together.
pub fn new_correlation_id() -> String {
    format!("acq_{}", uuid::Uuid::new_v4().as_simple())
}
