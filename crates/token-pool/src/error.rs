//! Error types for token acquisition
//!
//! Callers see exactly one of the four business errors (`Validation`,
//! `NoAvailableAccount`, `LoginFailed`, `Timeout`) or `Infrastructure` when a
//! store stayed unavailable after internal retries. Errors are `Clone` because
//! singleflight followers receive a copy of the leader's outcome.

use std::fmt;
use std::time::Duration;

/// One failed login inside a request's retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub account: String,
    pub error: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.account, self.error)
    }
}

/// Where a request was waiting when its deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Queued behind the global or per-site login limit
    Slot,
    /// Leading a login that did not finish in time
    Login,
    /// Attached to another request's in-flight login
    Follower,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WaitStage::Slot => "waiting for a login slot",
            WaitStage::Login => "waiting for the login to complete",
            WaitStage::Follower => "waiting on an in-flight login",
        };
        f.write_str(label)
    }
}

/// Errors from token acquisition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no available account for site {site}: {reason}")]
    NoAvailableAccount { site: String, reason: String },

    #[error("login failed for site {site} after {} attempt(s): {}", .failures.len(), join_failures(.failures))]
    LoginFailed {
        site: String,
        failures: Vec<AttemptFailure>,
    },

    #[error("token acquisition for site {site} timed out after {}ms {stage}", .waited.as_millis())]
    Timeout {
        site: String,
        stage: WaitStage,
        waited: Duration,
    },

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

fn join_failures(failures: &[AttemptFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coarse error class, used for metrics labels and outcome comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NoAvailableAccount,
    LoginFailed,
    Timeout,
    Infrastructure,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NoAvailableAccount => "no_available_account",
            ErrorKind::LoginFailed => "login_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NoAvailableAccount { .. } => ErrorKind::NoAvailableAccount,
            Error::LoginFailed { .. } => ErrorKind::LoginFailed,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a `DurableStore` implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("durable store error: {0}")]
pub struct StoreError(pub String);
