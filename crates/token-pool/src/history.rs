//! Acquisition history
//!
//! Append-only log of terminal acquisition attempts, kept in the durable
//! store. Backs per-site statistics and retention cleanup.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::StoreRetryConfig;
use crate::durable::DurableStore;
use crate::error::Result;
use crate::retry::with_retry;
use crate::types::{AcquisitionAttempt, AttemptOutcome, AttemptSource};

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Aggregates over a site's history window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteStatistics {
    pub site: String,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Requests answered from the cache without a login
    pub cache_hits: u64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

pub struct HistoryRecorder {
    durable: Arc<dyn DurableStore>,
    retry: StoreRetryConfig,
}

impl HistoryRecorder {
    pub fn new(durable: Arc<dyn DurableStore>, retry: StoreRetryConfig) -> Self {
        Self { durable, retry }
    }

    pub async fn record(&self, attempt: &AcquisitionAttempt) -> Result<()> {
        with_retry(&self.retry, "append attempt", || self.durable.append_attempt(attempt)).await?;
        debug!(
            correlation_id = %attempt.correlation_id,
            site = %attempt.site,
            outcome = attempt.outcome.label(),
            "recorded acquisition attempt"
        );
        Ok(())
    }

    /// Delete attempts older than `retention_days`; returns how many went.
    pub async fn cleanup(&self, retention_days: u32) -> Result<usize> {
        let cutoff = common::unix_millis().saturating_sub(u64::from(retention_days) * DAY_MILLIS);
        let removed =
            with_retry(&self.retry, "prune attempts", || self.durable.prune_attempts(cutoff)).await?;
        info!(retention_days, removed, "pruned acquisition history");
        Ok(removed)
    }

    /// Counts and averages for `site` over attempts at or after `since`.
    pub async fn statistics(&self, site: &str, since: u64) -> Result<SiteStatistics> {
        let attempts =
            with_retry(&self.retry, "list attempts", || self.durable.list_attempts(since)).await?;
        Ok(summarize(site, attempts.iter().filter(|a| a.site == site)))
    }

    /// The `limit` most recent attempts, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AcquisitionAttempt>> {
        let attempts =
            with_retry(&self.retry, "list attempts", || self.durable.list_attempts(0)).await?;
        Ok(attempts.into_iter().rev().take(limit).collect())
    }
}

fn summarize<'a>(
    site: &str,
    attempts: impl Iterator<Item = &'a AcquisitionAttempt>,
) -> SiteStatistics {
    let mut stats = SiteStatistics {
        site: site.to_owned(),
        total: 0,
        successes: 0,
        failures: 0,
        timeouts: 0,
        cache_hits: 0,
        success_rate: 0.0,
        average_duration_ms: 0.0,
    };
    let mut duration_sum = 0u64;
    for attempt in attempts {
        stats.total += 1;
        duration_sum += attempt.duration_ms;
        match attempt.outcome {
            AttemptOutcome::Success => stats.successes += 1,
            AttemptOutcome::Failure => stats.failures += 1,
            AttemptOutcome::Timeout => stats.timeouts += 1,
        }
        if attempt.source == AttemptSource::Cache {
            stats.cache_hits += 1;
        }
    }
    if stats.total > 0 {
        stats.success_rate = stats.successes as f64 / stats.total as f64;
        stats.average_duration_ms = duration_sum as f64 / stats.total as f64;
    }
    stats
}
