//! Background cache and history maintenance
//!
//! A periodic task that keeps the pool tidy without touching the request
//! path: it drops expired fast-tier entries, prunes history past the
//! retention window and re-logs-in tokens that are about to expire, so most
//! requests hit the cache.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;

/// The `[maintenance]` config table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    /// Tokens with less than this left are refreshed
    pub refresh_threshold_secs: u64,
    /// Sites to warm at startup and refresh each cycle
    pub sites: Vec<String>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            refresh_threshold_secs: 600,
            sites: Vec::new(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub purged: usize,
    pub pruned: usize,
    pub refreshed: usize,
}

/// Spawn the maintenance loop. Runs every `settings.interval()`.
///
/// Errors are logged and the step is retried on the next cycle.
pub fn spawn_maintenance_task(
    coordinator: Coordinator,
    settings: MaintenanceConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval());
        // First tick completes immediately; the cache was just warmed
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = run_cycle(&coordinator, &settings).await;
            debug!(
                purged = report.purged,
                pruned = report.pruned,
                refreshed = report.refreshed,
                "maintenance cycle finished"
            );
        }
    })
}

/// Run one maintenance cycle.
pub async fn run_cycle(coordinator: &Coordinator, settings: &MaintenanceConfig) -> CycleReport {
    let mut report = CycleReport {
        purged: coordinator.purge_expired().await,
        ..CycleReport::default()
    };

    let retention_days = coordinator.config().history_retention_days;
    match coordinator.cleanup(retention_days).await {
        Ok(pruned) => report.pruned = pruned,
        Err(e) => warn!(error = %e, "history cleanup failed, will retry next cycle"),
    }

    for site in &settings.sites {
        match coordinator
            .refresh_expiring(site, settings.refresh_threshold())
            .await
        {
            Ok(refreshed) => report.refreshed += refreshed,
            Err(e) => warn!(site = %site, error = %e, "token refresh scan failed, will retry next cycle"),
        }
    }

    if report != CycleReport::default() {
        info!(
            purged = report.purged,
            pruned = report.pruned,
            refreshed = report.refreshed,
            "maintenance cycle"
        );
    }
    report
}
