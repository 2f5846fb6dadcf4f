//! Live performance aggregates and health
//!
//! Counters are atomics updated on every recorded attempt and cache lookup.
//! `health()` compares them against `AlertThresholds`; each breached
//! threshold is one alert, and the alert count sets the status.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::config::AlertThresholds;
use crate::types::AttemptOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub alerts: Vec<String>,
}

/// Point-in-time view of the monitor's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_acquisitions: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub success_rate: f64,
    pub timeout_rate: f64,
    pub average_duration_ms: f64,
    pub current_concurrency: usize,
    pub peak_concurrency: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    /// Fast-tier entries; filled in by the coordinator
    pub cache_size: usize,
    pub infrastructure_errors: u64,
    /// Unix milliseconds of construction or the last `reset`
    pub since: u64,
}

pub struct PerformanceMonitor {
    thresholds: AlertThresholds,
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    duration_ms_sum: AtomicU64,
    current: AtomicUsize,
    peak: AtomicUsize,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    infrastructure_errors: AtomicU64,
    since: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            duration_ms_sum: AtomicU64::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            infrastructure_errors: AtomicU64::new(0),
            since: AtomicU64::new(common::unix_millis()),
        }
    }

    pub fn record_attempt(&self, outcome: AttemptOutcome, duration: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.duration_ms_sum
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        let counter = match outcome {
            AttemptOutcome::Success => &self.successes,
            AttemptOutcome::Failure => &self.failures,
            AttemptOutcome::Timeout => &self.timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_infrastructure_error(&self) {
        self.infrastructure_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A login took a slot.
    pub fn login_started(&self) -> usize {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    /// A login released its slot.
    pub fn login_finished(&self) -> usize {
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let timeouts = self.timeouts.load(Ordering::Relaxed);
        let duration_ms_sum = self.duration_ms_sum.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_acquisitions: total,
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            timeouts,
            success_rate: ratio(successes, total),
            timeout_rate: ratio(timeouts, total),
            average_duration_ms: ratio(duration_ms_sum, total),
            current_concurrency: self.current.load(Ordering::SeqCst),
            peak_concurrency: self.peak.load(Ordering::SeqCst),
            cache_hits,
            cache_misses,
            cache_hit_rate: ratio(cache_hits, cache_hits + cache_misses),
            cache_size: 0,
            infrastructure_errors: self.infrastructure_errors.load(Ordering::Relaxed),
            since: self.since.load(Ordering::Relaxed),
        }
    }

    pub fn health(&self) -> HealthReport {
        evaluate(&self.snapshot(), &self.thresholds)
    }

    /// Zero every counter. Logins still in flight keep counting toward
    /// current concurrency.
    pub fn reset(&self) {
        for counter in [
            &self.total,
            &self.successes,
            &self.failures,
            &self.timeouts,
            &self.duration_ms_sum,
            &self.cache_hits,
            &self.cache_misses,
            &self.infrastructure_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.peak
            .store(self.current.load(Ordering::SeqCst), Ordering::SeqCst);
        self.since.store(common::unix_millis(), Ordering::Relaxed);
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Health status for `snapshot` under `thresholds`.
pub fn evaluate(snapshot: &MetricsSnapshot, thresholds: &AlertThresholds) -> HealthReport {
    let mut alerts = Vec::new();
    let enough_attempts = snapshot.total_acquisitions >= thresholds.min_samples;

    if enough_attempts && snapshot.success_rate < thresholds.min_success_rate {
        alerts.push(format!(
            "success rate {:.2} below {:.2}",
            snapshot.success_rate, thresholds.min_success_rate
        ));
    }
    if enough_attempts && snapshot.timeout_rate > thresholds.max_timeout_rate {
        alerts.push(format!(
            "timeout rate {:.2} above {:.2}",
            snapshot.timeout_rate, thresholds.max_timeout_rate
        ));
    }
    let max_avg_ms = thresholds.max_average_duration_secs * 1000.0;
    if snapshot.total_acquisitions > 0 && snapshot.average_duration_ms > max_avg_ms {
        alerts.push(format!(
            "average login duration {:.0}ms above {:.0}ms",
            snapshot.average_duration_ms, max_avg_ms
        ));
    }
    if snapshot.current_concurrency > thresholds.max_concurrency {
        alerts.push(format!(
            "login concurrency {} above {}",
            snapshot.current_concurrency, thresholds.max_concurrency
        ));
    }
    let lookups = snapshot.cache_hits + snapshot.cache_misses;
    if lookups >= thresholds.min_samples && snapshot.cache_hit_rate < thresholds.min_cache_hit_rate {
        alerts.push(format!(
            "cache hit rate {:.2} below {:.2}",
            snapshot.cache_hit_rate, thresholds.min_cache_hit_rate
        ));
    }

    let collapsed =
        enough_attempts && snapshot.success_rate < thresholds.min_success_rate / 2.0;
    let status = match alerts.len() {
        _ if collapsed => HealthStatus::Unhealthy,
        0 => HealthStatus::Healthy,
        1 => HealthStatus::Warning,
        2 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    };
    HealthReport { status, alerts }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(AlertThresholds::default())
    }

    #[test]
    fn snapshot_tracks_rates_and_average() {
        let m = monitor();
        m.record_attempt(AttemptOutcome::Success, Duration::from_millis(2_000));
        m.record_attempt(AttemptOutcome::Success, Duration::from_millis(1_000));
        m.record_attempt(AttemptOutcome::Failure, Duration::from_millis(3_000));
        m.record_attempt(AttemptOutcome::Timeout, Duration::from_millis(6_000));
        m.record_cache_lookup(true);
        m.record_cache_lookup(false);

        let s = m.snapshot();
        assert_eq!(s.total_acquisitions, 4);
        assert_eq!(s.successes, 2);
        assert_eq!(s.success_rate, 0.5);
        assert_eq!(s.timeout_rate, 0.25);
        assert_eq!(s.average_duration_ms, 3_000.0);
        assert_eq!(s.cache_hit_rate, 0.5);
    }

    #[test]
    fn concurrency_tracks_peak() {
        let m = monitor();
        m.login_started();
        m.login_started();
        m.login_finished();
        m.login_started();
        m.login_finished();
        m.login_finished();
        m.login_finished();

        let s = m.snapshot();
        assert_eq!(s.current_concurrency, 0);
        assert_eq!(s.peak_concurrency, 2);
    }

    #[test]
    fn fresh_monitor_is_healthy() {
        let report = monitor().health();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn rate_alerts_wait_for_enough_samples() {
        let m = monitor();
        for _ in 0..5 {
            m.record_attempt(AttemptOutcome::Failure, Duration::from_millis(10));
        }
        assert_eq!(m.health().status, HealthStatus::Healthy);
    }

    #[test]
    fn one_breach_is_a_warning() {
        let m = monitor();
        for i in 0..10 {
            let outcome = if i < 7 {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            };
            m.record_attempt(outcome, Duration::from_millis(100));
        }
        let report = m.health();
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.alerts.len(), 1);
        assert!(report.alerts[0].contains("success rate"));
    }

    #[test]
    fn two_breaches_are_degraded() {
        let m = monitor();
        for i in 0..10 {
            let outcome = if i < 7 {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Timeout
            };
            m.record_attempt(outcome, Duration::from_millis(100));
        }
        // success rate 0.7 < 0.8 and timeout rate 0.3 > 0.2
        assert_eq!(m.health().status, HealthStatus::Degraded);
    }

    #[test]
    fn collapsed_success_rate_is_unhealthy() {
        let m = monitor();
        for _ in 0..10 {
            m.record_attempt(AttemptOutcome::Failure, Duration::from_millis(100));
        }
        let report = m.health();
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn slow_logins_raise_an_alert() {
        let m = PerformanceMonitor::new(AlertThresholds {
            max_average_duration_secs: 1.0,
            ..AlertThresholds::default()
        });
        m.record_attempt(AttemptOutcome::Success, Duration::from_secs(2));
        let report = m.health();
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.alerts[0].contains("average login duration"));
    }

    #[test]
    fn reset_zeroes_counters_but_keeps_in_flight() {
        let m = monitor();
        m.record_attempt(AttemptOutcome::Success, Duration::from_millis(100));
        m.record_infrastructure_error();
        m.login_started();

        m.reset();
        let s = m.snapshot();
        assert_eq!(s.total_acquisitions, 0);
        assert_eq!(s.infrastructure_errors, 0);
        assert_eq!(s.current_concurrency, 1);
        assert_eq!(s.peak_concurrency, 1);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
