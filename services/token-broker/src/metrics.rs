//! Prometheus metrics exposition
//!
//! The token pool emits through the `metrics` facade; this module installs
//! the recorder that turns those into the `/metrics` text format.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Login durations range from sub-second cached sidecar replies to multi
/// minute challenge solving.
const LOGIN_DURATION_BUCKETS: &[f64] = &[
    0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("token_login_duration_seconds".to_string()),
            LOGIN_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `token_login_duration_seconds` renders as a histogram with `_bucket` lines
/// rather than the default summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
