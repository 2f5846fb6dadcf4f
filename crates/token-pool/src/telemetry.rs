//! Metrics facade emission
//!
//! Emits through the `metrics` crate; the embedding binary decides whether a
//! recorder (Prometheus) is installed. Without one these calls are no-ops.
//!
//! - `token_acquisitions_total` (counter): labels `site`, `outcome`
//! - `token_login_duration_seconds` (histogram): labels `site`, `outcome`
//! - `token_cache_lookups_total` (counter): label `result`
//! - `token_logins_in_flight` (gauge)

/// Record the terminal outcome of one `acquire` call.
///
/// `outcome` is `cache_hit`, `success`, or an error kind label.
pub fn record_acquisition(site: &str, outcome: &str) {
    metrics::counter!(
        "token_acquisitions_total",
        "site" => site.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one login executor call.
pub fn record_login(site: &str, outcome: &str, duration_secs: f64) {
    metrics::histogram!(
        "token_login_duration_seconds",
        "site" => site.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("token_cache_lookups_total", "result" => result).increment(1);
}

pub fn set_logins_in_flight(count: usize) {
    metrics::gauge!("token_logins_in_flight").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_acquisition("court_zxfw", "success");
        record_login("court_zxfw", "failure", 1.5);
        record_cache_lookup(true);
        set_logins_in_flight(3);
    }

    #[test]
    fn acquisitions_render_with_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_acquisition("court_zxfw", "cache_hit");
        record_acquisition("court_zxfw", "cache_hit");
        record_acquisition("court_zxfw", "login_failed");

        let output = handle.render();
        assert!(
            output.contains(r#"token_acquisitions_total{site="court_zxfw",outcome="cache_hit"} 2"#),
            "got:\n{output}"
        );
        assert!(output.contains(r#"outcome="login_failed"} 1"#), "got:\n{output}");
    }

    #[test]
    fn cache_lookups_and_gauge_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_cache_lookup(false);
        set_logins_in_flight(2);

        let output = handle.render();
        assert!(output.contains(r#"token_cache_lookups_total{result="miss"} 1"#), "got:\n{output}");
        assert!(output.contains("token_logins_in_flight 2"), "got:\n{output}");
    }

    #[test]
    fn login_duration_renders_as_summary_without_buckets() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_login("court_zxfw", "success", 2.0);

        let output = handle.render();
        assert!(output.contains("token_login_duration_seconds"), "got:\n{output}");
        assert!(
            output.contains(r#"token_login_duration_seconds_count{site="court_zxfw",outcome="success"} 1"#),
            "got:\n{output}"
        );
    }
}
