//! Bounded retries for store operations
//!
//! Credential and durable store calls are retried with exponential backoff
//! plus jitter. Exhaustion surfaces as `Error::Infrastructure` naming the
//! operation and the last failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tracing::warn;

use crate::config::StoreRetryConfig;
use crate::error::{Error, Result};

/// Run `f` up to `policy.attempts` times.
///
/// Sleeps `base * 2^n` plus up to `base` of jitter between tries.
pub async fn with_retry<T, E, F, Fut>(policy: &StoreRetryConfig, op: &str, mut f: F) -> Result<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(Error::Infrastructure(format!(
                    "{op} failed after {attempts} attempt(s): {e}"
                )));
            }
            Err(e) => {
                let delay = backoff_delay(policy.base_delay_ms, attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=base_ms)
    };
    Duration::from_millis(exp.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(attempts: u32) -> StoreRetryConfig {
        StoreRetryConfig {
            attempts,
            base_delay_ms: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), "load token", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err("locked") } else { Ok(n) }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_infrastructure() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&policy(2), "save token", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("disk full")
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Infrastructure(_)));
        assert!(err.to_string().contains("save token failed after 2 attempt(s): disk full"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delay_doubles_with_bounded_jitter() {
        for attempt in 1..=4 {
            let delay = backoff_delay(100, attempt).as_millis() as u64;
            let floor = 100 << (attempt - 1);
            assert!((floor..=floor + 100).contains(&delay), "attempt {attempt}: {delay}ms");
        }
        assert_eq!(backoff_delay(0, 3), Duration::ZERO);
    }
}
