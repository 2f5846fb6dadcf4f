//! Login concurrency limits
//!
//! Two semaphores gate every login: one global and one per site. The
//! per-account limit of one is enforced by singleflight, not here. Permits are
//! taken site first, then global, so a site at its own cap does not hold
//! global capacity other sites could use.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout_at};

/// Why a slot could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("deadline elapsed waiting for a login slot")]
    Elapsed,
    #[error("login limiter closed")]
    Closed,
}

/// Held for the duration of one login; dropping it frees both slots.
#[derive(Debug)]
pub struct LoginPermit {
    _site: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

pub struct LoginLimiter {
    global: Arc<Semaphore>,
    per_site_limit: usize,
    sites: std::sync::Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl LoginLimiter {
    pub fn new(global_limit: usize, per_site_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_site_limit,
            sites: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a slot for `site` until `deadline`.
    pub async fn acquire(&self, site: &str, deadline: Instant) -> Result<LoginPermit, SlotError> {
        let site_sem = self.site_semaphore(site);
        let global = self.global.clone();

        let permits = async move {
            let site_permit = site_sem.acquire_owned().await?;
            let global_permit = global.acquire_owned().await?;
            Ok::<_, tokio::sync::AcquireError>(LoginPermit {
                _site: site_permit,
                _global: global_permit,
            })
        };

        match timeout_at(deadline, permits).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(SlotError::Closed),
            Err(_) => Err(SlotError::Elapsed),
        }
    }

    #[cfg(test)]
    fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    #[cfg(test)]
    fn available_for(&self, site: &str) -> usize {
        self.site_semaphore(site).available_permits()
    }

    fn site_semaphore(&self, site: &str) -> Arc<Semaphore> {
        let mut sites = self.sites.lock().unwrap_or_else(PoisonError::into_inner);
        sites
            .entry(site.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_site_limit)))
            .clone()
    }
}
