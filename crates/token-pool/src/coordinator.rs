//! Acquisition coordinator
//!
//! Resolves a request to a token:
//!
//! 1. validate the request and turn its timeout into a deadline
//! 2. look the token up in the cache (skipped by `force_refresh`)
//! 3. pick an account, unless the request pins one
//! 4. lead or follow the singleflight for that (site, account)
//! 5. the leader re-checks the cache, takes a login slot and logs in
//! 6. on failure an automatic request moves on to the next untried account
//!
//! The leader's login runs in its own task, so a caller that gives up or is
//! cancelled never strands the followers attached to it. Only leaders hold
//! login slots.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use site_auth::{Credential, CredentialStore, LoginExecutor};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::TokenCache;
use crate::config::PoolConfig;
use crate::durable::DurableStore;
use crate::error::{AttemptFailure, Error, Result, WaitStage};
use crate::history::HistoryRecorder;
use crate::limiter::{LoginLimiter, SlotError};
use crate::monitor::{HealthReport, MetricsSnapshot, PerformanceMonitor};
use crate::selector::AccountSelector;
use crate::singleflight::{Group, Role};
use crate::telemetry;
use crate::types::{
    AcquisitionAttempt, AcquisitionRequest, AttemptOutcome, AttemptSource, TokenRecord,
    new_correlation_id,
};

type FlightKey = (String, String);

/// How a flight ended, as seen by every request attached to it.
#[derive(Debug, Clone)]
enum LoginFault {
    /// The login for this account failed; another account may succeed
    Failed(String),
    /// The request cannot continue (timeout, store outage)
    Terminal(Error),
}

type FlightOutcome = std::result::Result<TokenRecord, LoginFault>;

#[derive(Debug, Clone, Copy)]
enum Source {
    Cache,
    Login,
}

impl Source {
    fn label(&self) -> &'static str {
        match self {
            Source::Cache => "cache_hit",
            Source::Login => "success",
        }
    }
}

/// Per-request context threaded through the state machine.
struct Ctx<'a> {
    site: &'a str,
    correlation_id: &'a str,
    started: Instant,
    deadline: Instant,
    force_refresh: bool,
}

/// What a spawned flight needs to log in on its own.
struct FlightJob {
    credential: Credential,
    correlation_id: String,
    started: Instant,
    deadline: Instant,
    force_refresh: bool,
}

/// Accounts tried so far by one automatic request.
struct RetryPlan {
    max_attempts: u32,
    tried: HashSet<String>,
    failures: Vec<AttemptFailure>,
}

impl RetryPlan {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            tried: HashSet::new(),
            failures: Vec::new(),
        }
    }

    fn exhausted(&self) -> bool {
        self.tried.len() as u32 >= self.max_attempts
    }

    fn into_error(self, site: &str) -> Error {
        if self.failures.is_empty() {
            Error::NoAvailableAccount {
                site: site.to_owned(),
                reason: "no eligible account".into(),
            }
        } else {
            Error::LoginFailed {
                site: site.to_owned(),
                failures: self.failures,
            }
        }
    }
}

struct Inner {
    config: PoolConfig,
    cache: TokenCache,
    selector: AccountSelector,
    history: HistoryRecorder,
    monitor: PerformanceMonitor,
    login: Arc<dyn LoginExecutor>,
    limiter: LoginLimiter,
    flights: Group<FlightKey, FlightOutcome>,
}

/// Entry point for token acquisition. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Build every component from `config` and the injected collaborators.
    ///
    /// `config` is expected to have passed `PoolConfig::validate`.
    pub fn new(
        config: PoolConfig,
        credentials: Arc<dyn CredentialStore>,
        durable: Arc<dyn DurableStore>,
        login: Arc<dyn LoginExecutor>,
    ) -> Self {
        let cache = TokenCache::new(
            durable.clone(),
            config.fast_tier_capacity,
            config.store_retry.clone(),
        );
        let selector = AccountSelector::new(
            credentials,
            config.blacklist.clone(),
            config.store_retry.clone(),
        );
        let history = HistoryRecorder::new(durable, config.store_retry.clone());
        let monitor = PerformanceMonitor::new(config.alerts.clone());
        Self::from_parts(config, cache, selector, history, monitor, login)
    }

    /// Assemble from pre-built components.
    pub fn from_parts(
        config: PoolConfig,
        cache: TokenCache,
        selector: AccountSelector,
        history: HistoryRecorder,
        monitor: PerformanceMonitor,
        login: Arc<dyn LoginExecutor>,
    ) -> Self {
        let limiter = LoginLimiter::new(config.max_concurrent_logins, config.max_logins_per_site);
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                selector,
                history,
                monitor,
                login,
                limiter,
                flights: Group::new(),
            }),
        }
    }

    /// Acquire a token for `site`, optionally pinned to one account.
    pub async fn acquire_token(&self, site: &str, credential_id: Option<&str>) -> Result<TokenRecord> {
        let mut request = AcquisitionRequest::new(site);
        request.credential_id = credential_id.map(str::to_owned);
        self.acquire(request).await
    }

    pub async fn acquire(&self, request: AcquisitionRequest) -> Result<TokenRecord> {
        let started = Instant::now();
        let correlation_id = new_correlation_id();
        let span = info_span!(
            "acquire",
            site = %request.site,
            correlation_id = %correlation_id,
        );

        let result = self
            .inner
            .acquire(&request, &correlation_id, started)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match result {
            Ok((record, source)) => {
                telemetry::record_acquisition(&request.site, source.label());
                debug!(
                    account = %record.account,
                    source = source.label(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "token acquired"
                );
                Ok(record)
            }
            Err(e) => {
                telemetry::record_acquisition(&request.site, e.kind().label());
                if matches!(e, Error::Infrastructure(_)) {
                    self.inner.monitor.record_infrastructure_error();
                }
                warn!(error = %e, kind = e.kind().label(), "token acquisition failed");
                Err(e)
            }
        })
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.inner.monitor.snapshot();
        snapshot.cache_size = self.inner.cache.stats().await.size;
        snapshot
    }

    pub fn health(&self) -> HealthReport {
        self.inner.monitor.health()
    }

    pub async fn warm_up_cache(&self, site: &str) -> Result<usize> {
        self.inner.cache.warm_up(site).await
    }

    pub async fn clear_cache(&self, site: &str) -> Result<usize> {
        self.inner.cache.clear_site(site).await
    }

    /// Drop expired fast-tier entries.
    pub async fn purge_expired(&self) -> usize {
        self.inner.cache.purge_expired().await
    }

    pub fn reset_metrics(&self) {
        self.inner.monitor.reset();
        info!("performance metrics reset");
    }

    /// Delete history older than `retention_days`.
    pub async fn cleanup(&self, retention_days: u32) -> Result<usize> {
        self.inner.history.cleanup(retention_days).await
    }

    /// Re-login every cached account of `site` whose token expires within
    /// `threshold`. Returns how many tokens were replaced.
    pub async fn refresh_expiring(&self, site: &str, threshold: Duration) -> Result<usize> {
        let now = common::unix_millis();
        let expiring: Vec<String> = self
            .inner
            .cache
            .records_for_site(site)
            .await?
            .into_iter()
            .filter(|r| r.remaining_at(now) < threshold)
            .map(|r| r.account)
            .collect();

        let mut refreshed = 0;
        for account in expiring {
            let request = AcquisitionRequest::new(site)
                .with_credential(account.clone())
                .force_refresh();
            match self.acquire(request).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(site, account = %account, error = %e, "token refresh failed"),
            }
        }
        if refreshed > 0 {
            info!(site, refreshed, "refreshed expiring tokens");
        }
        Ok(refreshed)
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.inner.history
    }

    pub fn cache(&self) -> &TokenCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl Inner {
    async fn acquire(
        self: &Arc<Self>,
        request: &AcquisitionRequest,
        correlation_id: &str,
        started: Instant,
    ) -> Result<(TokenRecord, Source)> {
        let deadline = match self.validate(request) {
            Ok(timeout) => started + timeout,
            Err(e) => {
                self.record_rejection(correlation_id, &request.site, None, AttemptOutcome::Failure, started, &e)
                    .await;
                return Err(e);
            }
        };
        let ctx = Ctx {
            site: &request.site,
            correlation_id,
            started,
            deadline,
            force_refresh: request.force_refresh,
        };

        match request.credential_id.as_deref() {
            Some(account) => self.acquire_pinned(&ctx, account).await,
            None => self.acquire_automatic(&ctx).await,
        }
    }

    fn validate(&self, request: &AcquisitionRequest) -> Result<Duration> {
        let site = request.site.trim();
        if site.is_empty() {
            return Err(Error::Validation("site must not be empty".into()));
        }
        if !self.config.known_sites.is_empty() && !self.config.known_sites.iter().any(|s| s == site) {
            return Err(Error::Validation(format!("unknown site {site}")));
        }
        if request.credential_id.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(Error::Validation("credential id must not be empty".into()));
        }
        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        if timeout.is_zero() {
            return Err(Error::Validation("timeout must be greater than zero".into()));
        }
        if timeout > self.config.max_timeout() {
            return Err(Error::Validation(format!(
                "timeout {}s exceeds the maximum of {}s",
                timeout.as_secs(),
                self.config.max_timeout_secs
            )));
        }
        Ok(timeout)
    }

    async fn acquire_pinned(self: &Arc<Self>, ctx: &Ctx<'_>, account: &str) -> Result<(TokenRecord, Source)> {
        // The account must exist and be usable before even a cached token is served
        let found = self
            .checked(ctx, Some(account), self.selector.find(ctx.site, account).await)
            .await?;
        let credential = match found {
            Some(c) => c,
            None => {
                let e = Error::NoAvailableAccount {
                    site: ctx.site.to_owned(),
                    reason: format!("unknown account {account}"),
                };
                self.record_ctx_rejection(ctx, Some(account), AttemptOutcome::Failure, &e).await;
                return Err(e);
            }
        };
        if !self.config.explicit_bypasses_blacklist && credential.is_blacklisted_at(common::unix_millis()) {
            let e = Error::NoAvailableAccount {
                site: ctx.site.to_owned(),
                reason: format!("account {account} is blacklisted"),
            };
            self.record_ctx_rejection(ctx, Some(account), AttemptOutcome::Failure, &e).await;
            return Err(e);
        }

        if !ctx.force_refresh {
            let cached = self
                .checked(ctx, Some(account), self.cache.get(ctx.site, account).await)
                .await?;
            self.note_cache_lookup(cached.is_some());
            if let Some(record) = cached {
                self.note_cache_hit(ctx, &record).await;
                return Ok((record, Source::Cache));
            }
        }

        match self.run_flight(ctx, credential).await {
            Ok(record) => Ok((record, Source::Login)),
            Err(LoginFault::Failed(error)) => Err(Error::LoginFailed {
                site: ctx.site.to_owned(),
                failures: vec![AttemptFailure {
                    account: account.to_owned(),
                    error,
                }],
            }),
            Err(LoginFault::Terminal(e)) => Err(e),
        }
    }

    async fn acquire_automatic(self: &Arc<Self>, ctx: &Ctx<'_>) -> Result<(TokenRecord, Source)> {
        if !ctx.force_refresh {
            let mut hit = None;
            let eligible = self
                .checked(ctx, None, self.selector.eligible(ctx.site).await)
                .await?;
            for credential in eligible {
                let cached = self
                    .checked(
                        ctx,
                        Some(&credential.account),
                        self.cache.get(ctx.site, &credential.account).await,
                    )
                    .await?;
                if let Some(record) = cached {
                    hit = Some(record);
                    break;
                }
            }
            self.note_cache_lookup(hit.is_some());
            if let Some(record) = hit {
                self.note_cache_hit(ctx, &record).await;
                return Ok((record, Source::Cache));
            }
        }

        let mut plan = RetryPlan::new(self.config.max_attempts);
        loop {
            let in_flight: HashSet<String> = self
                .flights
                .in_flight(|(site, _)| site == ctx.site)
                .into_iter()
                .map(|(_, account)| account)
                .collect();

            let selected = self
                .checked(ctx, None, self.selector.select(ctx.site, &plan.tried, &in_flight).await)
                .await?;
            let Some(selection) = selected else {
                let e = plan.into_error(ctx.site);
                if matches!(e, Error::NoAvailableAccount { .. }) {
                    self.record_ctx_rejection(ctx, None, AttemptOutcome::Failure, &e).await;
                }
                return Err(e);
            };

            let account = selection.credential.account.clone();
            plan.tried.insert(account.clone());
            if selection.busy {
                debug!(account = %account, "every eligible account is logging in, joining");
            }

            match self.run_flight(ctx, selection.credential).await {
                Ok(record) => return Ok((record, Source::Login)),
                Err(LoginFault::Terminal(e)) => return Err(e),
                Err(LoginFault::Failed(error)) => {
                    plan.failures.push(AttemptFailure { account, error });
                    if plan.exhausted() {
                        return Err(plan.into_error(ctx.site));
                    }
                    debug!(attempts = plan.tried.len(), "trying next account");
                }
            }
        }
    }

    /// Lead or follow the login for `credential`.
    ///
    /// Both roles leave a history entry under this request's correlation id:
    /// the leader through its login attempt, a follower as a shared outcome.
    async fn run_flight(self: &Arc<Self>, ctx: &Ctx<'_>, credential: Credential) -> FlightOutcome {
        let account = credential.account.clone();
        let key = (credential.site.clone(), account.clone());
        match self.flights.join_or_lead(key) {
            Role::Leader(flight) => {
                let waiter = flight.subscribe();
                let job = FlightJob {
                    credential,
                    correlation_id: ctx.correlation_id.to_owned(),
                    started: ctx.started,
                    deadline: ctx.deadline,
                    force_refresh: ctx.force_refresh,
                };
                let inner = self.clone();
                tokio::spawn(
                    async move {
                        let outcome = inner.lead(job).await;
                        flight.complete(outcome);
                    }
                    .in_current_span(),
                );
                // The flight is bounded by this request's deadline
                match waiter.wait().await {
                    Some(outcome) => outcome,
                    None => {
                        let e = Error::Infrastructure("login task ended without an outcome".into());
                        self.trace(ctx, Some(&account), AttemptSource::Login, AttemptOutcome::Failure, Some(e.to_string()))
                            .await;
                        Err(LoginFault::Terminal(e))
                    }
                }
            }
            Role::Follower(waiter) => {
                debug!(account = %account, "joining in-flight login");
                let outcome = match timeout_at(ctx.deadline, waiter.wait()).await {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => Err(LoginFault::Terminal(Error::Infrastructure(
                        "in-flight login ended without an outcome".into(),
                    ))),
                    Err(_) => {
                        let e = Error::Timeout {
                            site: ctx.site.to_owned(),
                            stage: WaitStage::Follower,
                            waited: ctx.started.elapsed(),
                        };
                        // This request's own deadline passed, so the monitor counts it
                        let waited = ctx.started.elapsed();
                        let attempt = attempt_record(
                            ctx.correlation_id,
                            ctx.site,
                            Some(&account),
                            AttemptOutcome::Timeout,
                            AttemptSource::Shared,
                            waited,
                            Some(e.to_string()),
                        );
                        self.write_attempt(attempt, waited).await;
                        return Err(LoginFault::Terminal(e));
                    }
                };
                let (result, error) = describe(&outcome);
                self.trace(ctx, Some(&account), AttemptSource::Shared, result, error)
                    .await;
                outcome
            }
        }
    }

    /// Body of a leader's flight: re-check, take a slot, log in, store.
    async fn lead(&self, job: FlightJob) -> FlightOutcome {
        let site = job.credential.site.as_str();
        let account = job.credential.account.as_str();
        let flight_started = Instant::now();

        if !job.force_refresh {
            match self.cache.get(site, account).await {
                Ok(Some(record)) => {
                    debug!(account, "token cached while waiting to lead");
                    self.trace_job(&job, AttemptSource::Cache, AttemptOutcome::Success, None)
                        .await;
                    return Ok(record);
                }
                Ok(None) => {}
                Err(e) => {
                    self.trace_job(&job, AttemptSource::Rejected, AttemptOutcome::Failure, Some(e.to_string()))
                        .await;
                    return Err(LoginFault::Terminal(e));
                }
            }
        }

        let permit = match self.limiter.acquire(site, job.deadline).await {
            Ok(permit) => permit,
            Err(SlotError::Elapsed) => {
                let e = Error::Timeout {
                    site: site.to_owned(),
                    stage: WaitStage::Slot,
                    waited: job.started.elapsed(),
                };
                self.finish_attempt(&job, AttemptOutcome::Timeout, flight_started.elapsed(), Some(e.to_string()))
                    .await;
                return Err(LoginFault::Terminal(e));
            }
            Err(SlotError::Closed) => {
                let e = Error::Infrastructure("login limiter closed".into());
                self.trace_job(&job, AttemptSource::Rejected, AttemptOutcome::Failure, Some(e.to_string()))
                    .await;
                return Err(LoginFault::Terminal(e));
            }
        };

        telemetry::set_logins_in_flight(self.monitor.login_started());
        let login_started = Instant::now();
        debug!(account, "logging in");
        let result = timeout_at(job.deadline, self.login.login(&job.credential, job.deadline)).await;
        drop(permit);
        telemetry::set_logins_in_flight(self.monitor.login_finished());
        let login_secs = login_started.elapsed().as_secs_f64();

        match result {
            Ok(Ok(grant)) => {
                telemetry::record_login(site, "success", login_secs);
                let ttl = grant.validity.unwrap_or_else(|| self.config.default_token_ttl());
                let record = TokenRecord::new(site, account, grant.token, common::unix_millis(), ttl);

                if let Err(e) = self.cache.store(record.clone()).await {
                    self.degraded("persisting token", &e);
                }
                if let Err(e) = self.selector.record_success(site, account).await {
                    self.degraded("recording credential success", &e);
                }
                self.finish_attempt(&job, AttemptOutcome::Success, flight_started.elapsed(), None)
                    .await;
                info!(account, ttl_secs = ttl.as_secs(), login_secs, "login succeeded");
                Ok(record)
            }
            Ok(Err(site_auth::Error::DeadlineElapsed)) | Err(_) => {
                telemetry::record_login(site, "timeout", login_secs);
                let e = Error::Timeout {
                    site: site.to_owned(),
                    stage: WaitStage::Login,
                    waited: job.started.elapsed(),
                };
                warn!(account, "login did not finish before the deadline");
                self.note_credential_failure(site, account).await;
                self.finish_attempt(&job, AttemptOutcome::Timeout, flight_started.elapsed(), Some(e.to_string()))
                    .await;
                Err(LoginFault::Terminal(e))
            }
            Ok(Err(e)) if e.is_rejection() => {
                telemetry::record_login(site, "rejected", login_secs);
                warn!(account, error = %e, "site rejected the credential");
                if let Err(store_err) = self.selector.record_rejection(site, account).await {
                    self.degraded("recording credential rejection", &store_err);
                }
                let detail = e.to_string();
                self.finish_attempt(&job, AttemptOutcome::Failure, flight_started.elapsed(), Some(detail.clone()))
                    .await;
                Err(LoginFault::Failed(detail))
            }
            Ok(Err(e)) => {
                telemetry::record_login(site, "failure", login_secs);
                warn!(account, error = %e, "login failed");
                self.note_credential_failure(site, account).await;
                let detail = e.to_string();
                self.finish_attempt(&job, AttemptOutcome::Failure, flight_started.elapsed(), Some(detail.clone()))
                    .await;
                Err(LoginFault::Failed(detail))
            }
        }
    }

    async fn note_credential_failure(&self, site: &str, account: &str) {
        if let Err(e) = self.selector.record_failure(site, account).await {
            self.degraded("recording credential failure", &e);
        }
    }

    fn note_cache_lookup(&self, hit: bool) {
        self.monitor.record_cache_lookup(hit);
        telemetry::record_cache_lookup(hit);
    }

    /// Record a login attempt in history and the monitor.
    async fn finish_attempt(
        &self,
        job: &FlightJob,
        outcome: AttemptOutcome,
        duration: Duration,
        error: Option<String>,
    ) {
        let attempt = attempt_record(
            &job.correlation_id,
            &job.credential.site,
            Some(&job.credential.account),
            outcome,
            AttemptSource::Login,
            duration,
            error,
        );
        self.write_attempt(attempt, duration).await;
    }

    async fn record_ctx_rejection(
        &self,
        ctx: &Ctx<'_>,
        account: Option<&str>,
        outcome: AttemptOutcome,
        error: &Error,
    ) {
        self.record_rejection(ctx.correlation_id, ctx.site, account, outcome, ctx.started, error)
            .await;
    }

    /// Record a request that was turned away before any login.
    async fn record_rejection(
        &self,
        correlation_id: &str,
        site: &str,
        account: Option<&str>,
        outcome: AttemptOutcome,
        started: Instant,
        error: &Error,
    ) {
        let duration = started.elapsed();
        let attempt = attempt_record(
            correlation_id,
            site,
            account,
            outcome,
            AttemptSource::Rejected,
            duration,
            Some(error.to_string()),
        );
        self.write_attempt(attempt, duration).await;
    }

    /// Pass `result` through, recording a store failure that ends the request.
    async fn checked<T>(&self, ctx: &Ctx<'_>, account: Option<&str>, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.trace(ctx, account, AttemptSource::Rejected, AttemptOutcome::Failure, Some(e.to_string()))
                .await;
        }
        result
    }

    async fn note_cache_hit(&self, ctx: &Ctx<'_>, record: &TokenRecord) {
        self.trace(ctx, Some(&record.account), AttemptSource::Cache, AttemptOutcome::Success, None)
            .await;
    }

    async fn trace(
        &self,
        ctx: &Ctx<'_>,
        account: Option<&str>,
        source: AttemptSource,
        outcome: AttemptOutcome,
        error: Option<String>,
    ) {
        let attempt = attempt_record(
            ctx.correlation_id,
            ctx.site,
            account,
            outcome,
            source,
            ctx.started.elapsed(),
            error,
        );
        self.append_history(&attempt).await;
    }

    async fn trace_job(
        &self,
        job: &FlightJob,
        source: AttemptSource,
        outcome: AttemptOutcome,
        error: Option<String>,
    ) {
        let attempt = attempt_record(
            &job.correlation_id,
            &job.credential.site,
            Some(&job.credential.account),
            outcome,
            source,
            job.started.elapsed(),
            error,
        );
        self.append_history(&attempt).await;
    }

    /// History-only entry. The monitor already saw this request as a cache
    /// lookup, a shared login or an infrastructure error.
    async fn append_history(&self, attempt: &AcquisitionAttempt) {
        if let Err(e) = self.history.record(attempt).await {
            warn!(
                correlation_id = %attempt.correlation_id,
                source = attempt.source.label(),
                error = %e,
                "recording request outcome failed"
            );
        }
    }

    async fn write_attempt(&self, attempt: AcquisitionAttempt, duration: Duration) {
        self.monitor.record_attempt(attempt.outcome, duration);
        if let Err(e) = self.history.record(&attempt).await {
            self.degraded("recording acquisition history", &e);
        }
    }

    /// A store write failed after the outcome was already decided.
    fn degraded(&self, what: &str, e: &Error) {
        self.monitor.record_infrastructure_error();
        error!(error = %e, "{what} failed; continuing without it");
    }
}

fn attempt_record(
    correlation_id: &str,
    site: &str,
    account: Option<&str>,
    outcome: AttemptOutcome,
    source: AttemptSource,
    duration: Duration,
    error: Option<String>,
) -> AcquisitionAttempt {
    AcquisitionAttempt {
        correlation_id: correlation_id.to_owned(),
        site: site.to_owned(),
        account: account.map(str::to_owned),
        outcome,
        source,
        duration_ms: duration.as_millis() as u64,
        error,
        timestamp: common::unix_millis(),
    }
}

/// How a shared flight ended, for a follower's history entry.
fn describe(outcome: &FlightOutcome) -> (AttemptOutcome, Option<String>) {
    match outcome {
        Ok(_) => (AttemptOutcome::Success, None),
        Err(LoginFault::Failed(error)) => (AttemptOutcome::Failure, Some(error.clone())),
        Err(LoginFault::Terminal(e @ Error::Timeout { .. })) => (AttemptOutcome::Timeout, Some(e.to_string())),
        Err(LoginFault::Terminal(e)) => (AttemptOutcome::Failure, Some(e.to_string())),
    }
}
