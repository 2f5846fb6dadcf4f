//! Login executor boundary
//!
//! A login turns one credential into a short-lived bearer token. How that
//! happens (headless browser, captcha solving, SMS relay) is the executor's
//! business; the pool only sees the duration and the outcome.
//!
//! `HttpLoginExecutor` delegates to a login sidecar:
//!
//! ```text
//! POST <endpoint>
//! {"site": "...", "account": "...", "secret": "...", "timeout_ms": 30000}
//!
//! 200 {"token": "...", "expires_in": 3600}
//! 401/403 → credential rejected
//! other   → login failed
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub token: Secret<String>,
    /// How long the site says the token stays valid, if it says at all
    pub validity: Option<Duration>,
}

/// Performs interactive logins.
///
/// Implementations must give up once `deadline` passes; the pool also wraps
/// each call in its own timeout, so an executor that overruns only wastes
/// work.
pub trait LoginExecutor: Send + Sync {
    fn login<'a>(
        &'a self,
        credential: &'a Credential,
        deadline: Instant,
    ) -> Pin<Box<dyn Future<Output = Result<LoginGrant>> + Send + 'a>>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    site: &'a str,
    account: &'a str,
    secret: &'a str,
    timeout_ms: u64,
}

/// Response body from the login sidecar.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Login executor backed by an HTTP login sidecar.
pub struct HttpLoginExecutor {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<Secret<String>>,
}

impl HttpLoginExecutor {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        auth_token: Option<Secret<String>>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            auth_token,
        }
    }

    async fn post_login(&self, credential: &Credential, deadline: Instant) -> Result<LoginGrant> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::DeadlineElapsed);
        }

        let body = LoginRequest {
            site: &credential.site,
            account: &credential.account,
            secret: credential.secret.expose(),
            timeout_ms: remaining.as_millis() as u64,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(remaining)
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token.expose());
        }

        debug!(site = %credential.site, account = %credential.account, "dispatching login to sidecar");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::DeadlineElapsed
            } else {
                Error::Http(format!("login request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            // 401/403 means the site refused this account's secret
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::Rejected(format!(
                    "login sidecar returned {status}: {body}"
                )));
            }

            return Err(Error::Login(format!("login sidecar returned {status}: {body}")));
        }

        let parsed = response
            .json::<LoginResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("invalid login response: {e}")))?;

        grant_from_response(parsed)
    }
}

fn grant_from_response(response: LoginResponse) -> Result<LoginGrant> {
    if response.token.trim().is_empty() {
        return Err(Error::InvalidResponse("login response has an empty token".into()));
    }
    Ok(LoginGrant {
        token: Secret::new(response.token),
        validity: response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    })
}

impl LoginExecutor for HttpLoginExecutor {
    fn login<'a>(
        &'a self,
        credential: &'a Credential,
        deadline: Instant,
    ) -> Pin<Box<dyn Future<Output = Result<LoginGrant>> + Send + 'a>> {
        Box::pin(self.post_login(credential, deadline))
    }
}
