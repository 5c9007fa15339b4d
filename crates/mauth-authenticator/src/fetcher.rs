//! Application info retrieval from the key service.
//!
//! The key service answers `GET <base><token path><app uuid>.json` with
//!
//! ```json
//! {"security_token": {"app_uuid": "...", "public_key_str": "-----BEGIN PUBLIC KEY-----..."}}
//! ```
//!
//! and an optional `Cache-Control: max-age=N` header that bounds how long the
//! answer may be cached. Lookups are retried immediately up to the configured
//! number of attempts. Every attempt is bounded by its own timeout, and an
//! optional overall timeout covers all attempts together.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::StatusCode;
use http::header::{CACHE_CONTROL, HeaderMap};
use mauth_core::{MAuthConfig, ProtocolVersion, RetryPolicy};
use reqwest::Url;
use rsa::RsaPrivateKey;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::error::AuthError;
use crate::header::encode;
use crate::info::{ApplicationInfo, AuthenticationInfo, SecurityTokenResponse};
use crate::signature;

/// An application's key together with how long it may be cached.
#[derive(Debug, Clone)]
pub struct FetchedApplicationInfo {
    /// The application's registration.
    pub info: ApplicationInfo,
    /// `max-age` from the response's `Cache-Control`, if any.
    pub max_age: Option<Duration>,
}

/// Why a single request to the key service failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// The request could not be sent or the response could not be read.
    #[error("Key service request failed")]
    Transport(#[source] reqwest::Error),

    /// No complete response arrived within the per-attempt limit.
    #[error("Key service request timed out after {0:?}")]
    TimedOut(Duration),

    /// The key service answered with a non-success status.
    #[error("Key service answered {0}")]
    Status(StatusCode),

    /// The response body is not a security token document.
    #[error("Unreadable key service response")]
    Body(#[from] serde_json::Error),

    /// The outbound request could not be signed.
    #[error("Cannot sign key service request: {0}")]
    Signing(String),
}

/// Why an application info lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Every attempt failed.
    #[error("Key service lookup at {url} failed after {attempts} attempt(s)")]
    Exhausted {
        /// The requested URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last: AttemptError,
    },

    /// The overall timeout elapsed before any attempt succeeded.
    #[error("Key service lookup at {url} timed out after {timeout:?}")]
    TimedOut {
        /// The requested URL.
        url: String,
        /// The configured limit.
        timeout: Duration,
    },

    /// The key service URL could not be built.
    #[error("Invalid key service URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The task running the lookup ended without producing a result.
    #[error("Key service lookup was interrupted: {reason}")]
    Interrupted {
        /// Why the task ended.
        reason: String,
    },
}

/// Source of application info for the key cache.
#[async_trait]
pub trait ApplicationInfoFetcher: Send + Sync {
    /// Retrieve `app_uuid`'s registration using `version`'s lookup path.
    async fn fetch(
        &self,
        app_uuid: Uuid,
        version: ProtocolVersion,
    ) -> Result<FetchedApplicationInfo, FetchError>;
}

/// Signs key service requests as the local application.
struct RequestSigner {
    app_uuid: Uuid,
    key: Arc<RsaPrivateKey>,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("app_uuid", &self.app_uuid)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl RequestSigner {
    fn headers_for(&self, path: &str, version: ProtocolVersion) -> Result<HeaderMap, AuthError> {
        let info = AuthenticationInfo::new(self.app_uuid, Utc::now());
        let hash = canonicalize("GET", path, b"", info.app_uuid, info.signed_time_secs());
        let sig = signature::sign(&hash, &self.key)?;

        let mut headers = HeaderMap::new();
        encode(&info, &sig, version).apply(&mut headers)?;
        Ok(headers)
    }
}

/// [`ApplicationInfoFetcher`] backed by the HTTP key service.
#[derive(Debug)]
pub struct HttpApplicationInfoFetcher {
    client: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
    attempt_timeout: Duration,
    timeout: Option<Duration>,
    signer: Option<RequestSigner>,
}

impl HttpApplicationInfoFetcher {
    /// Create an unsigned fetcher for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unexpected`] if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, retry_policy: RetryPolicy) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AuthError::Unexpected(anyhow::Error::new(e).context("HTTP client")))?;
        Ok(Self::with_client(client, base_url, retry_policy))
    }

    /// Create an unsigned fetcher using an existing HTTP client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry_policy,
            attempt_timeout: MAuthConfig::DEFAULT_ATTEMPT_TIMEOUT,
            timeout: None,
            signer: None,
        }
    }

    /// Create a fetcher from configuration.
    ///
    /// Lookups are signed with the configured application's key and bounded by
    /// the configured attempt and request timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the configured private key cannot
    /// be loaded.
    pub fn from_config(config: &MAuthConfig) -> Result<Self, AuthError> {
        Ok(Self::new(&config.mauth_base_url, config.retry_policy)?
            .with_attempt_timeout(config.attempt_timeout)
            .with_timeout(config.request_timeout)
            .with_credentials(config.app_uuid, &config.private_key)?)
    }

    /// Bound every single request by `timeout`.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Bound each lookup, across all of its attempts, by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sign every lookup as `app_uuid` with `private_key` (PEM or path).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the key cannot be loaded.
    pub fn with_credentials(mut self, app_uuid: Uuid, private_key: &str) -> Result<Self, AuthError> {
        let key = signature::load_private_key(private_key)?;
        self.signer = Some(RequestSigner {
            app_uuid,
            key: Arc::new(key),
        });
        Ok(self)
    }

    /// The lookup URL for `app_uuid` under `version`.
    ///
    /// Any path on the base URL is kept; a trailing slash is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the result is not an absolute URL.
    pub fn token_url(&self, app_uuid: Uuid, version: ProtocolVersion) -> Result<Url, FetchError> {
        let url = format!(
            "{}{}{}.json",
            self.base_url.trim_end_matches('/'),
            version.profile().token_request_path,
            app_uuid.hyphenated()
        );
        Url::parse(&url).map_err(|e| FetchError::InvalidUrl {
            url,
            reason: e.to_string(),
        })
    }

    async fn attempt(
        &self,
        url: &Url,
        version: ProtocolVersion,
        attempt: u32,
    ) -> Result<FetchedApplicationInfo, AttemptError> {
        debug!(%url, attempt, %version, "Requesting application info");

        let limit = self.attempt_timeout;
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                AttemptError::TimedOut(limit)
            } else {
                AttemptError::Transport(e)
            }
        };

        let mut request = self.client.get(url.clone()).timeout(limit);
        if let Some(signer) = &self.signer {
            let headers = signer
                .headers_for(url.path(), version)
                .map_err(|e| AttemptError::Signing(e.to_string()))?;
            request = request.headers(headers);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let max_age = parse_max_age(response.headers());
        let body = response.bytes().await.map_err(transport)?;
        let parsed: SecurityTokenResponse = serde_json::from_slice(&body)?;

        Ok(FetchedApplicationInfo {
            info: parsed.security_token,
            max_age,
        })
    }
}

#[async_trait]
impl ApplicationInfoFetcher for HttpApplicationInfoFetcher {
    async fn fetch(
        &self,
        app_uuid: Uuid,
        version: ProtocolVersion,
    ) -> Result<FetchedApplicationInfo, FetchError> {
        let url = self.token_url(app_uuid, version)?;
        let target = &url;
        let lookup = run_with_retry(url.as_str(), self.retry_policy, |attempt| {
            self.attempt(target, version, attempt)
        });

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| FetchError::TimedOut {
                    url: url.to_string(),
                    timeout: limit,
                })?,
            None => lookup.await,
        }
    }
}

/// Run `attempt` until it succeeds or `policy` is exhausted.
///
/// Attempts are numbered from 1 and follow each other immediately.
pub(crate) async fn run_with_retry<T, F, Fut>(
    url: &str,
    policy: RetryPolicy,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts();
    let mut current = 1;
    loop {
        match attempt(current).await {
            Ok(value) => return Ok(value),
            Err(e) if current < max_attempts => {
                warn!(url, attempt = current, max_attempts, error = %e, "Key service attempt failed, retrying");
                current += 1;
            }
            Err(e) => {
                warn!(url, attempts = current, error = %e, "Key service lookup exhausted");
                return Err(FetchError::Exhausted {
                    url: url.to_owned(),
                    attempts: current,
                    last: e,
                });
            }
        }
    }
}

/// Extract `max-age` from the `Cache-Control` headers.
///
/// Directive names are matched case-insensitively; an absent or unparsable
/// value yields `None`.
#[must_use]
pub fn parse_max_age(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|directive| {
            let (name, secs) = directive.trim().split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            secs.trim().trim_matches('"').parse::<u64>().ok()
        })
        .map(Duration::from_secs)
}
