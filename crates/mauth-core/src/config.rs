//! MAuth configuration.
//!
//! Provides [`MAuthConfig`], the settings shared by the signing and verifying
//! sides: the local application's identity and key, the key service location,
//! the retry policy for key lookups, and which protocol versions are allowed.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{MAuthError, MAuthResult};
use crate::types::{ProtocolVersion, RetryPolicy};

/// Settings for signing outbound requests and authenticating inbound ones.
///
/// # Examples
///
/// ```
/// use mauth_core::{MAuthConfig, ProtocolVersion};
///
/// let config = MAuthConfig::builder()
///     .app_uuid(uuid::Uuid::nil())
///     .mauth_base_url("https://mauth.example.com")
///     .private_key("/etc/mauth/private_key.pem")
///     .build();
/// assert_eq!(config.signing_version, ProtocolVersion::V2);
/// assert_eq!(config.retry_policy.max_attempts(), 2);
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct MAuthConfig {
    /// Identity of the local application.
    pub app_uuid: Uuid,

    /// Base URL of the key-issuing service.
    #[builder(setter(into))]
    pub mauth_base_url: String,

    /// Private key as PEM text or as a path to a PEM file.
    #[builder(setter(into))]
    #[serde(skip_serializing, default)]
    pub private_key: String,

    /// Attempts made against the key service per lookup.
    #[builder(default)]
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Versions rejected for both signing and authentication.
    #[builder(default)]
    #[serde(default)]
    pub disabled_versions: BTreeSet<ProtocolVersion>,

    /// Version used when signing without an explicit choice.
    #[builder(default = ProtocolVersion::CURRENT)]
    #[serde(default = "default_signing_version")]
    pub signing_version: ProtocolVersion,

    /// Upper bound on a whole key lookup, across all attempts.
    #[builder(default)]
    #[serde(default)]
    pub request_timeout: Option<Duration>,

    /// Upper bound on a single key service request. A request that exceeds it
    /// counts as a failed attempt.
    #[builder(default = MAuthConfig::DEFAULT_ATTEMPT_TIMEOUT)]
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: Duration,
}

fn default_signing_version() -> ProtocolVersion {
    ProtocolVersion::CURRENT
}

fn default_attempt_timeout() -> Duration {
    MAuthConfig::DEFAULT_ATTEMPT_TIMEOUT
}

impl fmt::Debug for MAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MAuthConfig")
            .field("app_uuid", &self.app_uuid)
            .field("mauth_base_url", &self.mauth_base_url)
            .field("private_key", &"[REDACTED]")
            .field("retry_policy", &self.retry_policy)
            .field("disabled_versions", &self.disabled_versions)
            .field("signing_version", &self.signing_version)
            .field("request_timeout", &self.request_timeout)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl MAuthConfig {
    /// Per-request limit used when none is configured.
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MAUTH_APP_UUID` | *(required)* |
    /// | `MAUTH_BASE_URL` | *(required)* |
    /// | `MAUTH_PRIVATE_KEY` | *(required, PEM text or file path)* |
    /// | `MAUTH_RETRY_ATTEMPTS` | `2` |
    /// | `MAUTH_DISABLE_V1` | `false` |
    /// | `MAUTH_DISABLED_VERSIONS` | *(empty, comma-separated)* |
    /// | `MAUTH_SIGNING_VERSION` | `v2` |
    /// | `MAUTH_REQUEST_TIMEOUT_SECS` | *(unset, no overall timeout)* |
    /// | `MAUTH_ATTEMPT_TIMEOUT_SECS` | `5` |
    pub fn from_env() -> MAuthResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// [`from_env`](Self::from_env) is this function over the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> MAuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(MAuthError::MissingConfig(name))
        };

        let app_uuid_raw = required("MAUTH_APP_UUID")?;
        let app_uuid =
            Uuid::parse_str(app_uuid_raw.trim()).map_err(|e| MAuthError::InvalidConfig {
                name: "MAUTH_APP_UUID",
                reason: e.to_string(),
            })?;

        let mut config = Self::builder()
            .app_uuid(app_uuid)
            .mauth_base_url(required("MAUTH_BASE_URL")?.trim())
            .private_key(required("MAUTH_PRIVATE_KEY")?)
            .build();

        if let Some(v) = lookup("MAUTH_RETRY_ATTEMPTS") {
            let attempts = v.trim().parse::<u32>().map_err(|e| MAuthError::InvalidConfig {
                name: "MAUTH_RETRY_ATTEMPTS",
                reason: e.to_string(),
            })?;
            config.retry_policy = RetryPolicy::from_attempts(attempts)?;
        }
        if let Some(v) = lookup("MAUTH_DISABLED_VERSIONS") {
            for name in v.split(',').filter(|s| !s.trim().is_empty()) {
                config.disabled_versions.insert(name.parse()?);
            }
        }
        if lookup("MAUTH_DISABLE_V1").is_some_and(|v| parse_bool(&v)) {
            config.disabled_versions.insert(ProtocolVersion::V1);
        }
        if let Some(v) = lookup("MAUTH_SIGNING_VERSION") {
            config.signing_version = v.parse()?;
        }
        if let Some(v) = lookup("MAUTH_REQUEST_TIMEOUT_SECS") {
            let secs = v.trim().parse::<u64>().map_err(|e| MAuthError::InvalidConfig {
                name: "MAUTH_REQUEST_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(v) = lookup("MAUTH_ATTEMPT_TIMEOUT_SECS") {
            let secs = v.trim().parse::<u64>().map_err(|e| MAuthError::InvalidConfig {
                name: "MAUTH_ATTEMPT_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
            if secs == 0 {
                return Err(MAuthError::InvalidConfig {
                    name: "MAUTH_ATTEMPT_TIMEOUT_SECS",
                    reason: "must be at least 1".to_owned(),
                });
            }
            config.attempt_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Whether `version` may be used for signing or authentication.
    #[must_use]
    pub fn is_enabled(&self, version: ProtocolVersion) -> bool {
        !self.disabled_versions.contains(&version)
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}
