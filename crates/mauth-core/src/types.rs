//! Protocol version table and retry policy.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use crate::error::MAuthError;

/// Wire constants that distinguish one protocol generation from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionProfile {
    /// Leading word of the authentication header value.
    pub scheme: &'static str,
    /// Name of the header carrying `<scheme> <uuid>:<signature>`.
    pub auth_header: &'static str,
    /// Name of the header carrying the signed Unix time.
    pub time_header: &'static str,
    /// Path prefix on the key service for public key lookups.
    pub token_request_path: &'static str,
}

const V1_PROFILE: VersionProfile = VersionProfile {
    scheme: "MWS",
    auth_header: "x-mws-authentication",
    time_header: "x-mws-time",
    token_request_path: "/mauth/v1/security_tokens/",
};

const V2_PROFILE: VersionProfile = VersionProfile {
    scheme: "MWSV2",
    auth_header: "mcc-authentication",
    time_header: "mcc-time",
    token_request_path: "/mauth/v2/security_tokens/",
};

/// A supported MAuth protocol generation.
///
/// # Examples
///
/// ```
/// use mauth_core::ProtocolVersion;
///
/// let version = ProtocolVersion::from_scheme("MWSV2").unwrap();
/// assert_eq!(version, ProtocolVersion::V2);
/// assert_eq!(version.profile().time_header, "mcc-time");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Legacy protocol (`MWS`).
    V1,
    /// Current protocol (`MWSV2`).
    V2,
}

impl ProtocolVersion {
    /// The version used for signing when the caller does not choose one.
    pub const CURRENT: Self = Self::V2;

    /// All versions, newest first. Header detection probes in this order.
    pub const ALL: [Self; 2] = [Self::V2, Self::V1];

    /// The wire constants of this version.
    #[must_use]
    pub const fn profile(self) -> &'static VersionProfile {
        match self {
            Self::V1 => &V1_PROFILE,
            Self::V2 => &V2_PROFILE,
        }
    }

    /// Resolve a version from the scheme token of an authentication header.
    ///
    /// The match is exact: scheme tokens are case-sensitive on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`MAuthError::UnsupportedVersion`] for any other token.
    pub fn from_scheme(token: &str) -> Result<Self, MAuthError> {
        Self::ALL
            .into_iter()
            .find(|version| version.profile().scheme == token)
            .ok_or_else(|| MAuthError::UnsupportedVersion(token.to_owned()))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().scheme)
    }
}

/// Parses configuration spellings: `v1`, `v2`, `MWS`, `MWSV2`, case-insensitive.
impl FromStr for ProtocolVersion {
    type Err = MAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("v1") || trimmed.eq_ignore_ascii_case("mws") {
            Ok(Self::V1)
        } else if trimmed.eq_ignore_ascii_case("v2") || trimmed.eq_ignore_ascii_case("mwsv2") {
            Ok(Self::V2)
        } else {
            Err(MAuthError::UnsupportedVersion(trimmed.to_owned()))
        }
    }
}

/// How many times a key-service lookup is attempted before giving up.
///
/// The value counts attempts, not retries: `max_attempts = 1` means a single
/// request with no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
}

impl RetryPolicy {
    /// One request followed by one retry.
    pub const DEFAULT_ATTEMPTS: u32 = 2;

    /// Create a policy with the given attempt count.
    #[must_use]
    pub const fn new(max_attempts: NonZeroU32) -> Self {
        Self { max_attempts }
    }

    /// Create a policy from a raw count.
    ///
    /// # Errors
    ///
    /// Returns [`MAuthError::InvalidConfig`] when `max_attempts` is zero.
    pub fn from_attempts(max_attempts: u32) -> Result<Self, MAuthError> {
        NonZeroU32::new(max_attempts)
            .map(Self::new)
            .ok_or_else(|| MAuthError::InvalidConfig {
                name: "max_attempts",
                reason: "must be at least 1".to_owned(),
            })
    }

    /// Total number of attempts, including the first one.
    #[must_use]
    pub const fn max_attempts(self) -> u32 {
        self.max_attempts.get()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN.saturating_add(Self::DEFAULT_ATTEMPTS - 1),
        }
    }
}
