//! Value types carried through signing and authentication.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// Who signed a request and when.
///
/// The signed time only ever carries whole seconds; any sub-second part is
/// discarded on construction so the value matches what the time header can
/// express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationInfo {
    /// The signing application.
    pub app_uuid: Uuid,
    signed_time: DateTime<Utc>,
}

impl AuthenticationInfo {
    /// Create an info value, truncating `signed_time` to whole seconds.
    #[must_use]
    pub fn new(app_uuid: Uuid, signed_time: DateTime<Utc>) -> Self {
        Self {
            app_uuid,
            signed_time: signed_time.trunc_subsecs(0),
        }
    }

    /// The signed time, at whole-second precision.
    #[must_use]
    pub fn signed_time(&self) -> DateTime<Utc> {
        self.signed_time
    }

    /// The signed time as Unix seconds.
    #[must_use]
    pub fn signed_time_secs(&self) -> i64 {
        self.signed_time.timestamp()
    }
}

/// Authentication info decoded from an inbound request, with its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadAuthenticationInfo {
    /// Signer and signed time.
    pub auth: AuthenticationInfo,
    /// Raw signature bytes (base64-decoded from the header).
    pub signature: Vec<u8>,
}

/// Authentication info used to sign an outbound request.
///
/// Holds the normalized PEM private key. The key is never printed.
#[derive(Clone)]
pub struct PrivateKeyAuthenticationInfo {
    /// Signer and signed time.
    pub auth: AuthenticationInfo,
    pub(crate) private_key: String,
}

impl PrivateKeyAuthenticationInfo {
    /// The normalized PEM private key.
    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for PrivateKeyAuthenticationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyAuthenticationInfo")
            .field("auth", &self.auth)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// An application's registration as returned by the key service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplicationInfo {
    /// The registered application.
    pub app_uuid: Uuid,
    /// PEM-encoded RSA public key.
    #[serde(rename = "public_key_str")]
    pub public_key: String,
    /// Human-readable name, when the service provides one.
    #[serde(default)]
    pub app_name: Option<String>,
}

/// Response envelope of the key service.
#[derive(Debug, Deserialize)]
pub(crate) struct SecurityTokenResponse {
    pub security_token: ApplicationInfo,
}
