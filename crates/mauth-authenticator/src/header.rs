//! Authentication and time header encoding.
//!
//! Every protocol version carries two headers:
//!
//! ```text
//! <auth header>: <scheme> <app uuid>:<base64 signature>
//! <time header>: <unix seconds>
//! ```
//!
//! Header names and the scheme token come from the version's
//! [`VersionProfile`](mauth_core::VersionProfile).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{TimeZone, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use mauth_core::ProtocolVersion;
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::info::{AuthenticationInfo, PayloadAuthenticationInfo};

/// Header values produced by [`encode`], ready to attach to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationHeaders {
    /// Version whose header names the values belong under.
    pub version: ProtocolVersion,
    /// `<scheme> <uuid>:<base64 signature>`.
    pub auth_value: String,
    /// Signed time in decimal Unix seconds.
    pub time_value: String,
}

impl AuthenticationHeaders {
    /// Insert both headers into `headers`, replacing existing values.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unexpected`] if a value is not a legal header
    /// value.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), AuthError> {
        let profile = self.version.profile();
        headers.insert(
            HeaderName::from_static(profile.auth_header),
            to_header_value(&self.auth_value)?,
        );
        headers.insert(
            HeaderName::from_static(profile.time_header),
            to_header_value(&self.time_value)?,
        );
        Ok(())
    }
}

fn to_header_value(value: &str) -> Result<HeaderValue, AuthError> {
    HeaderValue::from_str(value).map_err(|e| AuthError::Unexpected(e.into()))
}

/// Encode signing output into header values for `version`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use mauth_authenticator::AuthenticationInfo;
/// use mauth_authenticator::header::encode;
/// use mauth_core::ProtocolVersion;
///
/// let info = AuthenticationInfo::new(uuid::Uuid::nil(), Utc.timestamp_opt(1_700_000_000, 0).unwrap());
/// let headers = encode(&info, b"sig", ProtocolVersion::V1);
/// assert_eq!(headers.auth_value, "MWS 00000000-0000-0000-0000-000000000000:c2ln");
/// assert_eq!(headers.time_value, "1700000000");
/// ```
#[must_use]
pub fn encode(
    info: &AuthenticationInfo,
    signature: &[u8],
    version: ProtocolVersion,
) -> AuthenticationHeaders {
    let profile = version.profile();
    AuthenticationHeaders {
        version,
        auth_value: format!(
            "{} {}:{}",
            profile.scheme,
            info.app_uuid.hyphenated(),
            STANDARD.encode(signature)
        ),
        time_value: info.signed_time_secs().to_string(),
    }
}

/// Determine the protocol version an inbound request was signed with.
///
/// Authentication headers are probed newest version first; the first one
/// present decides. Its scheme token must name a known version, and that
/// version must own the header it was found in.
///
/// # Errors
///
/// - [`AuthError::MissingCredentials`] if no authentication header is present.
/// - [`AuthError::UnsupportedVersion`] if the scheme token is unknown.
/// - [`AuthError::MalformedCredentials`] if the header is not ASCII or its
///   scheme belongs to another version.
pub fn detect_version(headers: &HeaderMap) -> Result<ProtocolVersion, AuthError> {
    for candidate in ProtocolVersion::ALL {
        let name = candidate.profile().auth_header;
        let Some(value) = headers.get(name) else {
            continue;
        };

        let value = header_str(value, name)?;
        let scheme = value.trim_start().split(' ').next().unwrap_or_default();
        let version = ProtocolVersion::from_scheme(scheme)?;
        if version != candidate {
            return Err(AuthError::MalformedCredentials(format!(
                "scheme {scheme} is not valid in the {name} header"
            )));
        }

        debug!(%version, header = name, "Detected MAuth protocol version");
        return Ok(version);
    }

    let expected: Vec<&str> = ProtocolVersion::ALL
        .iter()
        .map(|v| v.profile().auth_header)
        .collect();
    Err(AuthError::MissingCredentials(expected.join(" or ")))
}

/// Decode the authentication and time headers of `version`.
///
/// A single trailing `;` after the signature is tolerated.
///
/// # Errors
///
/// - [`AuthError::MissingCredentials`] if the authentication header is absent.
/// - [`AuthError::MalformedCredentials`] if the time header is absent,
///   non-numeric or not positive, or if the authentication header has the
///   wrong scheme, an invalid uuid, or an empty or non-base64 signature.
pub fn decode(
    headers: &HeaderMap,
    version: ProtocolVersion,
) -> Result<PayloadAuthenticationInfo, AuthError> {
    let profile = version.profile();

    let raw = headers
        .get(profile.auth_header)
        .ok_or_else(|| AuthError::MissingCredentials(profile.auth_header.to_owned()))?;
    let raw = header_str(raw, profile.auth_header)?.trim();

    let (scheme, credentials) = raw
        .split_once(' ')
        .ok_or_else(|| malformed("authentication header has no credentials"))?;
    if scheme != profile.scheme {
        return Err(malformed(format!(
            "expected scheme {}, found {scheme}",
            profile.scheme
        )));
    }

    let (uuid, payload) = credentials
        .split_once(':')
        .ok_or_else(|| malformed("credentials are not of the form <uuid>:<signature>"))?;
    let app_uuid = Uuid::parse_str(uuid.trim())
        .map_err(|e| malformed(format!("invalid application uuid: {e}")))?;

    let payload = payload.trim();
    let payload = payload.strip_suffix(';').unwrap_or(payload);
    if payload.is_empty() {
        return Err(malformed("signature is empty"));
    }
    let signature = STANDARD
        .decode(payload)
        .map_err(|e| malformed(format!("signature is not valid base64: {e}")))?;
    if signature.is_empty() {
        return Err(malformed("signature is empty"));
    }

    let signed_time = decode_time(headers, profile.time_header)?;

    Ok(PayloadAuthenticationInfo {
        auth: AuthenticationInfo::new(app_uuid, signed_time),
        signature,
    })
}

fn decode_time(headers: &HeaderMap, name: &str) -> Result<chrono::DateTime<Utc>, AuthError> {
    let raw = headers
        .get(name)
        .ok_or_else(|| malformed(format!("missing {name} header")))?;
    let secs: i64 = header_str(raw, name)?
        .trim()
        .parse()
        .map_err(|_| malformed(format!("{name} is not a number")))?;
    if secs <= 0 {
        return Err(malformed(format!("{name} must be positive")));
    }
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| malformed(format!("{name} is out of range")))
}

fn header_str<'a>(value: &'a HeaderValue, name: &str) -> Result<&'a str, AuthError> {
    value
        .to_str()
        .map_err(|_| malformed(format!("{name} is not valid ASCII")))
}

fn malformed(reason: impl Into<String>) -> AuthError {
    AuthError::MalformedCredentials(reason.into())
}
