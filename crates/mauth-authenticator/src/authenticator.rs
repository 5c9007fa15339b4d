//! Request signing and authentication.
//!
//! [`Authenticator`] verifies inbound requests:
//!
//! 1. Detect the protocol version from the authentication header present.
//! 2. Reject versions that are disabled.
//! 3. Decode the authentication and time headers.
//! 4. Look up the signer's public key through the [`KeyCache`].
//! 5. Recompute the canonical hash and check the signature against it.
//!
//! [`sign_request`] is the outbound counterpart. It performs no I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::request::Parts;
use http::{HeaderMap, Method, Request};
use mauth_core::{MAuthConfig, ProtocolVersion};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::cache::KeyCache;
use crate::canonical::canonicalize;
use crate::error::AuthError;
use crate::fetcher::HttpApplicationInfoFetcher;
use crate::header::{decode, detect_version, encode};
use crate::info::{AuthenticationInfo, PrivateKeyAuthenticationInfo};
use crate::signature;

/// What to sign an outbound request with.
///
/// # Examples
///
/// ```
/// use mauth_authenticator::SigningOptions;
/// use mauth_core::ProtocolVersion;
///
/// let options = SigningOptions::builder()
///     .app_uuid(uuid::Uuid::nil())
///     .private_key("/etc/mauth/private_key.pem")
///     .protocol_version(ProtocolVersion::V1)
///     .build();
/// assert_eq!(options.version(), ProtocolVersion::V1);
/// ```
#[derive(Clone, TypedBuilder)]
pub struct SigningOptions {
    /// Identity of the signing application.
    pub app_uuid: Uuid,

    /// PEM text, or a path to a PEM file.
    #[builder(setter(into))]
    pub private_key: String,

    /// Time to sign with. Defaults to now.
    #[builder(default, setter(strip_option))]
    pub signed_time: Option<DateTime<Utc>>,

    /// Version to sign with. Defaults to [`ProtocolVersion::CURRENT`].
    #[builder(default, setter(strip_option))]
    pub protocol_version: Option<ProtocolVersion>,
}

impl fmt::Debug for SigningOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningOptions")
            .field("app_uuid", &self.app_uuid)
            .field("private_key", &"[REDACTED]")
            .field("signed_time", &self.signed_time)
            .field("protocol_version", &self.protocol_version)
            .finish()
    }
}

impl SigningOptions {
    /// Signing options for the application described by `config`.
    #[must_use]
    pub fn from_config(config: &MAuthConfig) -> Self {
        Self {
            app_uuid: config.app_uuid,
            private_key: config.private_key.clone(),
            signed_time: None,
            protocol_version: Some(config.signing_version),
        }
    }

    /// The version these options sign with.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.protocol_version.unwrap_or(ProtocolVersion::CURRENT)
    }

    /// Resolve the signing identity: the signed time (truncated to whole
    /// seconds) and the dereferenced, normalized private key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if a key file cannot be read or the
    /// key has no PEM armour.
    pub fn authentication_info(&self) -> Result<PrivateKeyAuthenticationInfo, AuthError> {
        let private_key = signature::normalize_pem(&signature::dereference_key(&self.private_key)?)?;
        Ok(PrivateKeyAuthenticationInfo {
            auth: AuthenticationInfo::new(self.app_uuid, self.signed_time.unwrap_or_else(Utc::now)),
            private_key,
        })
    }
}

/// Sign `request` and attach the authentication and time headers.
///
/// The canonical form covers the method, the URI path (without query) and the
/// body. Existing headers of the chosen version are replaced.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKey`] if the private key cannot be loaded.
///
/// # Examples
///
/// ```no_run
/// use bytes::Bytes;
/// use mauth_authenticator::{SigningOptions, sign_request};
///
/// let options = SigningOptions::builder()
///     .app_uuid(uuid::Uuid::nil())
///     .private_key("/etc/mauth/private_key.pem")
///     .build();
/// let request = http::Request::get("/resource").body(Bytes::new()).unwrap();
/// let signed = sign_request(request, &options).unwrap();
/// assert!(signed.headers().contains_key("mcc-authentication"));
/// ```
pub fn sign_request(
    request: Request<Bytes>,
    options: &SigningOptions,
) -> Result<Request<Bytes>, AuthError> {
    let version = options.version();
    let signing = options.authentication_info()?;
    let key = signature::parse_private_key(signing.private_key())?;

    let (mut parts, body) = request.into_parts();
    let hash = canonicalize(
        parts.method.as_str(),
        parts.uri.path(),
        &body,
        signing.auth.app_uuid,
        signing.auth.signed_time_secs(),
    );
    let sig = signature::sign(&hash, &key)?;
    encode(&signing.auth, &sig, version).apply(&mut parts.headers)?;

    debug!(
        app_uuid = %signing.auth.app_uuid,
        %version,
        method = %parts.method,
        path = parts.uri.path(),
        "Signed request"
    );
    Ok(Request::from_parts(parts, body))
}

/// Verifies inbound requests and signs outbound ones under a version policy.
#[derive(Debug, Clone)]
pub struct Authenticator {
    cache: Arc<KeyCache>,
    disabled_versions: BTreeSet<ProtocolVersion>,
}

impl Authenticator {
    /// Create an authenticator over `cache`, rejecting `disabled_versions`.
    #[must_use]
    pub fn new(
        cache: Arc<KeyCache>,
        disabled_versions: impl IntoIterator<Item = ProtocolVersion>,
    ) -> Self {
        Self {
            cache,
            disabled_versions: disabled_versions.into_iter().collect(),
        }
    }

    /// Create an authenticator backed by the HTTP key service in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the configured private key, used to
    /// sign key service requests, cannot be loaded.
    pub fn from_config(config: &MAuthConfig) -> Result<Self, AuthError> {
        let fetcher = HttpApplicationInfoFetcher::from_config(config)?;
        let cache = KeyCache::new(Arc::new(fetcher));
        info!(
            app_uuid = %config.app_uuid,
            mauth_base_url = %config.mauth_base_url,
            max_attempts = config.retry_policy.max_attempts(),
            disabled_versions = ?config.disabled_versions,
            "MAuth authenticator configured"
        );
        Ok(Self::new(
            Arc::new(cache),
            config.disabled_versions.iter().copied(),
        ))
    }

    /// The key cache lookups go through.
    #[must_use]
    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    /// Whether `version` is accepted.
    #[must_use]
    pub fn is_enabled(&self, version: ProtocolVersion) -> bool {
        !self.disabled_versions.contains(&version)
    }

    /// Authenticate `request`.
    ///
    /// Returns `Ok(false)` only for a well-formed request whose signature does
    /// not match.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredentials`] / [`AuthError::MalformedCredentials`]
    ///   for absent or unusable headers.
    /// - [`AuthError::UnsupportedVersion`] / [`AuthError::DisabledVersion`] for
    ///   version policy failures.
    /// - [`AuthError::KeyRetrieval`] / [`AuthError::KeyRetrievalTimeout`] if the
    ///   signer's key cannot be obtained.
    /// - [`AuthError::InvalidKey`] if the key service returned an unusable key.
    pub async fn authenticate<B>(&self, request: &Request<B>) -> Result<bool, AuthError>
    where
        B: AsRef<[u8]>,
    {
        self.verify(
            request.method(),
            request.uri().path(),
            request.headers(),
            request.body().as_ref(),
        )
        .await
    }

    /// Authenticate a request already split into parts and collected body.
    ///
    /// # Errors
    ///
    /// As for [`authenticate`](Self::authenticate).
    pub async fn authenticate_parts(&self, parts: &Parts, body: &[u8]) -> Result<bool, AuthError> {
        self.verify(&parts.method, parts.uri.path(), &parts.headers, body)
            .await
    }

    /// Sign `request`, refusing disabled versions.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DisabledVersion`] if the options select a disabled
    /// version, otherwise as for [`sign_request`].
    pub fn sign_request(
        &self,
        request: Request<Bytes>,
        options: &SigningOptions,
    ) -> Result<Request<Bytes>, AuthError> {
        let version = options.version();
        if !self.is_enabled(version) {
            return Err(AuthError::DisabledVersion(version));
        }
        sign_request(request, options)
    }

    async fn verify(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<bool, AuthError> {
        let version = detect_version(headers)?;
        if !self.is_enabled(version) {
            warn!(%version, "Rejected request signed with disabled protocol version");
            return Err(AuthError::DisabledVersion(version));
        }

        let payload = decode(headers, version)?;
        let app_uuid = payload.auth.app_uuid;

        let app = self
            .cache
            .get_application_info(app_uuid, version)
            .await
            .map_err(|e| AuthError::key_retrieval(app_uuid, e))?;
        let public_key = signature::load_public_key(&app.public_key)?;

        let hash = canonicalize(
            method.as_str(),
            path,
            body,
            app_uuid,
            payload.auth.signed_time_secs(),
        );
        let valid = signature::verify(&hash, &payload.signature, &public_key);

        if valid {
            info!(%app_uuid, %version, %method, path, "Request authenticated");
        } else {
            warn!(%app_uuid, %version, %method, path, "Request signature does not match");
        }
        Ok(valid)
    }
}
