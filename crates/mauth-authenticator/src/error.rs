//! Error types for MAuth signing and authentication.
//!
//! Every failure of [`Authenticator`](crate::Authenticator) is normalized into
//! an [`AuthError`]. Transport and cryptography library errors only ever
//! appear as opaque sources.

use std::sync::Arc;

use mauth_core::{MAuthError, ProtocolVersion};
use uuid::Uuid;

use crate::fetcher::FetchError;

/// Errors that can occur while signing or authenticating a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No authentication header for any supported version is present.
    #[error("Missing MAuth authentication header: {0}")]
    MissingCredentials(String),

    /// An authentication or time header is present but unusable.
    #[error("Malformed MAuth credentials: {0}")]
    MalformedCredentials(String),

    /// The scheme token is not recognized by any protocol version.
    #[error("Unsupported MAuth protocol version: {0}")]
    UnsupportedVersion(String),

    /// The protocol version is recognized but administratively disabled.
    #[error("Authentication with {0} is disabled")]
    DisabledVersion(ProtocolVersion),

    /// Every configured attempt to fetch the application's key failed.
    #[error("Could not retrieve application info for {app_uuid} from the key service")]
    KeyRetrieval {
        /// The application whose key was requested.
        app_uuid: Uuid,
        /// The exhausted fetch.
        #[source]
        source: Arc<FetchError>,
    },

    /// The key lookup did not finish within the configured timeout.
    #[error("Timed out retrieving application info for {app_uuid}")]
    KeyRetrievalTimeout {
        /// The application whose key was requested.
        app_uuid: Uuid,
        /// The timed-out fetch.
        #[source]
        source: Arc<FetchError>,
    },

    /// Key material could not be loaded.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Any other failure. The original cause is kept for diagnostics.
    #[error("Unexpected authentication failure")]
    Unexpected(#[source] anyhow::Error),
}

impl AuthError {
    /// Whether the failure concerns the protocol version rather than the
    /// credentials themselves. Collaborators may answer these differently
    /// (for example with an "upgrade required" response).
    #[must_use]
    pub fn is_version_error(&self) -> bool {
        matches!(self, Self::UnsupportedVersion(_) | Self::DisabledVersion(_))
    }

    pub(crate) fn key_retrieval(app_uuid: Uuid, source: Arc<FetchError>) -> Self {
        if matches!(*source, FetchError::TimedOut { .. }) {
            Self::KeyRetrievalTimeout { app_uuid, source }
        } else if matches!(
            *source,
            FetchError::InvalidUrl { .. } | FetchError::Interrupted { .. }
        ) {
            Self::Unexpected(anyhow::Error::new(source))
        } else {
            Self::KeyRetrieval { app_uuid, source }
        }
    }
}

impl From<MAuthError> for AuthError {
    fn from(err: MAuthError) -> Self {
        match err {
            MAuthError::UnsupportedVersion(token) => Self::UnsupportedVersion(token),
            other => Self::Unexpected(other.into()),
        }
    }
}
