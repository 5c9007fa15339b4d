//! MAuth request signing and authentication.
//!
//! MAuth authenticates HTTP requests between applications. The sender signs a
//! canonical hash of the request (method, path, body, its application uuid and
//! the signing time) with its RSA private key and sends the signature in a
//! version-specific header pair. The receiver recomputes the hash and checks
//! it against the signature using the sender's public key, which it obtains
//! from a central key service and caches.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use mauth_authenticator::{Authenticator, SigningOptions, sign_request};
//! use mauth_core::MAuthConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MAuthConfig::from_env()?;
//!
//! // Outbound: attach MAuth headers.
//! let request = http::Request::get("/resource").body(Bytes::new())?;
//! let signed = sign_request(request, &SigningOptions::from_config(&config))?;
//!
//! // Inbound: verify them.
//! let authenticator = Authenticator::from_config(&config)?;
//! let valid = authenticator.authenticate(&signed).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - Canonical request hashing
//! - [`signature`] - RSA signature primitive and key loading
//! - [`header`] - Authentication and time header codec
//! - [`fetcher`] - Key service client with retries
//! - [`cache`] - Application key cache
//! - [`authenticator`] - Verification and signing entry points

pub mod authenticator;
pub mod cache;
pub mod canonical;
pub mod error;
pub mod fetcher;
pub mod header;
pub mod info;
pub mod signature;

#[cfg(test)]
mod testutil;

pub use authenticator::{Authenticator, SigningOptions, sign_request};
pub use cache::{Clock, KeyCache, SystemClock};
pub use error::AuthError;
pub use fetcher::{
    ApplicationInfoFetcher, AttemptError, FetchError, FetchedApplicationInfo,
    HttpApplicationInfoFetcher,
};
pub use info::{
    ApplicationInfo, AuthenticationInfo, PayloadAuthenticationInfo, PrivateKeyAuthenticationInfo,
};
