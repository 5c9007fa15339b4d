//! Core types and configuration for MAuth request authentication.
//!
//! This crate provides the building blocks shared by the signing and
//! verifying sides of the protocol: the closed set of protocol versions with
//! their wire constants, the retry policy applied to key-service lookups, and
//! the environment-driven [`MAuthConfig`].

mod config;
mod error;
mod types;

pub use config::MAuthConfig;
pub use error::{MAuthError, MAuthResult};
pub use types::{ProtocolVersion, RetryPolicy, VersionProfile};
