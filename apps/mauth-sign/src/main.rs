//! mauth-sign - sign requests and inspect keys from the command line.
//!
//! # Usage
//!
//! ```text
//! mauth-sign sign GET /resource
//! mauth-sign sign POST /orders '{"qty":1}'
//! mauth-sign lookup 11111111-1111-1111-1111-111111111111 [v1|v2]
//! ```
//!
//! `sign` prints the authentication headers for the request, one
//! `name: value` per line. `lookup` fetches an application's public key from
//! the key service.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MAUTH_APP_UUID` | *(required)* | Local application uuid |
//! | `MAUTH_BASE_URL` | *(required)* | Key service base URL |
//! | `MAUTH_PRIVATE_KEY` | *(required)* | PEM text or path to a PEM file |
//! | `MAUTH_RETRY_ATTEMPTS` | `2` | Key service attempts per lookup |
//! | `MAUTH_SIGNING_VERSION` | `v2` | Protocol version used by `sign` |
//! | `MAUTH_REQUEST_TIMEOUT_SECS` | *(unset)* | Overall lookup timeout |
//! | `MAUTH_ATTEMPT_TIMEOUT_SECS` | `5` | Timeout of each key service request |
//! | `LOG_LEVEL` | `warn` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use http::{Method, Request};
use mauth_authenticator::{HttpApplicationInfoFetcher, KeyCache, SigningOptions, sign_request};
use mauth_core::{MAuthConfig, ProtocolVersion};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str = "usage: mauth-sign sign <METHOD> <PATH> [BODY]\n       mauth-sign lookup <APP_UUID> [v1|v2]";

/// Initialize the tracing subscriber on stderr.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `LOG_LEVEL`.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Sign {
        method: Method,
        path: String,
        body: Bytes,
    },
    Lookup {
        app_uuid: Uuid,
        version: ProtocolVersion,
    },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        match args {
            [cmd, method, path, rest @ ..] if cmd == "sign" && rest.len() <= 1 => {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid method: {method}"))?;
                if !path.starts_with('/') {
                    bail!("path must be absolute: {path}");
                }
                Ok(Self::Sign {
                    method,
                    path: path.clone(),
                    body: rest
                        .first()
                        .map(|b| Bytes::from(b.clone()))
                        .unwrap_or_default(),
                })
            }
            [cmd, app_uuid, rest @ ..] if cmd == "lookup" && rest.len() <= 1 => Ok(Self::Lookup {
                app_uuid: app_uuid
                    .parse()
                    .with_context(|| format!("invalid application uuid: {app_uuid}"))?,
                version: rest
                    .first()
                    .map(|v| v.parse::<ProtocolVersion>())
                    .transpose()?
                    .unwrap_or(ProtocolVersion::CURRENT),
            }),
            _ => bail!(USAGE),
        }
    }
}

fn run_sign(config: &MAuthConfig, method: Method, path: &str, body: Bytes) -> Result<()> {
    let request = Request::builder().method(method).uri(path).body(body)?;
    let signed = sign_request(request, &SigningOptions::from_config(config))?;

    let profile = config.signing_version.profile();
    for name in [profile.auth_header, profile.time_header] {
        if let Some(value) = signed.headers().get(name) {
            println!("{name}: {}", value.to_str()?);
        }
    }
    Ok(())
}

async fn run_lookup(config: &MAuthConfig, app_uuid: Uuid, version: ProtocolVersion) -> Result<()> {
    let fetcher = HttpApplicationInfoFetcher::from_config(config)?;
    let cache = KeyCache::new(Arc::new(fetcher));
    let app = cache
        .get_application_info(app_uuid, version)
        .await
        .map_err(anyhow::Error::new)
        .with_context(|| format!("key lookup for {app_uuid} failed"))?;

    println!("app_uuid: {}", app.app_uuid);
    if let Some(name) = &app.app_name {
        println!("app_name: {name}");
    }
    print!("{}", app.public_key);
    if !app.public_key.ends_with('\n') {
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".to_owned());
    init_tracing(&log_level)?;

    let command = Command::parse(&args)?;
    let config = MAuthConfig::from_env().context("cannot load MAuth configuration")?;
    info!(app_uuid = %config.app_uuid, ?command, "running mauth-sign");

    match command {
        Command::Sign { method, path, body } => run_sign(&config, method, &path, body),
        Command::Lookup { app_uuid, version } => run_lookup(&config, app_uuid, version).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_should_parse_sign_command() {
        let cmd = Command::parse(&args(&["sign", "post", "/orders", "{}"])).unwrap();
        assert_eq!(
            cmd,
            Command::Sign {
                method: Method::POST,
                path: "/orders".to_owned(),
                body: Bytes::from_static(b"{}"),
            }
        );
    }

    #[test]
    fn test_should_default_sign_body_to_empty() {
        let cmd = Command::parse(&args(&["sign", "GET", "/resource"])).unwrap();
        assert!(matches!(cmd, Command::Sign { body, .. } if body.is_empty()));
    }

    #[test]
    fn test_should_parse_lookup_command() {
        let cmd = Command::parse(&args(&[
            "lookup",
            "11111111-1111-1111-1111-111111111111",
            "v1",
        ]))
        .unwrap();
        assert!(matches!(
            cmd,
            Command::Lookup { version: ProtocolVersion::V1, .. }
        ));
    }

    #[test]
    fn test_should_reject_bad_arguments() {
        assert!(Command::parse(&args(&[])).is_err());
        assert!(Command::parse(&args(&["sign", "GET"])).is_err());
        assert!(Command::parse(&args(&["sign", "GET", "relative"])).is_err());
        assert!(Command::parse(&args(&["lookup", "nope"])).is_err());
        assert!(Command::parse(&args(&["lookup", "11111111-1111-1111-1111-111111111111", "v9"])).is_err());
    }
}
