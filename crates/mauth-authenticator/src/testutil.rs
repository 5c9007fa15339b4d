//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mauth_core::ProtocolVersion;
use uuid::Uuid;

use crate::cache::Clock;
use crate::canonical::canonicalize;
use crate::fetcher::{ApplicationInfoFetcher, AttemptError, FetchError, FetchedApplicationInfo};
use crate::info::ApplicationInfo;

pub const APP_UUID: Uuid = Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111);
pub const SIGNED_AT: i64 = 1_700_000_000;

pub const APP_PRIVATE_KEY: &str = include_str!("../tests/fixtures/app_private_key.pem");
pub const APP_PRIVATE_KEY_PKCS8: &str = include_str!("../tests/fixtures/app_private_key_pkcs8.pem");
pub const APP_PUBLIC_KEY: &str = include_str!("../tests/fixtures/app_public_key.pem");
pub const OTHER_PRIVATE_KEY: &str = include_str!("../tests/fixtures/other_private_key.pem");
pub const OTHER_PUBLIC_KEY: &str = include_str!("../tests/fixtures/other_public_key.pem");
pub const SCENARIO_SIGNATURE: &str = include_str!("../tests/fixtures/scenario_signature.b64");

pub fn scenario_hash() -> Vec<u8> {
    canonicalize("GET", "/resource", b"", APP_UUID, SIGNED_AT)
}

pub fn signed_at() -> DateTime<Utc> {
    Utc.timestamp_opt(SIGNED_AT, 0).unwrap()
}

pub fn app_info() -> ApplicationInfo {
    ApplicationInfo {
        app_uuid: APP_UUID,
        public_key: APP_PUBLIC_KEY.to_owned(),
        app_name: Some("scenario".to_owned()),
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A fetcher that replays scripted outcomes and counts calls.
///
/// Once the script is exhausted every further call returns the last
/// scripted outcome again.
#[derive(Debug)]
pub struct ScriptedFetcher {
    outcomes: Mutex<VecDeque<Outcome>>,
    last: Mutex<Option<Outcome>>,
    calls: AtomicUsize,
    delay: Duration,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Found(Option<Duration>),
    NotFound,
}

impl ScriptedFetcher {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn always(outcome: Outcome) -> Self {
        Self::new([outcome])
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApplicationInfoFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        app_uuid: Uuid,
        _version: ProtocolVersion,
    ) -> Result<FetchedApplicationInfo, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = {
            let mut script = self.outcomes.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = script.pop_front() {
                *last = Some(next);
            }
            last.clone().unwrap_or(Outcome::NotFound)
        };

        match outcome {
            Outcome::Found(max_age) => Ok(FetchedApplicationInfo {
                info: ApplicationInfo {
                    app_uuid,
                    ..app_info()
                },
                max_age,
            }),
            Outcome::NotFound => Err(FetchError::Exhausted {
                url: format!("http://mauth.test/{app_uuid}.json"),
                attempts: 1,
                last: AttemptError::Status(http::StatusCode::NOT_FOUND),
            }),
        }
    }
}
