//! Application key cache with single-flight lookups.
//!
//! Entries live until the `max-age` the key service attached to them (one
//! hour when it sent none) and are evicted lazily when a lookup finds them
//! stale. Concurrent misses for the same application share one fetch: the
//! first caller starts it, later callers await the same shared future, and
//! every caller receives the identical `Arc` (or the identical failure).
//! Failures are never cached.
//!
//! Each fetch runs on its own task, so it completes and releases its
//! in-flight slot even when every waiter has gone away.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use mauth_core::ProtocolVersion;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fetcher::{ApplicationInfoFetcher, FetchError};
use crate::info::ApplicationInfo;

/// Lifetime of an entry whose response carried no `max-age`.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] reading the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

type LookupResult = Result<Arc<ApplicationInfo>, Arc<FetchError>>;
type InFlight = Shared<BoxFuture<'static, LookupResult>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    info: Arc<ApplicationInfo>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Cache of application info keyed by application uuid.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct KeyCache {
    fetcher: Arc<dyn ApplicationInfoFetcher>,
    clock: Arc<dyn Clock>,
    entries: Arc<DashMap<Uuid, CacheEntry>>,
    in_flight: Arc<DashMap<Uuid, InFlight>>,
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    /// Create a cache over `fetcher` using the system clock.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ApplicationInfoFetcher>) -> Self {
        Self::with_clock(fetcher, Arc::new(SystemClock))
    }

    /// Create a cache over `fetcher` with an explicit clock.
    #[must_use]
    pub fn with_clock(fetcher: Arc<dyn ApplicationInfoFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Look up `app_uuid`, fetching through `version`'s path on a miss.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure, shared among all callers that waited on the
    /// same fetch.
    pub async fn get_application_info(
        &self,
        app_uuid: Uuid,
        version: ProtocolVersion,
    ) -> Result<Arc<ApplicationInfo>, Arc<FetchError>> {
        if let Some(info) = self.fresh(app_uuid) {
            debug!(%app_uuid, "Key cache hit");
            return Ok(info);
        }

        let lookup = match self.in_flight.entry(app_uuid) {
            Entry::Occupied(occupied) => {
                debug!(%app_uuid, "Joining in-flight key lookup");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                // A lookup may have completed between the first check and
                // taking the in-flight slot.
                if let Some(info) = self.fresh(app_uuid) {
                    return Ok(info);
                }
                info!(%app_uuid, %version, "Key cache miss, fetching application info");
                let lookup = self.start_lookup(app_uuid, version);
                vacant.insert(lookup.clone());
                lookup
            }
        };

        lookup.await
    }

    /// Number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every stored entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn fresh(&self, app_uuid: Uuid) -> Option<Arc<ApplicationInfo>> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(&app_uuid) {
            if entry.is_fresh(now) {
                return Some(Arc::clone(&entry.info));
            }
        }
        if self
            .entries
            .remove_if(&app_uuid, |_, entry| !entry.is_fresh(now))
            .is_some()
        {
            debug!(%app_uuid, "Evicted expired key cache entry");
        }
        None
    }

    /// Spawn the fetch for `app_uuid`.
    ///
    /// Must be called while the caller holds `app_uuid`'s vacant in-flight
    /// entry, so the task cannot release the slot before it is filled.
    fn start_lookup(&self, app_uuid: Uuid, version: ProtocolVersion) -> InFlight {
        let fetcher = Arc::clone(&self.fetcher);
        let clock = Arc::clone(&self.clock);
        let entries = Arc::clone(&self.entries);
        let slot = InFlightSlot {
            in_flight: Arc::clone(&self.in_flight),
            app_uuid,
        };

        let task = tokio::spawn(async move {
            let result = fetcher.fetch(app_uuid, version).await;
            let outcome = match result {
                Ok(fetched) => {
                    let ttl = fetched.max_age.unwrap_or(DEFAULT_TTL);
                    let expires_at = chrono::Duration::from_std(ttl)
                        .ok()
                        .and_then(|ttl| clock.now().checked_add_signed(ttl))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    let info = Arc::new(fetched.info);
                    entries.insert(
                        app_uuid,
                        CacheEntry {
                            info: Arc::clone(&info),
                            expires_at,
                        },
                    );
                    debug!(%app_uuid, ttl_secs = ttl.as_secs(), "Cached application info");
                    Ok(info)
                }
                Err(e) => {
                    warn!(%app_uuid, error = %e, "Application info lookup failed");
                    Err(Arc::new(e))
                }
            };
            drop(slot);
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                warn!(%app_uuid, error = %e, "Application info lookup task ended abnormally");
                Err(Arc::new(FetchError::Interrupted {
                    reason: e.to_string(),
                }))
            })
        }
        .boxed()
        .shared()
    }
}

/// Releases an application's in-flight slot when its lookup task ends,
/// including by panic.
struct InFlightSlot {
    in_flight: Arc<DashMap<Uuid, InFlight>>,
    app_uuid: Uuid,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.in_flight.remove(&self.app_uuid);
    }
}
