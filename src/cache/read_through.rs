//! Read-Through Protocol
//!
//! Shared cache-or-lock-or-compute resolution used by the day cache and the
//! period aggregator. Each key moves through an explicit state machine:
//!
//! ```text
//!            miss                  acquired
//!  observe ───────▶ Unlocked ───────────────▶ Owned ──compute+store──▶ done
//!     │                │  busy                  │
//!     │ hit            ▼                        │ populated meanwhile
//!     ▼             Locked ──release/expiry──▶ observe
//!  Populated ◀──────────────────────────────────┘
//! ```
//!
//! Writes happen only in `Owned`. A failed or timed-out computation releases
//! the lock without writing, so the next caller retries from scratch.
//!
//! An optional admission limit caps how many computations run at once. The
//! permit is taken before the lock, so queueing for it never eats into a
//! lease, and it is dropped again if the lock turns out to be busy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::lock::{Acquisition, DistributedLock};
use crate::domain::{KeyValueStore, LockBackend, LockToken};
use crate::error::{Error, Result};
use crate::metrics::{CacheKind, ServiceMetrics};

// =============================================================================
// Configuration
// =============================================================================

/// Lock and timing parameters for one read-through cache
#[derive(Debug, Clone)]
pub struct ReadThroughConfig {
    /// Lease taken while computing a missing entry
    pub lease: Duration,

    /// Upper bound on a single computation; must stay below `lease`
    pub compute_timeout: Duration,

    /// Maximum lock acquisition attempts per lookup
    pub max_attempts: u32,

    /// Delay before re-acquiring after a lost race, multiplied by the
    /// attempts made so far
    pub backoff: Duration,
}

impl Default for ReadThroughConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            compute_timeout: Duration::from_secs(45),
            max_attempts: 5,
            backoff: Duration::from_millis(100),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// How a value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Read from the store, possibly after waiting for another holder
    Cached,
    /// Computed by this caller and written to the store
    Computed,
}

#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub resolution: Resolution,
}

/// Observed state of one key
enum KeyState<T> {
    Populated(T),
    Unlocked,
    Locked,
    Owned(LockToken, Option<OwnedSemaphorePermit>),
}

// =============================================================================
// Read-Through Cache
// =============================================================================

/// Keyed JSON store guarded by a distributed lock.
pub struct ReadThrough {
    kind: CacheKind,
    config: ReadThroughConfig,
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    admission: Option<Arc<Semaphore>>,
    metrics: ServiceMetrics,
}

impl ReadThrough {
    pub fn new(
        kind: CacheKind,
        config: ReadThroughConfig,
        store: Arc<dyn KeyValueStore>,
        locks: Arc<dyn LockBackend>,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            kind,
            config,
            store,
            lock: DistributedLock::new(locks),
            admission: None,
            metrics,
        }
    }

    /// Allow at most `limit` computations of this cache in flight.
    pub fn with_admission_limit(mut self, limit: usize) -> Self {
        self.admission = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    pub fn config(&self) -> &ReadThroughConfig {
        &self.config
    }

    /// Return the stored value for `store_key`, computing it under
    /// `lock_key` on a miss.
    pub async fn resolve<T, F, Fut>(
        &self,
        store_key: &str,
        lock_key: &str,
        compute: F,
    ) -> Result<Resolved<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = self.observe(store_key).await?;
        match &state {
            KeyState::Populated(_) => {
                debug!("{} cache hit for {}", self.kind, store_key);
                self.metrics.record_lookup(self.kind, true);
            }
            _ => {
                info!("{} cache miss for {}", self.kind, store_key);
                self.metrics.record_lookup(self.kind, false);
            }
        }

        let mut attempts = 0u32;
        loop {
            state = match state {
                KeyState::Populated(value) => {
                    return Ok(Resolved {
                        value,
                        resolution: Resolution::Cached,
                    });
                }
                KeyState::Unlocked => {
                    if attempts >= self.config.max_attempts {
                        warn!(
                            "Giving up on {} after {} lock attempts",
                            lock_key, self.config.max_attempts
                        );
                        return Err(Error::LockTimeout {
                            key: lock_key.to_string(),
                        });
                    }
                    if attempts > 0 {
                        let delay = self.config.backoff * attempts;
                        debug!("Backing off {:?} before retrying {}", delay, lock_key);
                        sleep(delay).await;
                    }
                    attempts += 1;

                    let permit = self.admit().await?;
                    match self.lock.acquire(lock_key, self.config.lease).await? {
                        Acquisition::Acquired(token) => KeyState::Owned(token, permit),
                        Acquisition::Busy => KeyState::Locked,
                    }
                }
                KeyState::Locked => {
                    self.metrics.record_contention(self.kind);
                    let bound = self.config.lease + self.config.backoff;
                    match self.lock.await_release(lock_key, bound).await {
                        Ok(()) => {}
                        Err(Error::LockTimeout { .. }) => {
                            warn!("Holder of {} did not finish within {:?}", lock_key, bound);
                        }
                        Err(e) => return Err(e),
                    }
                    self.observe(store_key).await?
                }
                KeyState::Owned(token, _permit) => {
                    // Another holder may have written between our miss and acquisition
                    match self.load(store_key).await {
                        Ok(None) => {}
                        Ok(Some(value)) => {
                            self.release_quietly(lock_key, &token).await;
                            return Ok(Resolved {
                                value,
                                resolution: Resolution::Cached,
                            });
                        }
                        Err(e) => {
                            self.release_quietly(lock_key, &token).await;
                            return Err(e);
                        }
                    }

                    let result = self.compute_and_store(store_key, compute).await;
                    self.release_quietly(lock_key, &token).await;
                    return result.map(|value| Resolved {
                        value,
                        resolution: Resolution::Computed,
                    });
                }
            };
        }
    }

    async fn admit(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.admission {
            Some(permits) => Arc::clone(permits)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| Error::Internal(format!("{} admission limiter closed", self.kind))),
            None => Ok(None),
        }
    }

    async fn observe<T: DeserializeOwned>(&self, store_key: &str) -> Result<KeyState<T>> {
        Ok(match self.load(store_key).await? {
            Some(value) => KeyState::Populated(value),
            None => KeyState::Unlocked,
        })
    }

    async fn load<T: DeserializeOwned>(&self, store_key: &str) -> Result<Option<T>> {
        match self.store.get(store_key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn compute_and_store<T, F, Fut>(&self, store_key: &str, compute: F) -> Result<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = match timeout(self.config.compute_timeout, compute()).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("Computing {} failed, leaving it uncached: {}", store_key, e);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Computing {} timed out after {:?}, leaving it uncached",
                    store_key, self.config.compute_timeout
                );
                return Err(Error::UpstreamUnavailable(format!(
                    "timed out after {:?} resolving {}",
                    self.config.compute_timeout, store_key
                )));
            }
        };

        let bytes = serde_json::to_vec(&value)?;
        self.store.set(store_key, bytes).await?;
        debug!("Stored {}", store_key);
        Ok(value)
    }

    /// Release errors are logged, not propagated: the lease expires anyway.
    async fn release_quietly(&self, lock_key: &str, token: &LockToken) {
        if let Err(e) = self.lock.release(lock_key, token).await {
            warn!("Failed to release {}: {}", lock_key, e);
        }
    }
}

impl std::fmt::Debug for ReadThrough {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThrough")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field(
                "available_permits",
                &self.admission.as_ref().map(|p| p.available_permits()),
            )
            .finish()
    }
}
