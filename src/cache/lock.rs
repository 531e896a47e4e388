//! Distributed Lock
//!
//! Lease-based mutual exclusion keyed by string, layered over a
//! [`LockBackend`]. Every acquisition mints a fresh [`LockToken`]; only the
//! token's holder can release, so a holder whose lease expired cannot free a
//! lock that someone else has since taken.
//!
//! A lease bounds how long a crashed holder blocks others. It also means a
//! slow holder can lose exclusivity mid-section: leases must be set well
//! above the expected work duration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::domain::{LockBackend, LockToken};
use crate::error::{Error, Result};

/// Outcome of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Lock taken; the token is required to release it
    Acquired(LockToken),
    /// Another holder has a live lease
    Busy,
}

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The lease expired or belongs to someone else; nothing was released
    NotOwner,
}

/// Cooperative lock shared by every process using the same backend.
#[derive(Clone)]
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Try once to take `key` for `lease`.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str, lease: Duration) -> Result<Acquisition> {
        let token = LockToken::generate();
        if self.backend.try_acquire(key, &token, lease).await? {
            debug!("Acquired lock {}", key);
            Ok(Acquisition::Acquired(token))
        } else {
            debug!("Lock {} is busy", key);
            Ok(Acquisition::Busy)
        }
    }

    /// Release `key` if `token` still owns it.
    #[instrument(skip(self, token))]
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<Release> {
        if self.backend.release(key, token).await? {
            debug!("Released lock {}", key);
            Ok(Release::Released)
        } else {
            warn!("Lease on {} expired before release; exclusivity may have been lost", key);
            Ok(Release::NotOwner)
        }
    }

    /// Block until the current holder of `key` releases or its lease expires.
    ///
    /// Fails with `LockTimeout` if the key is still held after `bound`.
    #[instrument(skip(self))]
    pub async fn await_release(&self, key: &str, bound: Duration) -> Result<()> {
        if self.backend.wait_for_release(key, bound).await? {
            Ok(())
        } else {
            Err(Error::LockTimeout {
                key: key.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock").finish_non_exhaustive()
    }
}
