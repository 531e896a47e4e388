//! Caching Core
//!
//! Lock-coordinated read-through caching of day records.
//!
//! # Components
//!
//! - [`DistributedLock`] - Lease lock with owner tokens over a [`LockBackend`]
//! - [`ReadThrough`] - Cache-or-lock-or-compute protocol shared by all caches
//! - [`DayCache`] - Per-day records fetched from the upstream source
//!
//! [`LockBackend`]: crate::domain::LockBackend

mod day;
mod lock;
mod read_through;

pub use day::{DayCache, DayCacheConfig, DEFAULT_FETCH_CONCURRENCY};
pub use lock::{Acquisition, DistributedLock, Release};
pub use read_through::{ReadThrough, ReadThroughConfig, Resolution, Resolved};
