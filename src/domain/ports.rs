//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the caching core depends on. Adapters in
//! [`crate::adapters`] implement them against Wikipedia, Redis, or memory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Caching Core                          │
//! │   PeriodAggregator │ ArticlePeakDayFinder │ DayCache         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Ports (Traits)                          │
//! │   UpstreamSource │ LockBackend │ KeyValueStore │ Clock       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use super::model::{DayRecord, LockToken};
use crate::error::Result;

// =============================================================================
// Upstream Port
// =============================================================================

/// Source of ranked page views for a single calendar day.
///
/// Implementations may be slow and may fail transiently; retries and
/// timeouts are their own concern.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Fetch the ranked top articles for exactly one day.
    async fn fetch(&self, date: NaiveDate) -> Result<DayRecord>;
}

// =============================================================================
// Lock Backend Port
// =============================================================================

/// Cross-process lease lock primitives keyed by string.
///
/// A lease that is not released expires after its duration and the key
/// becomes acquirable again.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Atomically take `key` for `token` if it is free or its lease expired.
    ///
    /// Returns `false` if another holder has a live lease.
    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool>;

    /// Release `key` only if it is still held by `token`.
    ///
    /// Returns `false` if the lease expired or belongs to another holder.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool>;

    /// Wait until `key` is free (released or expired).
    ///
    /// Returns `false` if it was still held when `timeout` elapsed.
    async fn wait_for_release(&self, key: &str, timeout: Duration) -> Result<bool>;
}

// =============================================================================
// Key/Value Store Port
// =============================================================================

/// Durable keyed storage for encoded cache entries.
///
/// Entries carry no TTL: presence implies validity.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
}

// =============================================================================
// Clock Port
// =============================================================================

/// Source of the current calendar date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// UTC wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock pinned to a fixed date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
