//! In-Memory Adapters
//!
//! Process-local implementations of the lock, store, and upstream ports.
//! They back single-instance deployments and every test in the crate, and
//! count their operations so tests can assert on call volume.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{DayRecord, KeyValueStore, LockBackend, LockToken, UpstreamSource};
use crate::error::{Error, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Lock Backend
// =============================================================================

#[derive(Debug, Clone)]
struct Lease {
    token: LockToken,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Lease lock table for a single process.
///
/// Expired leases are replaced on the next acquisition, or dropped by the
/// first waiter that notices them.
#[derive(Debug)]
pub struct InMemoryLockBackend {
    leases: DashMap<String, Lease>,
    released: Notify,
    poll_interval: Duration,
    acquire_attempts: AtomicU64,
}

impl Default for InMemoryLockBackend {
    fn default() -> Self {
        Self {
            leases: DashMap::new(),
            released: Notify::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            acquire_attempts: AtomicU64::new(0),
        }
    }
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound between expiry checks while waiting for a release.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Whether `key` currently has a live lease.
    pub fn is_held(&self, key: &str) -> bool {
        self.leases.get(key).map(|l| l.is_live()).unwrap_or(false)
    }

    /// Leases in the table, including expired ones nobody has cleared yet.
    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Total `try_acquire` calls, successful or not.
    pub fn acquire_attempts(&self) -> u64 {
        self.acquire_attempts.load(Ordering::Relaxed)
    }

    /// Time left on the live lease for `key`. An expired lease is removed.
    fn remaining_lease(&self, key: &str) -> Option<Duration> {
        let remaining = self
            .leases
            .get(key)
            .map(|l| l.expires_at.saturating_duration_since(Instant::now()));
        match remaining {
            Some(left) if !left.is_zero() => Some(left),
            Some(_) => {
                if self.leases.remove_if(key, |_, l| !l.is_live()).is_some() {
                    debug!("Dropped expired lease on {}", key);
                }
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool> {
        self.acquire_attempts.fetch_add(1, Ordering::Relaxed);
        let fresh = Lease {
            token: token.clone(),
            expires_at: Instant::now() + lease,
        };

        let acquired = match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_live() {
                    false
                } else {
                    debug!("Replacing expired lease on {}", key);
                    held.insert(fresh);
                    true
                }
            }
            Entry::Vacant(free) => {
                free.insert(fresh);
                true
            }
        };
        Ok(acquired)
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let removed = self
            .leases
            .remove_if(key, |_, lease| lease.token == *token && lease.is_live())
            .is_some();
        if removed {
            self.released.notify_waiters();
        }
        Ok(removed)
    }

    async fn wait_for_release(&self, key: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            // Registered before the check so a release in between still wakes us
            let notified = self.released.notified();

            let remaining_lease = match self.remaining_lease(key) {
                None => return Ok(true),
                Some(remaining) => remaining,
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }

            let wake_after = (deadline - now)
                .min(self.poll_interval)
                .min(remaining_lease);
            let _ = tokio::time::timeout(wake_after, notified).await;
        }
    }
}

// =============================================================================
// Key/Value Store
// =============================================================================

/// Process-local key/value store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Vec<u8>>,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total `set` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_raw(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// Upstream
// =============================================================================

/// Upstream serving preset day records.
///
/// Days without a preset record return an empty list, as Wikipedia does for
/// days it has no ranking for.
#[derive(Debug, Default)]
pub struct StaticUpstream {
    days: DashMap<NaiveDate, DayRecord>,
    failing: RwLock<HashSet<NaiveDate>>,
    fetches: DashMap<NaiveDate, u64>,
    latency: Duration,
}

impl StaticUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(self, record: DayRecord) -> Self {
        self.days.insert(record.date, record);
        self
    }

    /// Serve `record` when `date` is requested, whatever its own date.
    pub fn with_day_as(self, date: NaiveDate, record: DayRecord) -> Self {
        self.days.insert(date, record);
        self
    }

    pub fn with_days(self, records: impl IntoIterator<Item = DayRecord>) -> Self {
        for record in records {
            self.days.insert(record.date, record);
        }
        self
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_on(self, date: NaiveDate) -> Self {
        self.fail(date);
        self
    }

    /// Make fetches for `date` fail until [`recover`](Self::recover).
    pub fn fail(&self, date: NaiveDate) {
        self.failing.write().insert(date);
    }

    pub fn recover(&self, date: NaiveDate) {
        self.failing.write().remove(&date);
    }

    /// Fetches issued for `date`, including failed ones.
    pub fn fetch_count(&self, date: NaiveDate) -> u64 {
        self.fetches.get(&date).map(|c| *c.value()).unwrap_or(0)
    }

    pub fn total_fetches(&self) -> u64 {
        self.fetches.iter().map(|c| *c.value()).sum()
    }
}

#[async_trait]
impl UpstreamSource for StaticUpstream {
    async fn fetch(&self, date: NaiveDate) -> Result<DayRecord> {
        *self.fetches.entry(date).or_insert(0) += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing.read().contains(&date) {
            return Err(Error::UpstreamUnavailable(format!(
                "no data could be fetched for {}",
                date
            )));
        }

        Ok(self
            .days
            .get(&date)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| DayRecord {
                date,
                articles: Vec::new(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArticleView;
    use assert_matches::assert_matches;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let locks = InMemoryLockBackend::new();
        let a = LockToken::generate();
        let b = LockToken::generate();
        let lease = Duration::from_secs(10);

        assert!(locks.try_acquire("k", &a, lease).await.unwrap());
        assert!(!locks.try_acquire("k", &b, lease).await.unwrap());
        assert!(!locks.release("k", &b).await.unwrap());
        assert!(locks.is_held("k"));

        assert!(locks.release("k", &a).await.unwrap());
        assert!(!locks.is_held("k"));
        assert!(locks.try_acquire("k", &b, lease).await.unwrap());
        assert_eq!(locks.acquire_attempts(), 3);
    }

    #[tokio::test]
    async fn test_lock_expiry() {
        let locks = InMemoryLockBackend::new();
        let a = LockToken::generate();
        let b = LockToken::generate();

        assert!(locks.try_acquire("k", &a, Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!locks.is_held("k"));
        assert!(locks.try_acquire("k", &b, Duration::from_secs(10)).await.unwrap());
        // The expired holder cannot release the new lease
        assert!(!locks.release("k", &a).await.unwrap());
        assert!(locks.is_held("k"));
    }

    #[tokio::test]
    async fn test_waiter_drops_crashed_holders_lease() {
        let locks = InMemoryLockBackend::new();
        let crashed = LockToken::generate();

        assert!(locks.try_acquire("k", &crashed, Duration::from_millis(20)).await.unwrap());
        assert_eq!(locks.lease_count(), 1);

        // Nobody releases or re-acquires; the waiter sees the expiry
        assert!(locks.wait_for_release("k", Duration::from_secs(1)).await.unwrap());
        assert_eq!(locks.lease_count(), 0);
        assert!(!locks.release("k", &crashed).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_keeps_live_lease() {
        let locks = InMemoryLockBackend::new();
        let holder = LockToken::generate();

        assert!(locks.try_acquire("k", &holder, Duration::from_secs(10)).await.unwrap());
        assert!(!locks.wait_for_release("k", Duration::from_millis(20)).await.unwrap());
        assert_eq!(locks.lease_count(), 1);
        assert!(locks.is_held("k"));
    }

    #[tokio::test]
    async fn test_wait_for_free_key_returns_immediately() {
        let locks = InMemoryLockBackend::new();
        assert!(locks
            .wait_for_release("nobody", Duration::from_millis(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_static_upstream() {
        let day = date(2020, 5, 1);
        let upstream = StaticUpstream::new().with_day(DayRecord {
            date: day,
            articles: vec![ArticleView::new("A", 1)],
        });

        assert_eq!(upstream.fetch(day).await.unwrap().articles.len(), 1);
        assert!(upstream.fetch(date(2020, 5, 2)).await.unwrap().articles.is_empty());

        upstream.fail(day);
        assert_matches!(upstream.fetch(day).await, Err(Error::UpstreamUnavailable(_)));
        upstream.recover(day);
        assert!(upstream.fetch(day).await.is_ok());

        assert_eq!(upstream.fetch_count(day), 3);
        assert_eq!(upstream.total_fetches(), 4);
    }
}
