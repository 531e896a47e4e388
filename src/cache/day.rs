//! Day Cache
//!
//! Read-through cache of single-day top-article records. On a miss exactly
//! one caller across all processes fetches the day upstream; everyone else
//! waits on the day's lock and then reads the stored record.
//!
//! Upstream fetches per process are capped at `fetch_concurrency`. A fetch
//! slot is claimed before the day's lock, so a lease only runs while the
//! fetch itself does.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::instrument;

use super::read_through::{ReadThrough, ReadThroughConfig, Resolved};
use crate::domain::{
    day_lock_key, day_store_key, Clock, DayRecord, KeyValueStore, LockBackend, UpstreamSource,
};
use crate::error::{Error, Result};
use crate::metrics::{CacheKind, ServiceMetrics};

/// Default cap on concurrent upstream fetches per process
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct DayCacheConfig {
    pub read_through: ReadThroughConfig,

    /// Maximum upstream fetches in flight
    pub fetch_concurrency: usize,
}

impl Default for DayCacheConfig {
    fn default() -> Self {
        Self {
            read_through: ReadThroughConfig::default(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

/// Read-through cache of [`DayRecord`]s keyed by date.
pub struct DayCache {
    read_through: ReadThrough,
    upstream: Arc<dyn UpstreamSource>,
    clock: Arc<dyn Clock>,
    metrics: ServiceMetrics,
}

impl DayCache {
    pub fn new(
        config: DayCacheConfig,
        store: Arc<dyn KeyValueStore>,
        locks: Arc<dyn LockBackend>,
        upstream: Arc<dyn UpstreamSource>,
        clock: Arc<dyn Clock>,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            read_through: ReadThrough::new(
                CacheKind::Day,
                config.read_through,
                store,
                locks,
                metrics.clone(),
            )
            .with_admission_limit(config.fetch_concurrency),
            upstream,
            clock,
            metrics,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Top articles for `date`, fetched upstream at most once per cache
    /// lifetime.
    ///
    /// Only finished days are served: `date` must be before today.
    #[instrument(skip(self), fields(date = %date))]
    pub async fn get_day(&self, date: NaiveDate) -> Result<DayRecord> {
        let today = self.clock.today();
        if date >= today {
            return Err(Error::InvalidPeriod(format!(
                "{} is not a finished day (today is {})",
                date, today
            )));
        }

        let upstream = Arc::clone(&self.upstream);
        let metrics = self.metrics.clone();
        let Resolved { value, .. } = self
            .read_through
            .resolve(&day_store_key(date), &day_lock_key(date), move || async move {
                let fetched = upstream.fetch(date).await;
                metrics.record_upstream(fetched.is_ok());
                let record = fetched?;
                if record.date != date {
                    return Err(Error::UpstreamResponseParse(format!(
                        "requested {} but upstream returned {}",
                        date, record.date
                    )));
                }
                Ok(record)
            })
            .await?;

        Ok(value)
    }
}

impl std::fmt::Debug for DayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DayCache")
            .field("read_through", &self.read_through)
            .finish_non_exhaustive()
    }
}
