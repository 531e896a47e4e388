//! Period Aggregator
//!
//! Top articles over a calendar month or a year-relative week, summed from
//! the day cache. Summaries of finished periods are cached under their own
//! lock so concurrent requests for the same period compute it once.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use super::merge::{gather_days, merge_days, top_n};
use crate::cache::{DayCache, ReadThrough, ReadThroughConfig, Resolution, Resolved};
use crate::domain::{ArticleView, KeyValueStore, LockBackend, PeriodKey, RankingPolicy};
use crate::error::{Error, Result};
use crate::metrics::{CacheKind, ServiceMetrics};

/// Days resolved concurrently when none is configured: a whole month.
pub const DEFAULT_FAN_OUT: usize = 31;

#[derive(Debug, Clone)]
pub struct PeriodAggregatorConfig {
    /// Lock timings for period summaries
    pub summary: ReadThroughConfig,

    /// Maximum day lookups in flight per request
    pub fan_out: usize,

    pub ranking: RankingPolicy,
}

impl Default for PeriodAggregatorConfig {
    fn default() -> Self {
        Self {
            // A summary may have to fetch every day of a month first
            summary: ReadThroughConfig {
                lease: Duration::from_secs(300),
                compute_timeout: Duration::from_secs(225),
                ..ReadThroughConfig::default()
            },
            fan_out: DEFAULT_FAN_OUT,
            ranking: RankingPolicy::default(),
        }
    }
}

/// Ranked article totals for months and weeks.
pub struct PeriodAggregator {
    days: Arc<DayCache>,
    summaries: ReadThrough,
    fan_out: usize,
    ranking: RankingPolicy,
}

impl PeriodAggregator {
    pub fn new(
        config: PeriodAggregatorConfig,
        days: Arc<DayCache>,
        store: Arc<dyn KeyValueStore>,
        locks: Arc<dyn LockBackend>,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            days,
            summaries: ReadThrough::new(CacheKind::Period, config.summary, store, locks, metrics),
            fan_out: config.fan_out.max(1),
            ranking: config.ranking,
        }
    }

    /// Top `limit` articles (all when `None`) for a calendar month.
    pub async fn top_for_month(
        &self,
        year: i32,
        month: u32,
        limit: Option<usize>,
    ) -> Result<Vec<ArticleView>> {
        let period = PeriodKey::month(year, month)?;
        self.top_for_period(period, limit).await
    }

    /// Top `limit` articles (all when `None`) for week `week` of `year`.
    ///
    /// Week 1 starts on January 1st; week 53 holds the one or two days left
    /// over at the end of the year.
    pub async fn top_for_week(
        &self,
        year: i32,
        week: u32,
        limit: Option<usize>,
    ) -> Result<Vec<ArticleView>> {
        let period = PeriodKey::week(year, week)?;
        self.top_for_period(period, limit).await
    }

    /// Top articles for any period.
    ///
    /// A period that has not finished yet is summed over its elapsed days
    /// and the result is not cached. A period with no elapsed day is
    /// rejected.
    #[instrument(skip(self), fields(period = %period))]
    pub async fn top_for_period(
        &self,
        period: PeriodKey,
        limit: Option<usize>,
    ) -> Result<Vec<ArticleView>> {
        let today = self.days.clock().today();
        let all_days = period.days()?;
        let elapsed: Vec<NaiveDate> = all_days.iter().copied().filter(|d| *d < today).collect();

        if elapsed.is_empty() {
            return Err(Error::InvalidPeriod(format!(
                "{} has not started yet (today is {})",
                period, today
            )));
        }

        let ranked = if elapsed.len() == all_days.len() {
            let Resolved { value, resolution } = self
                .summaries
                .resolve(&period.store_key(), &period.lock_key(), || self.aggregate(elapsed))
                .await?;
            if resolution == Resolution::Computed {
                info!("Cached {} with {} articles", period, value.len());
            }
            value
        } else {
            debug!(
                "{} is in progress; summing {} of {} days without caching",
                period,
                elapsed.len(),
                all_days.len()
            );
            self.aggregate(elapsed).await?
        };

        Ok(top_n(ranked, limit))
    }

    async fn aggregate(&self, dates: Vec<NaiveDate>) -> Result<Vec<ArticleView>> {
        let records = gather_days(&self.days, dates, self.fan_out).await?;
        Ok(merge_days(&records, &self.ranking))
    }
}

impl std::fmt::Debug for PeriodAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodAggregator")
            .field("fan_out", &self.fan_out)
            .field("ranking", &self.ranking)
            .finish_non_exhaustive()
    }
}
