//! Article Peak Day
//!
//! Finds the day of a month on which one article drew the most views.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument};

use super::merge::gather_days;
use crate::cache::DayCache;
use super::period::DEFAULT_FAN_OUT;
use crate::domain::{PeakDay, PeriodKey, RankingPolicy};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PeakDayFinderConfig {
    /// Maximum day lookups in flight per scan
    pub fan_out: usize,

    /// Decides between days with equal views
    pub ranking: RankingPolicy,
}

impl Default for PeakDayFinderConfig {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_FAN_OUT,
            ranking: RankingPolicy::default(),
        }
    }
}

/// Scans a month's day records for one article.
///
/// Days on which the article is missing from the ranking count as zero
/// views. Reads go through the shared [`DayCache`]; the answer itself is
/// not cached.
pub struct ArticlePeakDayFinder {
    days: Arc<DayCache>,
    fan_out: usize,
    ranking: RankingPolicy,
}

impl ArticlePeakDayFinder {
    pub fn new(config: PeakDayFinderConfig, days: Arc<DayCache>) -> Self {
        Self {
            days,
            fan_out: config.fan_out.max(1),
            ranking: config.ranking,
        }
    }

    /// Day of `year`-`month` with the most views of `article_name`.
    ///
    /// For the current month only days before today are scanned.
    #[instrument(skip(self))]
    pub async fn peak_day(&self, year: i32, month: u32, article_name: &str) -> Result<PeakDay> {
        let period = PeriodKey::month(year, month)?;
        let today = self.days.clock().today();
        let elapsed: Vec<NaiveDate> = period
            .days()?
            .into_iter()
            .filter(|d| *d < today)
            .collect();

        if elapsed.is_empty() {
            return Err(Error::InvalidPeriod(format!(
                "{} has not started yet (today is {})",
                period, today
            )));
        }

        let records = gather_days(&self.days, elapsed, self.fan_out).await?;

        let mut seen = false;
        let mut best: Option<(NaiveDate, u64)> = None;
        for record in &records {
            seen |= record.contains(article_name);
            let candidate = (record.date, record.views_of(article_name));
            if best.map_or(true, |current| self.ranking.is_better_peak(candidate, current)) {
                best = Some(candidate);
            }
        }

        match best {
            Some((date, view_count)) if seen => {
                debug!("{} peaked on {} with {} views", article_name, date, view_count);
                Ok(PeakDay {
                    article_name: article_name.to_string(),
                    date,
                    view_count,
                })
            }
            _ => Err(Error::NotFound(format!(
                "{} is not among the top articles of any day in {}",
                article_name, period
            ))),
        }
    }
}

impl std::fmt::Debug for ArticlePeakDayFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticlePeakDayFinder")
            .field("fan_out", &self.fan_out)
            .field("ranking", &self.ranking)
            .finish_non_exhaustive()
    }
}
