//! Domain Value Objects
//!
//! Article views, day records, period keys, and the ranking policy that
//! orders them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::error::{Error, Result};

// =============================================================================
// Article Views
// =============================================================================

/// View count for a single article over a day or an aggregated period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArticleView {
    pub article_name: String,
    #[serde(rename = "article_count")]
    pub view_count: u64,
}

impl ArticleView {
    pub fn new(article_name: impl Into<String>, view_count: u64) -> Self {
        Self {
            article_name: article_name.into(),
            view_count,
        }
    }
}

/// Ranked top-articles list for one calendar day.
///
/// Immutable once fetched: page views for a finished day never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub articles: Vec<ArticleView>,
}

impl DayRecord {
    /// Build a record, ranking `articles` with the given policy.
    pub fn ranked(date: NaiveDate, mut articles: Vec<ArticleView>, policy: &RankingPolicy) -> Self {
        policy.rank(&mut articles);
        Self { date, articles }
    }

    /// Views for `article_name` on this day; absent articles count as zero.
    pub fn views_of(&self, article_name: &str) -> u64 {
        self.articles
            .iter()
            .find(|a| a.article_name == article_name)
            .map(|a| a.view_count)
            .unwrap_or(0)
    }

    /// Whether the article appears in this day's list at all.
    pub fn contains(&self, article_name: &str) -> bool {
        self.articles.iter().any(|a| a.article_name == article_name)
    }
}

/// The day within a month on which an article peaked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeakDay {
    pub article_name: String,
    pub date: NaiveDate,
    pub view_count: u64,
}

// =============================================================================
// Period Keys
// =============================================================================

/// A week or month, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKey {
    Month { year: i32, month: u32 },
    Week { year: i32, week: u32 },
}

impl PeriodKey {
    /// Month key; `month` must be in `1..=12`.
    pub fn month(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidPeriod(format!(
                "month must be from 1 to 12, got {}",
                month
            )));
        }
        calendar::first_day_of_year(year)?;
        Ok(PeriodKey::Month { year, month })
    }

    /// Week key; `week` must be in `1..=53` and exist in `year`.
    pub fn week(year: i32, week: u32) -> Result<Self> {
        if !(1..=calendar::MAX_WEEK).contains(&week) {
            return Err(Error::InvalidPeriod(format!(
                "week must be from 1 to {}, got {}",
                calendar::MAX_WEEK,
                week
            )));
        }
        if week > calendar::weeks_in_year(year)? {
            return Err(Error::InvalidPeriod(format!(
                "year {} has no week {}",
                year, week
            )));
        }
        Ok(PeriodKey::Week { year, week })
    }

    pub fn year(&self) -> i32 {
        match *self {
            PeriodKey::Month { year, .. } | PeriodKey::Week { year, .. } => year,
        }
    }

    /// Constituent days, in ascending order.
    pub fn days(&self) -> Result<Vec<NaiveDate>> {
        match *self {
            PeriodKey::Month { year, month } => calendar::days_in_month(year, month),
            PeriodKey::Week { year, week } => calendar::days_in_week(year, week),
        }
    }

    /// Key under which the summary lock is taken.
    pub fn lock_key(&self) -> String {
        match *self {
            PeriodKey::Month { year, month } => format!("month:{}:{}", year, month),
            PeriodKey::Week { year, week } => format!("week:{}:{}", year, week),
        }
    }

    /// Key under which the summary is stored.
    pub fn store_key(&self) -> String {
        format!("counts:{}", self.lock_key())
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKey::Month { year, month } => write!(f, "month {:04}-{:02}", year, month),
            PeriodKey::Week { year, week } => write!(f, "week {:04}-W{:02}", year, week),
        }
    }
}

/// Lock key for a single day.
pub fn day_lock_key(date: NaiveDate) -> String {
    format!("day:{}", date.format("%Y-%m-%d"))
}

/// Store key for a single day.
pub fn day_store_key(date: NaiveDate) -> String {
    format!("counts:{}", day_lock_key(date))
}

// =============================================================================
// Lock Token
// =============================================================================

/// Proof of ownership of a distributed lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh, globally unique token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Ranking Policy
// =============================================================================

/// Order applied to articles with equal view counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticleTieBreak {
    #[default]
    NameAscending,
    NameDescending,
}

impl FromStr for ArticleTieBreak {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name-ascending" => Ok(ArticleTieBreak::NameAscending),
            "name-descending" => Ok(ArticleTieBreak::NameDescending),
            other => Err(Error::Config(format!("unknown article tie-break: {}", other))),
        }
    }
}

/// Which day wins when an article peaks on several days with equal views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeakTieBreak {
    #[default]
    Earliest,
    Latest,
}

impl FromStr for PeakTieBreak {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "earliest" => Ok(PeakTieBreak::Earliest),
            "latest" => Ok(PeakTieBreak::Latest),
            other => Err(Error::Config(format!("unknown peak tie-break: {}", other))),
        }
    }
}

/// Deterministic ordering rules for ranked lists and peak days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RankingPolicy {
    #[serde(default)]
    pub article_tie_break: ArticleTieBreak,
    #[serde(default)]
    pub peak_tie_break: PeakTieBreak,
}

impl RankingPolicy {
    /// Views descending, then names per the tie-break.
    pub fn compare(&self, a: &ArticleView, b: &ArticleView) -> Ordering {
        b.view_count.cmp(&a.view_count).then_with(|| match self.article_tie_break {
            ArticleTieBreak::NameAscending => a.article_name.cmp(&b.article_name),
            ArticleTieBreak::NameDescending => b.article_name.cmp(&a.article_name),
        })
    }

    pub fn rank(&self, articles: &mut [ArticleView]) {
        articles.sort_by(|a, b| self.compare(a, b));
    }

    /// Whether `candidate` displaces the current peak `best`.
    pub fn is_better_peak(&self, candidate: (NaiveDate, u64), best: (NaiveDate, u64)) -> bool {
        match candidate.1.cmp(&best.1) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.peak_tie_break {
                PeakTieBreak::Earliest => candidate.0 < best.0,
                PeakTieBreak::Latest => candidate.0 > best.0,
            },
        }
    }
}
