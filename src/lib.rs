//! Wikitop - Wikipedia Top Articles Service
//!
//! Answers "most viewed articles" queries over months and weeks, and finds
//! the day a given article peaked, from Wikipedia's daily pageview rankings.
//!
//! # Architecture
//!
//! Every answer is assembled from single-day records held in a shared
//! read-through cache. A cache miss is filled by exactly one caller across
//! all service instances, coordinated by a lease-based distributed lock:
//!
//! ```text
//! PeriodAggregator ─┐
//!                   ├─▶ DayCache ─▶ DistributedLock + KeyValueStore ─▶ UpstreamSource
//! PeakDayFinder ────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`] - Value objects, ranking policy, and port traits
//! - [`calendar`] - Days of a week or month
//! - [`cache`] - Distributed lock, read-through protocol, and day cache
//! - [`aggregate`] - Period totals and article peak days
//! - [`adapters`] - Wikipedia, Redis, and in-memory port implementations
//! - [`config`] - Layered service settings
//! - [`server`] - HTTP routes
//! - [`metrics`] - Prometheus counters
//! - [`error`] - Error types

pub mod adapters;
pub mod aggregate;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use aggregate::{
    ArticlePeakDayFinder, PeakDayFinderConfig, PeriodAggregator, PeriodAggregatorConfig,
};
pub use cache::{DayCache, DayCacheConfig, DistributedLock, ReadThroughConfig};
pub use config::Settings;
pub use domain::{ArticleView, DayRecord, PeakDay, PeriodKey, RankingPolicy};
pub use error::{Error, Result};
pub use metrics::ServiceMetrics;
