//! Aggregation Layer
//!
//! Queries answered by combining cached day records:
//!
//! - **Period** (`period.rs`) - Ranked totals for a month or week
//! - **Peak** (`peak.rs`) - The best day of a month for one article
//! - **Merge** (`merge.rs`) - Summing, ranking, and bounded day fan-out

mod merge;
mod peak;
mod period;

pub use merge::{gather_days, merge_days, top_n};
pub use peak::{ArticlePeakDayFinder, PeakDayFinderConfig};
pub use period::{PeriodAggregator, PeriodAggregatorConfig, DEFAULT_FAN_OUT};
