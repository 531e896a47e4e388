//! Domain Layer
//!
//! Value objects and port traits shared by the caching core and its
//! adapters.
//!
//! - **Model** (`model.rs`) - Article views, day records, period keys,
//!   lock tokens, and the ranking policy
//! - **Ports** (`ports.rs`) - Trait abstractions for upstream data, locks,
//!   storage, and time
//!
//! # Usage
//!
//! ```ignore
//! use wikitop::domain::{KeyValueStore, LockBackend, UpstreamSource};
//!
//! // Components receive their collaborators at construction
//! let days = DayCache::new(config, store, locks, upstream, clock, metrics);
//! ```

pub mod model;
pub mod ports;

pub use model::{
    day_lock_key, day_store_key, ArticleTieBreak, ArticleView, DayRecord, LockToken, PeakDay,
    PeakTieBreak, PeriodKey, RankingPolicy,
};
pub use ports::{Clock, FixedClock, KeyValueStore, LockBackend, SystemClock, UpstreamSource};
