//! Service Configuration
//!
//! Settings are layered: built-in defaults, then an optional YAML file,
//! then command-line flags and their environment variables.
//!
//! Leases must cover the work done under them. A day lease has to fit every
//! upstream attempt of one fetch, and a summary lease has to fit the day
//! fetches of a whole month at the configured concurrency.
//!
//! ```yaml
//! backend: redis
//! redis_host: cache.internal
//! redis_port: 6379
//! wikipedia_fetch_concurrency: 16
//! lock_lease_ms: 90000
//! article_tie_break: name-ascending
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::WikipediaConfig;
use crate::aggregate::{PeakDayFinderConfig, PeriodAggregatorConfig, DEFAULT_FAN_OUT};
use crate::cache::{DayCacheConfig, ReadThroughConfig, DEFAULT_FETCH_CONCURRENCY};
use crate::domain::{ArticleTieBreak, PeakTieBreak, RankingPolicy};
use crate::error::{Error, Result};

// =============================================================================
// Settings
// =============================================================================

/// Share of a lease a computation may use; the rest is slack for the store
/// write and the release.
const COMPUTE_SHARE: f64 = 0.75;

/// Most days a summarised period can span
const MAX_PERIOD_DAYS: usize = 31;

/// Where locks and cached entries are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local; nothing is shared between instances
    #[default]
    Memory,
    Redis,
}

/// Fully resolved service settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub backend: Backend,
    pub redis_url: String,

    pub wikipedia_url: String,
    pub user_agent: String,
    pub wikipedia_fetch_concurrency: usize,
    pub fan_out: usize,

    pub upstream_timeout: Duration,
    pub upstream_retries: u32,
    pub upstream_backoff: Duration,

    pub lock_lease: Duration,
    pub summary_lease: Duration,
    pub lock_attempts: u32,
    pub lock_backoff: Duration,
    pub lock_poll_interval: Duration,

    pub ranking: RankingPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let wikipedia = WikipediaConfig::default();
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            wikipedia_url: wikipedia.base_url,
            user_agent: wikipedia.user_agent,
            wikipedia_fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fan_out: DEFAULT_FAN_OUT,
            upstream_timeout: wikipedia.timeout,
            upstream_retries: wikipedia.retries,
            upstream_backoff: wikipedia.backoff,
            lock_lease: Duration::from_secs(60),
            summary_lease: Duration::from_secs(300),
            lock_attempts: 5,
            lock_backoff: Duration::from_millis(100),
            lock_poll_interval: Duration::from_millis(50),
            ranking: RankingPolicy::default(),
        }
    }
}

impl Settings {
    /// Resolve settings from an optional YAML file and command-line overrides.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            settings.apply_file(FileConfig::parse(&raw)?);
        }
        settings.apply_overrides(overrides);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_file(&mut self, file: FileConfig) {
        let redis_from_parts = match (&file.redis_host, file.redis_port) {
            (None, None) => None,
            (host, port) => Some(format!(
                "redis://{}:{}",
                host.as_deref().unwrap_or("127.0.0.1"),
                port.unwrap_or(6379)
            )),
        };

        set(&mut self.bind_addr, file.bind_addr);
        set(&mut self.backend, file.backend);
        set(&mut self.redis_url, file.redis_url.or(redis_from_parts));
        set(&mut self.wikipedia_url, file.wikipedia_url);
        set(&mut self.user_agent, file.user_agent);
        set(&mut self.wikipedia_fetch_concurrency, file.wikipedia_fetch_concurrency);
        set(&mut self.fan_out, file.fan_out);
        set(&mut self.upstream_timeout, file.upstream_timeout_ms.map(Duration::from_millis));
        set(&mut self.upstream_retries, file.upstream_retries);
        set(&mut self.upstream_backoff, file.upstream_backoff_ms.map(Duration::from_millis));
        set(&mut self.lock_lease, file.lock_lease_ms.map(Duration::from_millis));
        set(&mut self.summary_lease, file.summary_lease_ms.map(Duration::from_millis));
        set(&mut self.lock_attempts, file.lock_attempts);
        set(&mut self.lock_backoff, file.lock_backoff_ms.map(Duration::from_millis));
        set(&mut self.lock_poll_interval, file.lock_poll_interval_ms.map(Duration::from_millis));
        set(&mut self.ranking.article_tie_break, file.article_tie_break);
        set(&mut self.ranking.peak_tie_break, file.peak_tie_break);
    }

    fn apply_overrides(&mut self, o: &Overrides) {
        set(&mut self.bind_addr, o.bind_addr.clone());
        set(&mut self.backend, o.backend);
        set(&mut self.redis_url, o.redis_url.clone());
        set(&mut self.wikipedia_url, o.wikipedia_url.clone());
        set(&mut self.user_agent, o.user_agent.clone());
        set(&mut self.wikipedia_fetch_concurrency, o.wikipedia_fetch_concurrency);
        set(&mut self.fan_out, o.fan_out);
        set(&mut self.upstream_timeout, o.upstream_timeout_ms.map(Duration::from_millis));
        set(&mut self.upstream_retries, o.upstream_retries);
        set(&mut self.upstream_backoff, o.upstream_backoff_ms.map(Duration::from_millis));
        set(&mut self.lock_lease, o.lock_lease_ms.map(Duration::from_millis));
        set(&mut self.summary_lease, o.summary_lease_ms.map(Duration::from_millis));
        set(&mut self.lock_attempts, o.lock_attempts);
        set(&mut self.lock_backoff, o.lock_backoff_ms.map(Duration::from_millis));
        set(&mut self.lock_poll_interval, o.lock_poll_interval_ms.map(Duration::from_millis));
        set(&mut self.ranking.article_tie_break, o.article_tie_break);
        set(&mut self.ranking.peak_tie_break, o.peak_tie_break);
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("wikipedia_fetch_concurrency", self.wikipedia_fetch_concurrency as u64),
            ("fan_out", self.fan_out as u64),
            ("lock_attempts", u64::from(self.lock_attempts)),
            ("lock_lease_ms", self.lock_lease.as_millis() as u64),
            ("summary_lease_ms", self.summary_lease.as_millis() as u64),
            ("upstream_timeout_ms", self.upstream_timeout.as_millis() as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        self.validate_leases()?;
        if self.backend == Backend::Redis && !self.redis_url.starts_with("redis") {
            return Err(Error::Config(format!(
                "redis_url must be a redis:// or rediss:// URL, got {}",
                self.redis_url
            )));
        }
        Ok(())
    }

    fn validate_leases(&self) -> Result<()> {
        let fetch = self.wikipedia().worst_case_latency();
        let per_day = self.read_through(self.lock_lease).compute_timeout;
        if per_day < fetch {
            return Err(Error::Config(format!(
                "lock_lease_ms {} allows {:?} per day fetch, but {} upstream attempts can take {:?}",
                self.lock_lease.as_millis(),
                per_day,
                self.upstream_retries + 1,
                fetch
            )));
        }

        let summary = self.read_through(self.summary_lease).compute_timeout;
        let needed = per_day.saturating_mul(self.month_fetch_rounds());
        if summary < needed {
            return Err(Error::Config(format!(
                "summary_lease_ms {} allows {:?} per summary, but a month of day fetches can take {:?}",
                self.summary_lease.as_millis(),
                summary,
                needed
            )));
        }
        Ok(())
    }

    /// Sequential waves of day fetches a 31-day period needs.
    fn month_fetch_rounds(&self) -> u32 {
        let parallel = self.fan_out.min(self.wikipedia_fetch_concurrency).max(1);
        MAX_PERIOD_DAYS.div_ceil(parallel) as u32
    }

    pub fn wikipedia(&self) -> WikipediaConfig {
        WikipediaConfig {
            base_url: self.wikipedia_url.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.upstream_timeout,
            retries: self.upstream_retries,
            backoff: self.upstream_backoff,
            ranking: self.ranking,
        }
    }

    pub fn day_cache(&self) -> DayCacheConfig {
        DayCacheConfig {
            read_through: self.read_through(self.lock_lease),
            fetch_concurrency: self.wikipedia_fetch_concurrency,
        }
    }

    pub fn aggregator(&self) -> PeriodAggregatorConfig {
        PeriodAggregatorConfig {
            summary: self.read_through(self.summary_lease),
            fan_out: self.fan_out,
            ranking: self.ranking,
        }
    }

    pub fn peak_finder(&self) -> PeakDayFinderConfig {
        PeakDayFinderConfig {
            fan_out: self.fan_out,
            ranking: self.ranking,
        }
    }

    fn read_through(&self, lease: Duration) -> ReadThroughConfig {
        ReadThroughConfig {
            lease,
            compute_timeout: lease.mul_f64(COMPUTE_SHARE),
            max_attempts: self.lock_attempts,
            backoff: self.lock_backoff,
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

// =============================================================================
// YAML File
// =============================================================================

/// Keys accepted in the YAML configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<String>,
    pub backend: Option<Backend>,
    pub redis_url: Option<String>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub wikipedia_url: Option<String>,
    pub user_agent: Option<String>,
    pub wikipedia_fetch_concurrency: Option<usize>,
    pub fan_out: Option<usize>,
    pub upstream_timeout_ms: Option<u64>,
    pub upstream_retries: Option<u32>,
    pub upstream_backoff_ms: Option<u64>,
    pub lock_lease_ms: Option<u64>,
    pub summary_lease_ms: Option<u64>,
    pub lock_attempts: Option<u32>,
    pub lock_backoff_ms: Option<u64>,
    pub lock_poll_interval_ms: Option<u64>,
    pub article_tie_break: Option<ArticleTieBreak>,
    pub peak_tie_break: Option<PeakTieBreak>,
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }
}

// =============================================================================
// Command Line
// =============================================================================

/// Command-line and environment overrides; unset flags leave lower layers
/// untouched.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// HTTP bind address
    #[arg(long, env = "BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Lock and cache backend
    #[arg(long, env = "BACKEND", value_enum)]
    pub backend: Option<Backend>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Wikimedia top-articles endpoint
    #[arg(long, env = "WIKIPEDIA_URL")]
    pub wikipedia_url: Option<String>,

    /// User-Agent sent to Wikimedia
    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Maximum concurrent Wikipedia requests
    #[arg(long, env = "WIKIPEDIA_FETCH_CONCURRENCY")]
    pub wikipedia_fetch_concurrency: Option<usize>,

    /// Maximum concurrent day lookups per period
    #[arg(long, env = "FAN_OUT")]
    pub fan_out: Option<usize>,

    #[arg(long, env = "UPSTREAM_TIMEOUT_MS")]
    pub upstream_timeout_ms: Option<u64>,

    #[arg(long, env = "UPSTREAM_RETRIES")]
    pub upstream_retries: Option<u32>,

    #[arg(long, env = "UPSTREAM_BACKOFF_MS")]
    pub upstream_backoff_ms: Option<u64>,

    /// Lease on day entries while they are fetched
    #[arg(long, env = "LOCK_LEASE_MS")]
    pub lock_lease_ms: Option<u64>,

    /// Lease on period summaries while they are computed
    #[arg(long, env = "SUMMARY_LEASE_MS")]
    pub summary_lease_ms: Option<u64>,

    #[arg(long, env = "LOCK_ATTEMPTS")]
    pub lock_attempts: Option<u32>,

    #[arg(long, env = "LOCK_BACKOFF_MS")]
    pub lock_backoff_ms: Option<u64>,

    #[arg(long, env = "LOCK_POLL_INTERVAL_MS")]
    pub lock_poll_interval_ms: Option<u64>,

    /// name-ascending or name-descending
    #[arg(long, env = "ARTICLE_TIE_BREAK")]
    pub article_tie_break: Option<ArticleTieBreak>,

    /// earliest or latest
    #[arg(long, env = "PEAK_TIE_BREAK")]
    pub peak_tie_break: Option<PeakTieBreak>,
}
