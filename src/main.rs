//! Wikitop service entrypoint.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Wikitop                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  HTTP Layer  │───▶│  Aggregators │───▶│   DayCache   │       │
//! │  └──────────────┘    └──────────────┘    └──────┬───────┘       │
//! │                                                 │               │
//! │                            Redis / memory ◀─────┴────▶ Wikipedia │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wikitop::adapters::{
    self, InMemoryLockBackend, InMemoryStore, RedisLockBackend, RedisStore, WikipediaSource,
};
use wikitop::config::{Backend, Overrides, Settings};
use wikitop::domain::{KeyValueStore, LockBackend, SystemClock};
use wikitop::server::{self, AppState};
use wikitop::{ArticlePeakDayFinder, DayCache, Error, PeriodAggregator, Result, ServiceMetrics};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Wikitop - Wikipedia top-article service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "WIKITOP_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let settings = Settings::load(args.config.as_deref(), &args.overrides).map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    info!("Starting Wikitop");
    info!("  Bind address: {}", settings.bind_addr);
    info!("  Backend: {:?}", settings.backend);
    info!("  Wikipedia URL: {}", settings.wikipedia_url);
    info!("  Fetch concurrency: {}", settings.wikipedia_fetch_concurrency);
    info!("  Fan-out: {}", settings.fan_out);
    info!("  Day lease: {:?}, summary lease: {:?}", settings.lock_lease, settings.summary_lease);

    let (store, locks): (Arc<dyn KeyValueStore>, Arc<dyn LockBackend>) = match settings.backend {
        Backend::Memory => (
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryLockBackend::new().with_poll_interval(settings.lock_poll_interval)),
        ),
        Backend::Redis => {
            let conn = adapters::connect(&settings.redis_url).await.map_err(|e| {
                error!("Failed to connect to Redis at {}: {}", settings.redis_url, e);
                e
            })?;
            (
                Arc::new(RedisStore::new(conn.clone())),
                Arc::new(RedisLockBackend::new(conn, settings.lock_poll_interval)),
            )
        }
    };

    let metrics = ServiceMetrics::new()?;
    let upstream = Arc::new(WikipediaSource::new(settings.wikipedia())?);

    let days = Arc::new(DayCache::new(
        settings.day_cache(),
        store.clone(),
        locks.clone(),
        upstream,
        Arc::new(SystemClock),
        metrics.clone(),
    ));
    let aggregator = Arc::new(PeriodAggregator::new(
        settings.aggregator(),
        days.clone(),
        store,
        locks,
        metrics.clone(),
    ));
    let finder = Arc::new(ArticlePeakDayFinder::new(settings.peak_finder(), days));

    let state = Arc::new(AppState {
        aggregator,
        finder,
        metrics,
    });

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", settings.bind_addr, e)))?;

    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("Wikitop shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "redis=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
