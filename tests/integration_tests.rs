//! Wikitop Integration Tests
//!
//! Full-stack scenarios over the in-memory adapters:
//! - Several service instances sharing one store and lock backend
//! - Period and peak queries over the shared day cache
//! - The HTTP layer served over a real socket

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use wikitop::adapters::{InMemoryLockBackend, InMemoryStore, StaticUpstream};
use wikitop::domain::{ArticleView, DayRecord, FixedClock, RankingPolicy};
use wikitop::metrics::CacheKind;
use wikitop::{
    ArticlePeakDayFinder, DayCache, DayCacheConfig, PeakDayFinderConfig, PeriodAggregator,
    PeriodAggregatorConfig, ReadThroughConfig, ServiceMetrics,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn day(on: NaiveDate, articles: &[(&str, u64)]) -> DayRecord {
    DayRecord::ranked(
        on,
        articles
            .iter()
            .map(|(name, views)| ArticleView::new(*name, *views))
            .collect(),
        &RankingPolicy::default(),
    )
}

/// February 2021, with a busy first week
fn february() -> StaticUpstream {
    StaticUpstream::new()
        .with_days(vec![
            day(date(2021, 2, 1), &[("Main_Page", 100), ("Super_Bowl_LV", 40)]),
            day(date(2021, 2, 2), &[("Main_Page", 90), ("Groundhog_Day", 70)]),
            day(date(2021, 2, 7), &[("Super_Bowl_LV", 300), ("Main_Page", 95)]),
            day(date(2021, 2, 8), &[("Super_Bowl_LV", 120)]),
        ])
        .with_latency(Duration::from_millis(2))
}

fn timings() -> ReadThroughConfig {
    ReadThroughConfig {
        lease: Duration::from_secs(5),
        compute_timeout: Duration::from_secs(4),
        max_attempts: 5,
        backoff: Duration::from_millis(5),
    }
}

/// One simulated service instance
struct Instance {
    days: Arc<DayCache>,
    aggregator: Arc<PeriodAggregator>,
    finder: Arc<ArticlePeakDayFinder>,
    metrics: ServiceMetrics,
}

/// Shared infrastructure every instance points at
struct Cluster {
    upstream: Arc<StaticUpstream>,
    store: Arc<InMemoryStore>,
    locks: Arc<InMemoryLockBackend>,
    today: NaiveDate,
}

impl Cluster {
    fn new(upstream: StaticUpstream, today: NaiveDate) -> Self {
        Self {
            upstream: Arc::new(upstream),
            store: Arc::new(InMemoryStore::new()),
            locks: Arc::new(InMemoryLockBackend::new()),
            today,
        }
    }

    fn instance(&self) -> Instance {
        let metrics = ServiceMetrics::new().unwrap();
        let days = Arc::new(DayCache::new(
            DayCacheConfig {
                read_through: timings(),
                fetch_concurrency: 4,
            },
            self.store.clone(),
            self.locks.clone(),
            self.upstream.clone(),
            Arc::new(FixedClock(self.today)),
            metrics.clone(),
        ));
        let aggregator = Arc::new(PeriodAggregator::new(
            PeriodAggregatorConfig {
                summary: timings(),
                fan_out: 4,
                ranking: RankingPolicy::default(),
            },
            days.clone(),
            self.store.clone(),
            self.locks.clone(),
            metrics.clone(),
        ));
        let finder = Arc::new(ArticlePeakDayFinder::new(
            PeakDayFinderConfig {
                fan_out: 4,
                ranking: RankingPolicy::default(),
            },
            days.clone(),
        ));
        Instance {
            days,
            aggregator,
            finder,
            metrics,
        }
    }
}

// =============================================================================
// Shared Day Cache
// =============================================================================

mod shared_cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_instances_share_one_fetch_per_day() {
        let cluster = Cluster::new(february(), date(2021, 6, 1));
        let a = cluster.instance();
        let b = cluster.instance();
        let target = date(2021, 2, 7);

        let mut handles = Vec::new();
        for i in 0..10 {
            let days = if i % 2 == 0 { a.days.clone() } else { b.days.clone() };
            handles.push(tokio::spawn(async move { days.get_day(target).await }));
        }
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record.articles[0], ArticleView::new("Super_Bowl_LV", 300));
        }

        assert_eq!(cluster.upstream.fetch_count(target), 1);
        assert!(!cluster.locks.is_held("day:2021-02-07"));
    }

    #[tokio::test]
    async fn test_instances_share_period_summaries() {
        let cluster = Cluster::new(february(), date(2021, 6, 1));
        let a = cluster.instance();
        let b = cluster.instance();

        let (left, right) = tokio::join!(
            a.aggregator.top_for_month(2021, 2, None),
            b.aggregator.top_for_month(2021, 2, None)
        );
        let left = left.unwrap();
        assert_eq!(left, right.unwrap());
        assert_eq!(left[0], ArticleView::new("Super_Bowl_LV", 460));
        assert_eq!(left[1], ArticleView::new("Main_Page", 285));

        // 28 days plus one summary
        assert_eq!(cluster.upstream.total_fetches(), 28);
        assert_eq!(cluster.store.writes(), 29);

        let hits = a.metrics.lookups(CacheKind::Period, true) + b.metrics.lookups(CacheKind::Period, true);
        let misses =
            a.metrics.lookups(CacheKind::Period, false) + b.metrics.lookups(CacheKind::Period, false);
        assert_eq!(hits + misses, 2);
    }

    #[tokio::test]
    async fn test_weeks_and_peaks_reuse_month_days() {
        let cluster = Cluster::new(february(), date(2021, 6, 1));
        let instance = cluster.instance();

        instance.aggregator.top_for_month(2021, 2, None).await.unwrap();
        let fetched = cluster.upstream.total_fetches();

        // Week 5 is January 29th to February 4th; only January is new
        let week = instance.aggregator.top_for_week(2021, 5, Some(2)).await.unwrap();
        assert_eq!(
            week,
            vec![
                ArticleView::new("Main_Page", 190),
                ArticleView::new("Groundhog_Day", 70),
            ]
        );
        assert_eq!(cluster.upstream.total_fetches(), fetched + 3);

        let peak = instance.finder.peak_day(2021, 2, "Super_Bowl_LV").await.unwrap();
        assert_eq!(peak.date, date(2021, 2, 7));
        assert_eq!(peak.view_count, 300);
        assert_eq!(cluster.upstream.total_fetches(), fetched + 3);
    }

    #[tokio::test]
    async fn test_upstream_outage_then_recovery() {
        let outage = date(2021, 2, 14);
        let cluster = Cluster::new(february().failing_on(outage), date(2021, 6, 1));
        let instance = cluster.instance();

        assert!(instance.aggregator.top_for_month(2021, 2, None).await.is_err());
        assert!(!cluster.store.contains("counts:month:2021:2"));
        assert!(!cluster.store.contains("counts:day:2021-02-14"));

        cluster.upstream.recover(outage);
        let top = instance.aggregator.top_for_month(2021, 2, Some(1)).await.unwrap();
        assert_eq!(top, vec![ArticleView::new("Super_Bowl_LV", 460)]);
        assert_eq!(cluster.upstream.fetch_count(outage), 2);
        assert!(cluster.upstream.fetch_count(date(2021, 2, 1)) == 1);
    }
}

// =============================================================================
// HTTP
// =============================================================================

mod http_tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use wikitop::server::{self, AppState};

    async fn start(instance: Instance) -> (String, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        let state = Arc::new(AppState {
            aggregator: instance.aggregator,
            finder: instance.finder,
            metrics: instance.metrics,
        });

        tokio::spawn(server::serve(listener, state, async {
            let _ = stopped.await;
        }));
        (base, stop)
    }

    #[tokio::test]
    async fn test_http_queries() {
        let cluster = Cluster::new(february(), date(2021, 6, 1));
        let (base, stop) = start(cluster.instance()).await;
        let client = reqwest::Client::new();

        let month: serde_json::Value = client
            .get(format!("{}/top/month/2021/2?limit=1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            month,
            serde_json::json!({
                "year": 2021,
                "month": 2,
                "article_counts": [{"article_name": "Super_Bowl_LV", "article_count": 460}]
            })
        );

        let peak: serde_json::Value = client
            .get(format!("{}/articles/top/day/2021/2/Groundhog_Day", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(peak["day"], 2);
        assert_eq!(peak["article_count"], 70);

        let bad = client
            .get(format!("{}/top/week/2021/54", base))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);

        let missing = client
            .get(format!("{}/articles/top/day/2021/2/Nobody", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let health = client.get(format!("{}/healthz", base)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        stop.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_http_upstream_failure_is_gateway_timeout() {
        let cluster = Cluster::new(february().failing_on(date(2021, 2, 3)), date(2021, 6, 1));
        let (base, stop) = start(cluster.instance()).await;

        let response = reqwest::get(format!("{}/top/month/2021/2", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Error fetching from Wikipedia.");
        assert_eq!(body["status"], 504);

        stop.send(()).unwrap();
    }
}

// =============================================================================
// Upstream Retry Budget
// =============================================================================

mod upstream_budget_tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use wikitop::adapters::WikipediaSource;
    use wikitop::config::{Overrides, Settings};
    use wikitop::domain::day_lock_key;
    use wikitop::Error;

    /// Accepts connections and never answers; returns the URL and the
    /// number of connections seen.
    async fn unresponsive_upstream() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                open.push(socket);
            }
        });

        (format!("http://{}/top", addr), accepted)
    }

    #[tokio::test]
    async fn test_day_lease_lets_every_upstream_attempt_run() {
        let (url, accepted) = unresponsive_upstream().await;

        // The default ratios, with every duration 50 times shorter
        let settings = Settings::load(
            None,
            &Overrides {
                wikipedia_url: Some(url),
                upstream_timeout_ms: Some(200),
                upstream_backoff_ms: Some(5),
                lock_lease_ms: Some(1_200),
                ..Overrides::default()
            },
        )
        .unwrap();
        let locks = Arc::new(InMemoryLockBackend::new());
        let days = DayCache::new(
            settings.day_cache(),
            Arc::new(InMemoryStore::new()),
            locks.clone(),
            Arc::new(WikipediaSource::new(settings.wikipedia()).unwrap()),
            Arc::new(FixedClock(date(2021, 6, 1))),
            ServiceMetrics::new().unwrap(),
        );

        let target = date(2021, 3, 1);
        let result = days.get_day(target).await;

        assert_matches!(
            result,
            Err(Error::UpstreamUnavailable(msg)) if msg.contains("after 4 attempts")
        );
        assert_eq!(accepted.load(Ordering::SeqCst), 4);
        assert!(!locks.is_held(&day_lock_key(target)));
    }
}
