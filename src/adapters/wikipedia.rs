//! Wikipedia Pageviews Source
//!
//! Fetches a day's most-viewed articles from the Wikimedia REST API.
//! Transient failures are retried with doubling backoff. How many fetches run
//! at once is up to the caller (see [`crate::cache::DayCacheConfig`]).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::domain::{ArticleView, DayRecord, RankingPolicy, UpstreamSource};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct WikipediaConfig {
    /// Top-articles endpoint, without the date path
    pub base_url: String,

    /// Sent with every request, as Wikimedia asks clients to identify
    pub user_agent: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Additional attempts after a transient failure
    pub retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub backoff: Duration,

    pub ranking: RankingPolicy,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://wikimedia.org/api/rest_v1/metrics/pageviews/top/en.wikipedia/all-access"
                .to_string(),
            user_agent: concat!("wikitop/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            retries: 3,
            backoff: Duration::from_millis(250),
            ranking: RankingPolicy::default(),
        }
    }
}

impl WikipediaConfig {
    /// Longest a single [`WikipediaSource::fetch`] can take: every attempt
    /// running into the timeout, plus the backoff between them.
    pub fn worst_case_latency(&self) -> Duration {
        let mut total = self.timeout;
        let mut delay = self.backoff;
        for _ in 0..self.retries {
            total = total.saturating_add(delay).saturating_add(self.timeout);
            delay = delay.saturating_mul(2);
        }
        total
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TopResponse {
    #[serde(default)]
    items: Vec<TopItem>,
}

#[derive(Debug, Deserialize)]
struct TopItem {
    #[serde(default)]
    articles: Vec<TopArticle>,
}

#[derive(Debug, Deserialize)]
struct TopArticle {
    article: String,
    views: u64,
}

/// Decode a top-articles response body into a ranked record for `date`.
///
/// A body without items is a day Wikimedia has no ranking for and yields an
/// empty record.
pub fn parse_top_articles(date: NaiveDate, body: &[u8], policy: &RankingPolicy) -> Result<DayRecord> {
    let response: TopResponse = serde_json::from_slice(body)
        .map_err(|e| Error::UpstreamResponseParse(format!("top articles for {}: {}", date, e)))?;

    let articles = response
        .items
        .into_iter()
        .next()
        .map(|item| {
            item.articles
                .into_iter()
                .map(|a| ArticleView::new(a.article, a.views))
                .collect()
        })
        .unwrap_or_default();

    Ok(DayRecord::ranked(date, articles, policy))
}

// =============================================================================
// Wikipedia Source
// =============================================================================

/// Result of a single HTTP attempt
enum Attempt {
    Done(DayRecord),
    /// Worth retrying: connection failures, timeouts, 5xx, 429
    Transient(Error),
    Fatal(Error),
}

/// [`UpstreamSource`] backed by the Wikimedia pageviews API.
pub struct WikipediaSource {
    config: WikipediaConfig,
    client: Client,
}

impl WikipediaSource {
    pub fn new(config: WikipediaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &WikipediaConfig {
        &self.config
    }

    fn day_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}",
            self.config.base_url.trim_end_matches('/'),
            date.year(),
            date.month(),
            date.day()
        )
    }

    async fn attempt(&self, url: &str, date: NaiveDate) -> Attempt {
        let response = match self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(Error::UpstreamConnection)
        {
            Ok(response) => response,
            Err(e) => return Attempt::Transient(e),
        };

        let status = response.status();
        if !status.is_success() {
            let error = Error::UpstreamUnavailable(format!("{} returned {}", url, status));
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Attempt::Transient(error)
            } else {
                Attempt::Fatal(error)
            };
        }

        let body = match response.bytes().await.map_err(Error::UpstreamConnection) {
            Ok(body) => body,
            Err(e) => return Attempt::Transient(e),
        };

        match parse_top_articles(date, &body, &self.config.ranking) {
            Ok(record) => Attempt::Done(record),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

#[async_trait]
impl UpstreamSource for WikipediaSource {
    #[instrument(skip(self), fields(date = %date))]
    async fn fetch(&self, date: NaiveDate) -> Result<DayRecord> {
        let url = self.day_url(date);
        let mut delay = self.config.backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Fetching {} (attempt {})", url, attempt);

            match self.attempt(&url, date).await {
                Attempt::Done(record) => {
                    debug!("Fetched {} articles for {}", record.articles.len(), date);
                    return Ok(record);
                }
                Attempt::Transient(e) if attempt <= self.config.retries => {
                    warn!("Fetch of {} failed, retrying in {:?}: {}", date, delay, e);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Attempt::Transient(e) => {
                    return Err(Error::UpstreamUnavailable(format!(
                        "{} after {} attempts: {}",
                        date, attempt, e
                    )));
                }
                Attempt::Fatal(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for WikipediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikipediaSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArticleTieBreak;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TOP_2015_10_10: &str = r#"{
        "items": [{
            "project": "en.wikipedia",
            "access": "all-access",
            "year": "2015",
            "month": "10",
            "day": "10",
            "articles": [
                {"article": "Main_Page", "views": 18793503, "rank": 1},
                {"article": "Special:Search", "views": 2287382, "rank": 2},
                {"article": "Napoleon", "views": 8871, "rank": 998}
            ]
        }]
    }"#;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quick_config(base_url: String) -> WikipediaConfig {
        WikipediaConfig {
            base_url,
            timeout: Duration::from_secs(2),
            retries: 2,
            backoff: Duration::from_millis(1),
            ..WikipediaConfig::default()
        }
    }

    /// Serve canned HTTP responses in order, one per connection; the last one
    /// repeats.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/top", addr), hits)
    }

    #[test]
    fn test_parse_top_articles() {
        let record =
            parse_top_articles(date(2015, 10, 10), TOP_2015_10_10.as_bytes(), &RankingPolicy::default())
                .unwrap();

        assert_eq!(record.date, date(2015, 10, 10));
        assert_eq!(record.articles.len(), 3);
        assert_eq!(record.articles[0], ArticleView::new("Main_Page", 18793503));
        assert_eq!(record.views_of("Napoleon"), 8871);
    }

    #[test]
    fn test_parse_reranks_ties() {
        let body = br#"{"items":[{"articles":[
            {"article":"B","views":5,"rank":1},
            {"article":"A","views":5,"rank":2}
        ]}]}"#;
        let policy = RankingPolicy::default();
        let record = parse_top_articles(date(2020, 1, 1), body, &policy).unwrap();
        assert_eq!(record.articles[0].article_name, "A");

        let policy = RankingPolicy {
            article_tie_break: ArticleTieBreak::NameDescending,
            ..RankingPolicy::default()
        };
        let record = parse_top_articles(date(2020, 1, 1), body, &policy).unwrap();
        assert_eq!(record.articles[0].article_name, "B");
    }

    #[test]
    fn test_parse_without_items_is_empty() {
        let policy = RankingPolicy::default();
        let bodies: [&[u8]; 3] = [br#"{}"#, br#"{"items":[]}"#, br#"{"items":[{}]}"#];
        for body in bodies {
            let record = parse_top_articles(date(2020, 1, 1), body, &policy).unwrap();
            assert!(record.articles.is_empty());
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_matches!(
            parse_top_articles(date(2020, 1, 1), b"<html>", &RankingPolicy::default()),
            Err(Error::UpstreamResponseParse(_))
        );
    }

    #[test]
    fn test_worst_case_latency_counts_every_attempt() {
        let config = WikipediaConfig::default();
        // 4 attempts of 10s, then 250ms + 500ms + 1s of backoff
        assert_eq!(config.worst_case_latency(), Duration::from_millis(41_750));

        let config = WikipediaConfig {
            retries: 0,
            ..WikipediaConfig::default()
        };
        assert_eq!(config.worst_case_latency(), config.timeout);
    }

    #[test]
    fn test_day_url_is_zero_padded() {
        let source = WikipediaSource::new(quick_config("http://example.test/top/".into())).unwrap();
        assert_eq!(
            source.day_url(date(2015, 3, 7)),
            "http://example.test/top/2015/03/07"
        );
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let (url, hits) = serve(vec![(200, TOP_2015_10_10)]).await;
        let source = WikipediaSource::new(quick_config(url)).unwrap();

        let record = source.fetch(date(2015, 10, 10)).await.unwrap();
        assert_eq!(record.articles[0].article_name, "Main_Page");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let (url, hits) = serve(vec![(503, "{}"), (200, TOP_2015_10_10)]).await;
        let source = WikipediaSource::new(quick_config(url)).unwrap();

        let record = source.fetch(date(2015, 10, 10)).await.unwrap();
        assert_eq!(record.articles.len(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_retries() {
        let (url, hits) = serve(vec![(500, "{}")]).await;
        let source = WikipediaSource::new(quick_config(url)).unwrap();

        assert_matches!(
            source.fetch(date(2015, 10, 10)).await,
            Err(Error::UpstreamUnavailable(_))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits) = serve(vec![(404, r#"{"title":"Not found."}"#)]).await;
        let source = WikipediaSource::new(quick_config(url)).unwrap();

        assert_matches!(
            source.fetch(date(2015, 10, 10)).await,
            Err(Error::UpstreamUnavailable(_))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let source = WikipediaSource::new(quick_config(format!("http://{}/top", addr))).unwrap();

        assert_matches!(
            source.fetch(date(2015, 10, 10)).await,
            Err(Error::UpstreamUnavailable(_))
        );
    }
}
