//! Service Metrics
//!
//! Prometheus counters for cache lookups, upstream fetches, and lock
//! contention, kept in a per-service registry and exposed on `/metrics`.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Which store a lookup was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Day,
    Period,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Day => "day",
            CacheKind::Period => "period",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters shared by every cache component of one service instance.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    cache_lookups: IntCounterVec,
    upstream_fetches: IntCounterVec,
    lock_contention: IntCounterVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_lookups = IntCounterVec::new(
            Opts::new("wikitop_cache_lookups_total", "Cache lookups by outcome"),
            &["cache", "outcome"],
        )
        .map_err(metrics_error)?;
        let upstream_fetches = IntCounterVec::new(
            Opts::new("wikitop_upstream_fetches_total", "Upstream day fetches"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let lock_contention = IntCounterVec::new(
            Opts::new(
                "wikitop_lock_contention_total",
                "Lock acquisitions lost to another holder",
            ),
            &["cache"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(cache_lookups.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(upstream_fetches.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(lock_contention.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            cache_lookups,
            upstream_fetches,
            lock_contention,
        })
    }

    pub fn record_lookup(&self, cache: CacheKind, hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        self.cache_lookups
            .with_label_values(&[cache.as_str(), outcome])
            .inc();
    }

    pub fn record_upstream(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.upstream_fetches.with_label_values(&[outcome]).inc();
    }

    pub fn record_contention(&self, cache: CacheKind) {
        self.lock_contention
            .with_label_values(&[cache.as_str()])
            .inc();
    }

    pub fn lookups(&self, cache: CacheKind, hit: bool) -> u64 {
        let outcome = if hit { "hit" } else { "miss" };
        self.cache_lookups
            .with_label_values(&[cache.as_str(), outcome])
            .get()
    }

    pub fn upstream_fetches(&self, ok: bool) -> u64 {
        let outcome = if ok { "ok" } else { "error" };
        self.upstream_fetches.with_label_values(&[outcome]).get()
    }

    pub fn contention(&self, cache: CacheKind) -> u64 {
        self.lock_contention
            .with_label_values(&[cache.as_str()])
            .get()
    }

    /// Render all metrics in the Prometheus text format.
    ///
    /// Returns the content type alongside the encoded body.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registry error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = ServiceMetrics::new().unwrap();
        assert_eq!(metrics.lookups(CacheKind::Day, true), 0);
        assert_eq!(metrics.upstream_fetches(true), 0);
        assert_eq!(metrics.contention(CacheKind::Period), 0);
    }

    #[test]
    fn test_record_and_encode() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_lookup(CacheKind::Day, false);
        metrics.record_lookup(CacheKind::Day, true);
        metrics.record_lookup(CacheKind::Day, true);
        metrics.record_upstream(true);
        metrics.record_contention(CacheKind::Day);

        assert_eq!(metrics.lookups(CacheKind::Day, true), 2);
        assert_eq!(metrics.lookups(CacheKind::Day, false), 1);

        let (content_type, body) = metrics.encode().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("wikitop_cache_lookups_total"));
        assert!(body.contains("wikitop_upstream_fetches_total"));
        assert!(body.contains("wikitop_lock_contention_total"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ServiceMetrics::new().unwrap();
        let b = ServiceMetrics::new().unwrap();
        a.record_upstream(false);
        assert_eq!(a.upstream_fetches(false), 1);
        assert_eq!(b.upstream_fetches(false), 0);
    }
}
