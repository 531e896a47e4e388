//! Merging and ranking of day records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::cache::DayCache;
use crate::domain::{ArticleView, DayRecord, RankingPolicy};
use crate::error::{Error, Result};

/// Sum views per article across `days` and rank the totals.
pub fn merge_days<'a>(
    days: impl IntoIterator<Item = &'a DayRecord>,
    policy: &RankingPolicy,
) -> Vec<ArticleView> {
    let mut totals: HashMap<&'a str, u64> = HashMap::new();
    for day in days {
        for article in &day.articles {
            let total = totals.entry(article.article_name.as_str()).or_insert(0);
            *total = total.saturating_add(article.view_count);
        }
    }

    let mut merged: Vec<ArticleView> = totals
        .into_iter()
        .map(|(name, views)| ArticleView::new(name, views))
        .collect();
    policy.rank(&mut merged);
    merged
}

/// First `limit` entries of a ranked list, or all of them.
pub fn top_n(mut ranked: Vec<ArticleView>, limit: Option<usize>) -> Vec<ArticleView> {
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    ranked
}

/// Resolve `dates` through the day cache with at most `fan_out` lookups in
/// flight, failing on the first error.
///
/// Records come back in the order of `dates`. Each lookup runs as its own
/// task: lookups already in flight when another fails still finish in the
/// background, releasing their locks and caching what they fetched.
pub async fn gather_days(
    cache: &Arc<DayCache>,
    dates: Vec<NaiveDate>,
    fan_out: usize,
) -> Result<Vec<DayRecord>> {
    stream::iter(dates)
        .map(|date| {
            let cache = Arc::clone(cache);
            tokio::spawn(async move { cache.get_day(date).await })
        })
        .buffered(fan_out.max(1))
        .map(|joined| {
            joined.unwrap_or_else(|e| Err(Error::Internal(format!("day lookup task failed: {}", e))))
        })
        .try_collect()
        .await
}
