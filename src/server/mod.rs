//! HTTP Layer
//!
//! Thin hyper server exposing the top-article queries, plus health and
//! Prometheus endpoints.
//!
//! | Route                                         | Answer                       |
//! |-----------------------------------------------|------------------------------|
//! | `GET /top/month/{year}/{month}[?limit=N]`     | ranked totals for the month  |
//! | `GET /top/week/{year}/{week}[?limit=N]`       | ranked totals for the week   |
//! | `GET /articles/top/day/{year}/{month}/{name}` | the article's best day       |
//! | `GET /healthz`, `/livez`, `/readyz`           | `ok`                         |
//! | `GET /metrics`                                | Prometheus text format       |

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Datelike;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::aggregate::{ArticlePeakDayFinder, PeriodAggregator};
use crate::domain::ArticleView;
use crate::error::{Error, Result};
use crate::metrics::ServiceMetrics;

// =============================================================================
// Routing
// =============================================================================

/// A recognised request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    TopMonth {
        year: i32,
        month: u32,
        limit: Option<usize>,
    },
    TopWeek {
        year: i32,
        week: u32,
        limit: Option<usize>,
    },
    PeakDay {
        year: i32,
        month: u32,
        article_name: String,
    },
    Health,
    Metrics,
}

impl Route {
    /// Match a request path and query string.
    ///
    /// Unknown paths are `NotFound`; known paths with segments that do not
    /// parse are `InvalidRequest`.
    pub fn parse(path: &str, query: Option<&str>) -> Result<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match segments.as_slice() {
            ["top", "month", year, month] => Ok(Route::TopMonth {
                year: number(year)?,
                month: number(month)?,
                limit: limit(query)?,
            }),
            ["top", "week", year, week] => Ok(Route::TopWeek {
                year: number(year)?,
                week: number(week)?,
                limit: limit(query)?,
            }),
            // Article titles may themselves contain '/'
            ["articles", "top", "day", year, month, name @ ..] if !name.is_empty() => {
                let raw = name.join("/");
                let article_name = urlencoding::decode(&raw)
                    .map_err(|e| Error::InvalidRequest(format!("article name {}: {}", raw, e)))?
                    .into_owned();
                if article_name.is_empty() {
                    return Err(Error::InvalidRequest("empty article name".to_string()));
                }
                Ok(Route::PeakDay {
                    year: number(year)?,
                    month: number(month)?,
                    article_name,
                })
            }
            ["healthz"] | ["livez"] | ["readyz"] => Ok(Route::Health),
            ["metrics"] => Ok(Route::Metrics),
            _ => Err(Error::NotFound(format!("no route for {}", path))),
        }
    }
}

fn number<T: std::str::FromStr>(segment: &str) -> Result<T> {
    segment
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("{:?} is not a valid number", segment)))
}

fn limit(query: Option<&str>) -> Result<Option<usize>> {
    let Some(query) = query else {
        return Ok(None);
    };
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "limit" {
            let value = urlencoding::decode(value)
                .map_err(|e| Error::InvalidRequest(format!("limit: {}", e)))?;
            return number(&value).map(Some);
        }
    }
    Ok(None)
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
struct MonthResponse {
    year: i32,
    month: u32,
    article_counts: Vec<ArticleView>,
}

#[derive(Debug, Serialize)]
struct WeekResponse {
    year: i32,
    week: u32,
    article_counts: Vec<ArticleView>,
}

#[derive(Debug, Serialize)]
struct PeakResponse {
    year: i32,
    month: u32,
    day: u32,
    article_name: String,
    article_count: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: &'static str,
    status: u16,
}

/// Status and client-facing message for a failed request.
pub fn error_status(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::InvalidPeriod(_) | Error::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, "The input was not valid.")
        }
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "The requested data was not found."),
        e if e.is_upstream() => (StatusCode::GATEWAY_TIMEOUT, "Error fetching from Wikipedia."),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error."),
    }
}

fn respond(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, HeaderValue::from_static("application/json"), body),
        Err(e) => failure(&Error::from(e)),
    }
}

fn failure(err: &Error) -> Response<Full<Bytes>> {
    let (status, message) = error_status(err);
    if err.is_retryable() {
        warn!("Request failed, retry may succeed: {}", err);
    } else if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    error_body(status, message)
}

fn error_body(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let body = ErrorResponse {
        message,
        status: status.as_u16(),
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| message.as_bytes().to_vec());
    respond(status, HeaderValue::from_static("application/json"), bytes)
}

// =============================================================================
// Handlers
// =============================================================================

/// Components the handlers answer from
pub struct AppState {
    pub aggregator: Arc<PeriodAggregator>,
    pub finder: Arc<ArticlePeakDayFinder>,
    pub metrics: ServiceMetrics,
}

impl AppState {
    /// Answer one request.
    pub async fn handle(&self, method: &Method, path: &str, query: Option<&str>) -> Response<Full<Bytes>> {
        if method != Method::GET {
            debug!("Rejecting {} {}", method, path);
            return error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.");
        }

        match Route::parse(path, query) {
            Ok(route) => match self.dispatch(route).await {
                Ok(response) => response,
                Err(e) => failure(&e),
            },
            Err(e) => failure(&e),
        }
    }

    async fn dispatch(&self, route: Route) -> Result<Response<Full<Bytes>>> {
        match route {
            Route::TopMonth { year, month, limit } => {
                let article_counts = self.aggregator.top_for_month(year, month, limit).await?;
                Ok(json(
                    StatusCode::OK,
                    &MonthResponse {
                        year,
                        month,
                        article_counts,
                    },
                ))
            }
            Route::TopWeek { year, week, limit } => {
                let article_counts = self.aggregator.top_for_week(year, week, limit).await?;
                Ok(json(
                    StatusCode::OK,
                    &WeekResponse {
                        year,
                        week,
                        article_counts,
                    },
                ))
            }
            Route::PeakDay {
                year,
                month,
                article_name,
            } => {
                let peak = self.finder.peak_day(year, month, &article_name).await?;
                Ok(json(
                    StatusCode::OK,
                    &PeakResponse {
                        year: peak.date.year(),
                        month: peak.date.month(),
                        day: peak.date.day(),
                        article_name: peak.article_name,
                        article_count: peak.view_count,
                    },
                ))
            }
            Route::Health => Ok(respond(
                StatusCode::OK,
                HeaderValue::from_static("text/plain"),
                "ok",
            )),
            Route::Metrics => {
                let (content_type, body) = self.metrics.encode()?;
                let content_type = HeaderValue::from_str(&content_type)
                    .unwrap_or_else(|_| HeaderValue::from_static("text/plain"));
                Ok(respond(StatusCode::OK, content_type, body))
            }
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Serve connections from `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!("HTTP server listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("HTTP server shutting down");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let state = Arc::clone(&state);
                async move {
                    let response = state
                        .handle(req.method(), req.uri().path(), req.uri().query())
                        .await;
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection from {} closed with error: {}", peer, e);
            }
        });
    }
}
