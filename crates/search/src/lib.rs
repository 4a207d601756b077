//! Byline search: the remote-search collaborator.
//! Builds the endpoint's query parameters from local filter state, sequences
//! in-flight requests so only the newest response lands, and debounces
//! keystroke-driven queries.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use byline_core::{FilterState, SortKey, TimeRange};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Query parameters for the remote search endpoint, derived from the same
/// `FilterState`/`SortKey` the local pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub q: String,
    pub sort_by: SortKey,
    pub time_range: TimeRange,
    pub tags: Vec<String>,
    /// The endpoint's name for the category facet.
    pub content_type: Option<String>,
    pub featured_only: bool,
    pub min_read_time: Option<u16>,
    pub max_read_time: Option<u16>,
}

impl SearchParams {
    pub fn from_state(query: &str, filter: &FilterState, sort: SortKey) -> Self {
        Self {
            q: query.trim().to_string(),
            sort_by: sort,
            time_range: filter.time_range,
            tags: filter.tags.clone(),
            content_type: filter.category.clone(),
            featured_only: filter.featured_only,
            min_read_time: filter.min_read_time,
            max_read_time: filter.max_read_time,
        }
    }

    /// Key/value pairs for the query string. Unrestricted facets are left
    /// off the URL entirely.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if !self.q.is_empty() {
            pairs.push(("q", self.q.clone()));
        }
        pairs.push(("sortBy", self.sort_by.as_str().to_string()));
        if self.time_range != TimeRange::All {
            pairs.push(("timeRange", self.time_range.as_str().to_string()));
        }
        if !self.tags.is_empty() {
            pairs.push(("tags", self.tags.join(",")));
        }
        if let Some(ct) = &self.content_type {
            pairs.push(("contentType", ct.clone()));
        }
        if self.featured_only {
            pairs.push(("featuredOnly", "true".to_string()));
        }
        if let Some(min) = self.min_read_time {
            pairs.push(("minReadTime", min.to_string()));
        }
        if let Some(max) = self.max_read_time {
            pairs.push(("maxReadTime", max.to_string()));
        }
        pairs
    }
}

/// One hit from the remote endpoint. Lenient on the wire: absent fields
/// default rather than failing the whole response.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteHit {
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub tags: Vec<String>,
    pub author: String,
    pub relevance: f64,
    pub read_time: Option<u16>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteResults {
    pub results: Vec<RemoteHit>,
    pub total: usize,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
    pub avg_relevance: f64,
    pub avg_read_time: f64,
}

#[async_trait::async_trait]
pub trait SearchTransport: Send + Sync {
    async fn fetch(&self, params: &SearchParams) -> anyhow::Result<RemoteResults>;
}

#[async_trait::async_trait]
impl SearchTransport for std::sync::Arc<dyn SearchTransport> {
    async fn fetch(&self, params: &SearchParams) -> anyhow::Result<RemoteResults> {
        (**self).fetch(params).await
    }
}

/// GET against a fixed endpoint URL with a per-request timeout from
/// `BYLINE_HTTP_TIMEOUT_SECS` (default 10).
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let timeout: u64 = std::env::var("BYLINE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .context("building http client")?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait::async_trait]
impl SearchTransport for HttpTransport {
    async fn fetch(&self, params: &SearchParams) -> anyhow::Result<RemoteResults> {
        let t0 = std::time::Instant::now();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&params.to_query_pairs())
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?
            .error_for_status()
            .context("search endpoint status")?;
        let out: RemoteResults = resp.json().await.context("decoding search response")?;
        metrics::histogram!("search_fetch_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

/// How one dispatched request ended.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Response for the newest request; safe to display.
    Delivered { seq: u64, results: RemoteResults },
    /// A newer request was issued while this one was in flight.
    Stale { seq: u64 },
    /// Transport failure. Carries an empty result set so rendering can show
    /// the error signal without touching local state.
    Failed { seq: u64, error: String, results: RemoteResults },
}

/// Stamps every dispatch with a ticket from a monotonic counter; a response
/// is delivered only while its ticket is still the latest issued.
pub struct SearchSession<T> {
    transport: T,
    seq: AtomicU64,
}

impl<T: SearchTransport> SearchSession<T> {
    pub fn new(transport: T) -> Self {
        Self { transport, seq: AtomicU64::new(0) }
    }

    pub fn latest_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub async fn dispatch(&self, params: SearchParams) -> SearchOutcome {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let res = self.transport.fetch(&params).await;
        let latest = self.seq.load(Ordering::SeqCst);
        if seq != latest {
            metrics::counter!("search_stale_dropped_total", 1u64);
            debug!(seq, latest, "search: dropping stale response");
            return SearchOutcome::Stale { seq };
        }
        match res {
            Ok(results) => SearchOutcome::Delivered { seq, results },
            Err(e) => {
                metrics::counter!("search_failures_total", 1u64);
                warn!(seq, error = %e, "search: request failed");
                SearchOutcome::Failed {
                    seq,
                    error: e.to_string(),
                    results: RemoteResults::default(),
                }
            }
        }
    }
}

/// Collapses bursts of query edits into one emission after a quiet period.
/// Each `schedule` cancels the pending timer and arms a fresh one carrying
/// the newest query.
pub struct Debouncer {
    delay: Duration,
    out: mpsc::Sender<String>,
    stop: Option<oneshot::Sender<()>>,
}

impl Debouncer {
    /// Returns the debouncer plus the receiver where collapsed queries land.
    pub fn new(delay: Duration) -> (Self, mpsc::Receiver<String>) {
        let (out, rx) = mpsc::channel(8);
        (Self { delay, out, stop: None }, rx)
    }

    /// Delay from `BYLINE_DEBOUNCE_MS`, default 300.
    pub fn with_env_delay() -> (Self, mpsc::Receiver<String>) {
        let ms: u64 = std::env::var("BYLINE_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);
        Self::new(Duration::from_millis(ms))
    }

    /// Arm the timer for `query`. Empty or whitespace-only queries cancel
    /// the pending timer without arming a new one.
    pub fn schedule(&mut self, query: &str) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let q = query.trim().to_string();
        if q.is_empty() {
            return;
        }
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        self.stop = Some(stop_tx);
        let out = self.out.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut stop_rx => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = out.send(q).await;
                }
            }
        });
    }

    /// Cancel any pending emission.
    pub fn cancel(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
