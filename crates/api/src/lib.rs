//! Byline public API façade (in-process).
//!
//! This crate defines the stable trait and types consumers (CLI, rendering
//! layers) depend on. Implementations can be in-process (direct) or remote
//! (RPC) later.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use byline_core::{FeedSnapshot, FilterState, PageRequest, SortKey};
use byline_feed::FeedCache;
use byline_search::{HttpTransport, SearchParams, SearchSession, SearchTransport};
use byline_store::BackendHandle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

pub use byline_feed::{FacetCatalog, FacetCount, FeedDebugInfo, FeedOptions, FeedPage, ScoredRecord};
pub use byline_search::SearchOutcome as RemoteSearchOutcome;
pub use byline_search::{RemoteHit, RemoteResults};

/// Stats and runtime configuration exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Stats {
    pub queue_cap: usize,
    pub wait_secs: u64,
    pub feed_cache_cap: usize,
    pub debounce_ms: u64,
    pub http_timeout_secs: u64,
    pub trending_floor: f64,
    pub metrics_addr: Option<String>,
}

/// Ingest state attached to responses. `partial` is set until the first
/// snapshot has been published.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseMeta {
    pub partial: bool,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct SnapshotResponse {
    pub data: FeedSnapshot,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub page: Arc<FeedPage>,
    pub debug: FeedDebugInfo,
    pub meta: ResponseMeta,
}

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum BylineError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("upstream: {0}")]
    Upstream(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type BylineResult<T> = Result<T, BylineError>;

/// Declarative Byline API surface.
#[async_trait::async_trait]
pub trait BylineApi: Send + Sync {
    /// Current record snapshot plus ingest metadata.
    async fn snapshot(&self) -> BylineResult<SnapshotResponse>;

    /// Memoized pipeline evaluation over the current snapshot.
    async fn feed(
        &self,
        filter: FilterState,
        sort: SortKey,
        page: PageRequest,
        opts: FeedOptions,
    ) -> BylineResult<FeedResponse>;

    /// Top records by decayed trending score, for badges and rails.
    async fn trending(&self, limit: usize) -> BylineResult<Vec<ScoredRecord>>;

    /// Category and tag inventory of the current snapshot.
    async fn facets(&self) -> BylineResult<FacetCatalog>;

    /// Sequenced call to the remote search endpoint. Stale and failed
    /// outcomes are explicit variants, not errors.
    async fn search_remote(
        &self,
        query: &str,
        filter: FilterState,
        sort: SortKey,
    ) -> BylineResult<RemoteSearchOutcome>;

    /// Runtime stats and limits.
    async fn stats(&self) -> BylineResult<Stats>;
}

// ----------------- In-process implementation -----------------

/// In-process implementation over a live store backend.
pub struct InProcApi {
    backend: BackendHandle,
    cache: Mutex<FeedCache>,
    session: Option<SearchSession<Arc<dyn SearchTransport>>>,
}

impl InProcApi {
    pub fn new(backend: BackendHandle) -> Self {
        Self {
            backend,
            cache: Mutex::new(FeedCache::with_env_capacity()),
            session: None,
        }
    }

    /// Attach a remote search endpoint (full URL of the search route).
    pub fn with_endpoint(backend: BackendHandle, endpoint: &str) -> anyhow::Result<Self> {
        let transport: Arc<dyn SearchTransport> = Arc::new(HttpTransport::new(endpoint)?);
        Ok(Self::with_transport(backend, transport))
    }

    pub fn with_transport(backend: BackendHandle, transport: Arc<dyn SearchTransport>) -> Self {
        Self {
            backend,
            cache: Mutex::new(FeedCache::with_env_capacity()),
            session: Some(SearchSession::new(transport)),
        }
    }

    fn meta(snap: &FeedSnapshot) -> ResponseMeta {
        ResponseMeta { partial: snap.epoch == 0, epoch: snap.epoch }
    }
}

#[async_trait::async_trait]
impl BylineApi for InProcApi {
    async fn snapshot(&self) -> BylineResult<SnapshotResponse> {
        let t0 = Instant::now();
        let snap = self.backend.current();
        info!(records = snap.records.len(), epoch = snap.epoch, took_ms = %t0.elapsed().as_millis(), "api: snapshot ok");
        Ok(SnapshotResponse { data: (*snap).clone(), meta: Self::meta(&snap) })
    }

    async fn feed(
        &self,
        filter: FilterState,
        sort: SortKey,
        page: PageRequest,
        opts: FeedOptions,
    ) -> BylineResult<FeedResponse> {
        let t0 = Instant::now();
        info!(query = %filter.query, sort = sort.as_str(), page = page.page, "api: feed start");
        metrics::counter!("api_feed_requests_total", 1u64);
        let snap = self.backend.current();
        let now_ts = Utc::now().timestamp();
        let (page_out, dbg_info) = self
            .cache
            .lock()
            .await
            .evaluate(&snap, &filter, sort, page, &opts, now_ts);
        info!(
            total = dbg_info.total,
            matched = dbg_info.after_facets,
            pages = page_out.total_pages,
            took_ms = %t0.elapsed().as_millis(),
            "api: feed ok"
        );
        Ok(FeedResponse { page: page_out, debug: dbg_info, meta: Self::meta(&snap) })
    }

    async fn trending(&self, limit: usize) -> BylineResult<Vec<ScoredRecord>> {
        let t0 = Instant::now();
        let snap = self.backend.current();
        let out = byline_feed::top_trending(&snap, limit, Utc::now().timestamp());
        info!(count = out.len(), took_ms = %t0.elapsed().as_millis(), "api: trending ok");
        Ok(out)
    }

    async fn facets(&self) -> BylineResult<FacetCatalog> {
        let t0 = Instant::now();
        let snap = self.backend.current();
        let catalog = byline_feed::facet_catalog(&snap);
        info!(
            categories = catalog.categories.len(),
            tags = catalog.tags.len(),
            took_ms = %t0.elapsed().as_millis(),
            "api: facets ok"
        );
        Ok(catalog)
    }

    async fn search_remote(
        &self,
        query: &str,
        filter: FilterState,
        sort: SortKey,
    ) -> BylineResult<RemoteSearchOutcome> {
        let t0 = Instant::now();
        info!(query = %query, "api: search start");
        metrics::counter!("api_search_requests_total", 1u64);
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| BylineError::Validation("no search endpoint configured".into()))?;
        let params = SearchParams::from_state(query, &filter, sort);
        let out = session.dispatch(params).await;
        info!(took_ms = %t0.elapsed().as_millis(), "api: search done");
        Ok(out)
    }

    async fn stats(&self) -> BylineResult<Stats> {
        let t0 = Instant::now();
        let queue_cap = std::env::var("BYLINE_QUEUE_CAP").ok().and_then(|s| s.parse().ok()).unwrap_or(2048);
        let wait_secs = std::env::var("BYLINE_WAIT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(8);
        let feed_cache_cap = std::env::var("BYLINE_FEED_CACHE_CAP").ok().and_then(|s| s.parse().ok()).unwrap_or(64);
        let debounce_ms = std::env::var("BYLINE_DEBOUNCE_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(300);
        let http_timeout_secs = std::env::var("BYLINE_HTTP_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(10);
        let trending_floor = byline_feed::decay_floor();
        let metrics_addr = std::env::var("BYLINE_METRICS_ADDR").ok();
        let stats = Stats {
            queue_cap,
            wait_secs,
            feed_cache_cap,
            debounce_ms,
            http_timeout_secs,
            trending_floor,
            metrics_addr,
        };
        info!(took_ms = %t0.elapsed().as_millis(), "api: stats ready");
        Ok(stats)
    }
}

// ----------------- Mock implementation -----------------

/// Simple in-memory mock implementation for consumers' tests.
pub struct MockApi {
    pub snapshot: Option<FeedSnapshot>,
    pub page: Option<FeedPage>,
    pub debug: FeedDebugInfo,
    pub trending: Vec<ScoredRecord>,
    pub catalog: FacetCatalog,
    pub outcome: Option<RemoteSearchOutcome>,
    pub stats: Stats,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            snapshot: None,
            page: None,
            debug: FeedDebugInfo { total: 0, after_match: 0, after_facets: 0 },
            trending: Vec::new(),
            catalog: FacetCatalog { categories: Vec::new(), tags: Vec::new() },
            outcome: None,
            stats: Stats::default(),
        }
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BylineApi for MockApi {
    async fn snapshot(&self) -> BylineResult<SnapshotResponse> {
        let snap = self
            .snapshot
            .clone()
            .ok_or_else(|| BylineError::NotFound("no snapshot".into()))?;
        let meta = ResponseMeta { partial: snap.epoch == 0, epoch: snap.epoch };
        Ok(SnapshotResponse { data: snap, meta })
    }

    async fn feed(
        &self,
        _filter: FilterState,
        _sort: SortKey,
        _page: PageRequest,
        _opts: FeedOptions,
    ) -> BylineResult<FeedResponse> {
        let page = self
            .page
            .clone()
            .ok_or_else(|| BylineError::NotFound("no page configured".into()))?;
        Ok(FeedResponse {
            page: Arc::new(page),
            debug: self.debug.clone(),
            meta: ResponseMeta::default(),
        })
    }

    async fn trending(&self, limit: usize) -> BylineResult<Vec<ScoredRecord>> {
        Ok(self.trending.iter().take(limit).cloned().collect())
    }

    async fn facets(&self) -> BylineResult<FacetCatalog> {
        Ok(self.catalog.clone())
    }

    async fn search_remote(
        &self,
        _query: &str,
        _filter: FilterState,
        _sort: SortKey,
    ) -> BylineResult<RemoteSearchOutcome> {
        self.outcome
            .clone()
            .ok_or_else(|| BylineError::Internal("no outcome configured".into()))
    }

    async fn stats(&self) -> BylineResult<Stats> {
        Ok(self.stats.clone())
    }
}
