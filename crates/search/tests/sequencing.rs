use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byline_core::{FilterState, SortKey};
use byline_search::{
    Debouncer, RemoteResults, SearchOutcome, SearchParams, SearchSession, SearchTransport,
};

fn params(q: &str) -> SearchParams {
    SearchParams::from_state(q, &FilterState::default(), SortKey::Newest)
}

/// First call parks on the paused clock; later calls return immediately.
struct SlowThenFast {
    calls: AtomicU64,
}

#[async_trait::async_trait]
impl SearchTransport for SlowThenFast {
    async fn fetch(&self, params: &SearchParams) -> anyhow::Result<RemoteResults> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let mut out = RemoteResults::default();
        out.total = params.q.len();
        Ok(out)
    }
}

struct FailingTransport;

#[async_trait::async_trait]
impl SearchTransport for FailingTransport {
    async fn fetch(&self, _params: &SearchParams) -> anyhow::Result<RemoteResults> {
        anyhow::bail!("connection refused")
    }
}

#[tokio::test(start_paused = true)]
async fn older_inflight_response_is_dropped_as_stale() {
    let session = Arc::new(SearchSession::new(SlowThenFast { calls: AtomicU64::new(0) }));

    let first = tokio::spawn({
        let s = Arc::clone(&session);
        async move { s.dispatch(params("ru")).await }
    });
    tokio::task::yield_now().await;

    let second = tokio::spawn({
        let s = Arc::clone(&session);
        async move { s.dispatch(params("rust")).await }
    });
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_millis(200)).await;

    let o1 = first.await.unwrap();
    let o2 = second.await.unwrap();
    assert!(matches!(o1, SearchOutcome::Stale { seq: 1 }));
    match o2 {
        SearchOutcome::Delivered { seq, results } => {
            assert_eq!(seq, 2);
            assert_eq!(results.total, "rust".len());
        }
        other => panic!("expected delivery, got {other:?}"),
    }
    assert_eq!(session.latest_seq(), 2);
}

#[tokio::test]
async fn failure_surfaces_with_empty_results() {
    let session = SearchSession::new(FailingTransport);
    match session.dispatch(params("rust")).await {
        SearchOutcome::Failed { seq, error, results } => {
            assert_eq!(seq, 1);
            assert!(error.contains("connection refused"));
            assert!(results.results.is_empty());
            assert_eq!(results.total, 0);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn debounce_collapses_bursts_to_the_latest_query() {
    let (mut deb, mut rx) = Debouncer::new(Duration::from_millis(300));

    deb.schedule("r");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(100)).await;

    deb.schedule("ru");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(100)).await;

    deb.schedule("rust");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(301)).await;

    assert_eq!(rx.recv().await.as_deref(), Some("rust"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn debounce_quiet_period_fires_once_per_burst() {
    let (mut deb, mut rx) = Debouncer::new(Duration::from_millis(300));

    deb.schedule("first");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(301)).await;
    assert_eq!(rx.recv().await.as_deref(), Some("first"));

    deb.schedule("second");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(301)).await;
    assert_eq!(rx.recv().await.as_deref(), Some("second"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn empty_query_cancels_without_firing() {
    let (mut deb, mut rx) = Debouncer::new(Duration::from_millis(300));

    deb.schedule("rust");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(100)).await;

    deb.schedule("   ");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn explicit_cancel_stops_the_pending_timer() {
    let (mut deb, mut rx) = Debouncer::new(Duration::from_millis(300));

    deb.schedule("rust");
    tokio::task::yield_now().await;
    deb.cancel();
    // Let the timer task observe the cancel before the clock moves.
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(rx.try_recv().is_err());
}
