//! Byline feed: the discovery pipeline over record snapshots.
//! Match, facet, rank, paginate; pure given its inputs.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::sync::Arc;

use byline_core::{FeedSnapshot, FilterState, PageRequest, Record, SortKey, TimeRange};
use chrono::{Months, TimeZone, Utc};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Hours over which the trending decay runs before hitting its floor.
pub const DECAY_WINDOW_HOURS: f64 = 168.0;

/// Per-view evaluation knobs that are not facet state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeedOptions {
    /// Use the decayed trending score for the trending sort.
    pub decay_trending: bool,
    /// Viewer id for the bookmarked-only facet; absent viewer makes that
    /// facet a no-op.
    pub viewer: Option<String>,
}

/// Stage counters for one evaluation, in funnel order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedDebugInfo {
    pub total: usize,
    pub after_match: usize,
    pub after_facets: usize,
}

/// One rendered page: the slice plus everything navigation controls need.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedPage {
    pub items: Vec<Record>,
    /// Filtered count before paging.
    pub total: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub window: Vec<usize>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub raw: u64,
    pub decayed: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FacetCount {
    pub key: String,
    pub label: String,
    pub count: usize,
}

/// Category and tag inventory of a snapshot, for discovery surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FacetCatalog {
    pub categories: Vec<FacetCount>,
    pub tags: Vec<FacetCount>,
}

// ---- Matcher ----

/// Case-insensitive substring test against title, excerpt, each tag, and
/// author username. Empty or whitespace-only queries match everything.
/// Boolean only; no match-quality ranking.
pub fn matches_query(rec: &Record, query: &str) -> bool {
    let q = query.trim();
    if q.is_empty() {
        return true;
    }
    let q = q.to_lowercase();
    rec.title.to_lowercase().contains(&q)
        || rec.excerpt.to_lowercase().contains(&q)
        || rec.tags.iter().any(|t| t.to_lowercase().contains(&q))
        || rec.author.username.to_lowercase().contains(&q)
}

// ---- FacetFilter ----

fn range_cutoff(range: TimeRange, now_ts: i64) -> Option<i64> {
    let now = Utc.timestamp_opt(now_ts, 0).single()?;
    let cut = match range {
        TimeRange::All => return None,
        TimeRange::Today => now - chrono::Duration::days(1),
        TimeRange::Week => now - chrono::Duration::days(7),
        TimeRange::Month => now.checked_sub_months(Months::new(1))?,
        TimeRange::Year => now.checked_sub_months(Months::new(12))?,
    };
    Some(cut.timestamp())
}

/// Independent facet predicates ANDed together. Every facet at its default
/// restricts nothing. A restricted time range excludes records that were
/// never published.
pub fn passes_facets(rec: &Record, f: &FilterState, viewer: Option<&str>, now_ts: i64) -> bool {
    if let Some(slug) = f.category.as_deref() {
        if !rec.has_category(slug) {
            return false;
        }
    }
    if !f.tags.is_empty() && !f.tags.iter().any(|t| rec.tags.iter().any(|rt| rt == t)) {
        return false;
    }
    if let Some(cut) = range_cutoff(f.time_range, now_ts) {
        match rec.published_ts {
            Some(ts) if ts > cut => {}
            _ => return false,
        }
    }
    if f.featured_only && !rec.featured {
        return false;
    }
    if f.bookmarked_only {
        if let Some(v) = viewer {
            if !rec.is_bookmarked_by(v) {
                return false;
            }
        }
    }
    let rt = rec.read_time.unwrap_or(5);
    if f.min_read_time.map(|min| rt < min).unwrap_or(false) {
        return false;
    }
    if f.max_read_time.map(|max| rt > max).unwrap_or(false) {
        return false;
    }
    true
}

// ---- TrendingScore ----

/// Raw engagement score: `views + 2*likes + 3*comments`.
pub fn trending_score(rec: &Record) -> u64 {
    rec.views + 2 * rec.likes as u64 + 3 * rec.comments as u64
}

/// Decay floor multiplier, overridable via `BYLINE_TRENDING_FLOOR`.
pub fn decay_floor() -> f64 {
    std::env::var("BYLINE_TRENDING_FLOOR")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.1)
}

/// Raw score multiplied by `max(floor, 1 - hours_since/168)`: linear decay
/// to the floor over one week. Records with no publish date sit at the floor.
pub fn decayed_trending_score(rec: &Record, now_ts: i64) -> f64 {
    decayed_trending_score_with_floor(rec, now_ts, decay_floor())
}

pub fn decayed_trending_score_with_floor(rec: &Record, now_ts: i64, floor: f64) -> f64 {
    let raw = trending_score(rec) as f64;
    let mult = match rec.published_ts {
        Some(ts) => {
            let hours = (now_ts - ts) as f64 / 3600.0;
            (1.0 - hours / DECAY_WINDOW_HOURS).max(floor)
        }
        None => floor,
    };
    raw * mult
}

// ---- Sorter ----

fn cmp_date_desc(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_date_asc(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn sort_indices(
    records: &[Record],
    mut idx: Vec<usize>,
    key: SortKey,
    decay: bool,
    now_ts: i64,
) -> Vec<usize> {
    match key {
        SortKey::Newest => {
            idx.sort_by(|&a, &b| cmp_date_desc(records[a].published_ts, records[b].published_ts))
        }
        SortKey::Oldest => {
            idx.sort_by(|&a, &b| cmp_date_asc(records[a].published_ts, records[b].published_ts))
        }
        SortKey::Popular => idx.sort_by(|&a, &b| records[b].views.cmp(&records[a].views)),
        SortKey::Trending => {
            if decay {
                let floor = decay_floor();
                let scores: Vec<f64> = records
                    .iter()
                    .map(|r| decayed_trending_score_with_floor(r, now_ts, floor))
                    .collect();
                idx.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            } else {
                idx.sort_by(|&a, &b| trending_score(&records[b]).cmp(&trending_score(&records[a])));
            }
        }
        SortKey::Likes => idx.sort_by(|&a, &b| records[b].likes.cmp(&records[a].likes)),
        SortKey::Comments => idx.sort_by(|&a, &b| records[b].comments.cmp(&records[a].comments)),
        SortKey::ReadTime => idx.sort_by(|&a, &b| {
            records[a]
                .read_time
                .unwrap_or(0)
                .cmp(&records[b].read_time.unwrap_or(0))
        }),
    }
    idx
}

/// Stable ranking of `records` by `key`; returns indices into the input in
/// sorted order. The input itself is never reordered, and equal keys keep
/// their input order.
pub fn rank(records: &[Record], key: SortKey, decay: bool, now_ts: i64) -> Vec<usize> {
    sort_indices(records, (0..records.len()).collect(), key, decay, now_ts)
}

// ---- Paginator ----

/// Bounded page-number window for navigation controls: at most 5 entries,
/// pinned to the edges near them and centered on the current page otherwise.
pub fn page_window(total_pages: usize, current: usize) -> Vec<usize> {
    if total_pages <= 5 {
        (1..=total_pages).collect()
    } else if current <= 3 {
        (1..=5).collect()
    } else if current >= total_pages - 2 {
        (total_pages - 4..=total_pages).collect()
    } else {
        (current - 2..=current + 2).collect()
    }
}

fn clamp_page(requested: usize, total_pages: usize) -> usize {
    requested.max(1).min(total_pages.max(1))
}

// ---- Full pipeline ----

/// Run the whole chain over a snapshot and produce one page. Out-of-range
/// page requests clamp silently.
pub fn evaluate(
    snap: &FeedSnapshot,
    filter: &FilterState,
    sort: SortKey,
    page: PageRequest,
    opts: &FeedOptions,
    now_ts: i64,
) -> (FeedPage, FeedDebugInfo) {
    let started = std::time::Instant::now();
    let total = snap.records.len();

    let mut keep: Vec<usize> = (0..snap.records.len())
        .filter(|&i| matches_query(&snap.records[i], &filter.query))
        .collect();
    let after_match = keep.len();

    let viewer = opts.viewer.as_deref();
    keep.retain(|&i| passes_facets(&snap.records[i], filter, viewer, now_ts));
    let after_facets = keep.len();

    let order = sort_indices(&snap.records, keep, sort, opts.decay_trending, now_ts);

    let filtered = order.len();
    let per = page.per_page.max(1);
    let total_pages = (filtered + per - 1) / per;
    let current = clamp_page(page.page, total_pages);
    let start = (current - 1) * per;
    let items: Vec<Record> = order
        .iter()
        .skip(start)
        .take(per)
        .map(|&i| snap.records[i].clone())
        .collect();
    let window = page_window(total_pages, current);

    let dbg = FeedDebugInfo { total, after_match, after_facets };
    debug!(
        total,
        after_match,
        after_facets,
        page = current,
        "feed: evaluated"
    );
    metrics::histogram!("feed_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
    (
        FeedPage { items, total: filtered, total_pages, current_page: current, window },
        dbg,
    )
}

/// Top records by decayed trending score, for badges and rails.
pub fn top_trending(snap: &FeedSnapshot, limit: usize, now_ts: i64) -> Vec<ScoredRecord> {
    let floor = decay_floor();
    let mut scored: Vec<ScoredRecord> = snap
        .records
        .iter()
        .map(|r| ScoredRecord {
            record: r.clone(),
            raw: trending_score(r),
            decayed: decayed_trending_score_with_floor(r, now_ts, floor),
        })
        .collect();
    scored.sort_by(|a, b| b.decayed.total_cmp(&a.decayed));
    scored.truncate(limit);
    scored
}

/// Count categories and tags across a snapshot, most frequent first.
pub fn facet_catalog(snap: &FeedSnapshot) -> FacetCatalog {
    let mut cats: FxHashMap<String, (String, usize)> = FxHashMap::default();
    let mut tags: FxHashMap<String, usize> = FxHashMap::default();
    for r in &snap.records {
        for c in &r.categories {
            let e = cats
                .entry(c.slug.clone())
                .or_insert_with(|| (c.name.clone(), 0));
            e.1 += 1;
        }
        for t in &r.tags {
            *tags.entry(t.clone()).or_default() += 1;
        }
    }
    let mut categories: Vec<FacetCount> = cats
        .into_iter()
        .map(|(slug, (name, count))| FacetCount { key: slug, label: name, count })
        .collect();
    categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    let mut tag_counts: Vec<FacetCount> = tags
        .into_iter()
        .map(|(t, count)| FacetCount { label: t.clone(), key: t, count })
        .collect();
    tag_counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    FacetCatalog { categories, tags: tag_counts }
}

// ---- Memoized evaluation ----

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    epoch: u64,
    filter: FilterState,
    sort: SortKey,
    page: PageRequest,
    opts: FeedOptions,
}

/// Memoizes pipeline evaluations for one snapshot epoch so unrelated UI
/// updates do not force a re-sort. Evict-all at capacity; cleared whenever
/// the epoch moves.
pub struct FeedCache {
    cap: usize,
    epoch: u64,
    map: FxHashMap<CacheKey, (Arc<FeedPage>, FeedDebugInfo)>,
}

impl FeedCache {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), epoch: 0, map: FxHashMap::default() }
    }

    /// Capacity from `BYLINE_FEED_CACHE_CAP`, default 64.
    pub fn with_env_capacity() -> Self {
        let cap = std::env::var("BYLINE_FEED_CACHE_CAP")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(64);
        Self::new(cap)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Cached `evaluate`. `now_ts` is not part of the key; entries live at
    /// most one epoch.
    pub fn evaluate(
        &mut self,
        snap: &FeedSnapshot,
        filter: &FilterState,
        sort: SortKey,
        page: PageRequest,
        opts: &FeedOptions,
        now_ts: i64,
    ) -> (Arc<FeedPage>, FeedDebugInfo) {
        if snap.epoch != self.epoch {
            self.map.clear();
            self.epoch = snap.epoch;
        }
        let key = CacheKey {
            epoch: snap.epoch,
            filter: filter.clone(),
            sort,
            page,
            opts: opts.clone(),
        };
        if let Some((hit, dbg)) = self.map.get(&key) {
            metrics::counter!("feed_cache_hits_total", 1u64);
            return (Arc::clone(hit), dbg.clone());
        }
        metrics::counter!("feed_cache_misses_total", 1u64);
        let (page_out, dbg) = evaluate(snap, filter, sort, page, opts, now_ts);
        let page_out = Arc::new(page_out);
        if self.map.len() >= self.cap {
            self.map.clear();
        }
        self.map.insert(key, (Arc::clone(&page_out), dbg.clone()));
        (page_out, dbg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byline_core::{AuthorRef, CategoryRef, Uid};
    use smallvec::SmallVec;

    const NOW: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    fn uid(n: u8) -> Uid {
        let mut u = [0u8; 16];
        u[0] = n;
        u
    }

    fn rec(n: u8, title: &str) -> Record {
        Record {
            uid: uid(n),
            slug: format!("post-{n}"),
            title: title.to_string(),
            excerpt: String::new(),
            tags: SmallVec::new(),
            categories: SmallVec::new(),
            author: AuthorRef::default(),
            published_ts: Some(NOW - HOUR),
            updated_ts: None,
            views: 0,
            likes: 0,
            comments: 0,
            bookmarks: SmallVec::new(),
            read_time: None,
            featured: false,
        }
    }

    fn tagged(n: u8, title: &str, tags: &[&str]) -> Record {
        let mut r = rec(n, title);
        r.tags = tags.iter().map(|t| t.to_string()).collect();
        r
    }

    fn snap(records: Vec<Record>) -> FeedSnapshot {
        FeedSnapshot { epoch: 1, records }
    }

    #[test]
    fn matcher_hits_title_excerpt_tags_and_author() {
        let mut r = rec(1, "Understanding Ownership");
        r.excerpt = "Borrowing explained".to_string();
        r.tags = ["memory", "rust-lang"].iter().map(|s| s.to_string()).collect();
        r.author.username = "ferris".to_string();

        assert!(matches_query(&r, "OWNERSHIP"));
        assert!(matches_query(&r, "borrow"));
        assert!(matches_query(&r, "RUST-lang"));
        assert!(matches_query(&r, "Ferris"));
        assert!(!matches_query(&r, "golang"));
    }

    #[test]
    fn matcher_empty_and_whitespace_match_everything() {
        let r = rec(1, "anything");
        assert!(matches_query(&r, ""));
        assert!(matches_query(&r, "   "));
    }

    #[test]
    fn facets_default_is_identity() {
        let records = vec![rec(1, "a"), rec(2, "b"), rec(3, "c")];
        let f = FilterState::default();
        assert!(records.iter().all(|r| passes_facets(r, &f, None, NOW)));
    }

    #[test]
    fn category_facet_matches_slug() {
        let mut r = rec(1, "a");
        r.categories.push(CategoryRef { name: "Web Dev".into(), slug: "web-dev".into() });
        let mut f = FilterState::default();
        f.category = Some("web-dev".to_string());
        assert!(passes_facets(&r, &f, None, NOW));
        f.category = Some("databases".to_string());
        assert!(!passes_facets(&r, &f, None, NOW));
    }

    #[test]
    fn tag_facet_is_any_match() {
        let r = tagged(1, "a", &["rust", "wasm"]);
        let mut f = FilterState::default();
        f.tags = vec!["go".to_string(), "wasm".to_string()];
        assert!(passes_facets(&r, &f, None, NOW));
        f.tags = vec!["go".to_string(), "python".to_string()];
        assert!(!passes_facets(&r, &f, None, NOW));
    }

    #[test]
    fn time_range_excludes_old_and_undated() {
        let mut fresh = rec(1, "fresh");
        fresh.published_ts = Some(NOW - 2 * HOUR);
        let mut stale = rec(2, "stale");
        stale.published_ts = Some(NOW - 10 * 24 * HOUR);
        let mut undated = rec(3, "undated");
        undated.published_ts = None;

        let mut f = FilterState::default();
        f.time_range = TimeRange::Week;
        assert!(passes_facets(&fresh, &f, None, NOW));
        assert!(!passes_facets(&stale, &f, None, NOW));
        assert!(!passes_facets(&undated, &f, None, NOW));

        f.time_range = TimeRange::All;
        assert!(passes_facets(&undated, &f, None, NOW));
    }

    #[test]
    fn bookmarked_facet_needs_viewer() {
        let mut r = rec(1, "a");
        r.bookmarks.push("ada".to_string());
        let mut f = FilterState::default();
        f.bookmarked_only = true;
        // No viewer: facet never excludes.
        assert!(passes_facets(&r, &f, None, NOW));
        assert!(passes_facets(&rec(2, "b"), &f, None, NOW));
        // With a viewer it does.
        assert!(passes_facets(&r, &f, Some("ada"), NOW));
        assert!(!passes_facets(&rec(2, "b"), &f, Some("ada"), NOW));
    }

    #[test]
    fn read_time_bounds_are_inclusive_with_default_five() {
        let mut f = FilterState::default();
        f.min_read_time = Some(5);
        f.max_read_time = Some(10);
        let mut r = rec(1, "a");
        r.read_time = Some(5);
        assert!(passes_facets(&r, &f, None, NOW));
        r.read_time = Some(10);
        assert!(passes_facets(&r, &f, None, NOW));
        r.read_time = Some(11);
        assert!(!passes_facets(&r, &f, None, NOW));
        // Absent read time counts as 5 minutes.
        r.read_time = None;
        assert!(passes_facets(&r, &f, None, NOW));
        f.min_read_time = Some(6);
        assert!(!passes_facets(&r, &f, None, NOW));
    }

    #[test]
    fn trending_score_worked_example() {
        let mut r = rec(1, "a");
        r.views = 100;
        r.likes = 2;
        r.comments = 3;
        assert_eq!(trending_score(&r), 113);
    }

    #[test]
    fn trending_score_monotone_in_each_counter() {
        let mut base = rec(1, "a");
        base.views = 10;
        base.likes = 4;
        base.comments = 2;
        let s0 = trending_score(&base);
        let mut v = base.clone();
        v.views += 1;
        assert!(trending_score(&v) > s0);
        let mut l = base.clone();
        l.likes += 1;
        assert!(trending_score(&l) > s0);
        let mut c = base.clone();
        c.comments += 1;
        assert!(trending_score(&c) > s0);
    }

    #[test]
    fn decay_is_strictly_decreasing_until_the_floor() {
        let mut r = rec(1, "a");
        r.views = 100;
        r.published_ts = Some(NOW);
        let fresh = decayed_trending_score(&r, NOW);
        r.published_ts = Some(NOW - 24 * HOUR);
        let day_old = decayed_trending_score(&r, NOW);
        r.published_ts = Some(NOW - 100 * HOUR);
        let older = decayed_trending_score(&r, NOW);
        assert!(fresh > day_old && day_old > older);

        // From 168h on the multiplier is pinned at 0.1.
        r.published_ts = Some(NOW - 168 * HOUR);
        let at_week = decayed_trending_score(&r, NOW);
        r.published_ts = Some(NOW - 1000 * HOUR);
        let ancient = decayed_trending_score(&r, NOW);
        assert!((at_week - 10.0).abs() < 1e-9);
        assert!((ancient - 10.0).abs() < 1e-9);

        // No publish date sits at the floor too.
        r.published_ts = None;
        assert!((decayed_trending_score(&r, NOW) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let mut a = rec(1, "a");
        a.views = 50;
        let mut b = rec(2, "b");
        b.views = 50;
        let mut c = rec(3, "c");
        c.views = 70;
        let records = vec![a, b, c];
        let order = rank(&records, SortKey::Popular, false, NOW);
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn missing_dates_sort_last_both_directions() {
        let mut dated = rec(1, "dated");
        dated.published_ts = Some(NOW - HOUR);
        let mut older = rec(2, "older");
        older.published_ts = Some(NOW - 2 * HOUR);
        let mut undated = rec(3, "undated");
        undated.published_ts = None;
        let records = vec![undated, dated, older];

        assert_eq!(rank(&records, SortKey::Newest, false, NOW), vec![1, 2, 0]);
        assert_eq!(rank(&records, SortKey::Oldest, false, NOW), vec![2, 1, 0]);
    }

    #[test]
    fn read_time_sorts_ascending_with_missing_as_zero() {
        let mut quick = rec(1, "quick");
        quick.read_time = Some(3);
        let mut long = rec(2, "long");
        long.read_time = Some(20);
        let mut unknown = rec(3, "unknown");
        unknown.read_time = None;
        let records = vec![quick, long, unknown];
        assert_eq!(rank(&records, SortKey::ReadTime, false, NOW), vec![2, 0, 1]);
    }

    #[test]
    fn rank_does_not_touch_the_input() {
        let records = vec![rec(2, "b"), rec(1, "a")];
        let before: Vec<u8> = records.iter().map(|r| r.uid[0]).collect();
        let _ = rank(&records, SortKey::Newest, false, NOW);
        let after: Vec<u8> = records.iter().map(|r| r.uid[0]).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn window_cases() {
        assert_eq!(page_window(0, 1), Vec::<usize>::new());
        assert_eq!(page_window(1, 1), vec![1]);
        assert_eq!(page_window(5, 4), vec![1, 2, 3, 4, 5]);
        assert_eq!(page_window(6, 2), vec![1, 2, 3, 4, 5]);
        assert_eq!(page_window(6, 6), vec![2, 3, 4, 5, 6]);
        assert_eq!(page_window(100, 50), vec![48, 49, 50, 51, 52]);
        assert_eq!(page_window(100, 3), vec![1, 2, 3, 4, 5]);
        assert_eq!(page_window(100, 98), vec![96, 97, 98, 99, 100]);
        assert!(page_window(100, 42).len() <= 5);
    }

    #[test]
    fn evaluate_clamps_out_of_range_pages() {
        let records: Vec<Record> = (1..=7).map(|n| rec(n, "post")).collect();
        let s = snap(records);
        let f = FilterState::default();
        let opts = FeedOptions::default();

        let (page, _) = evaluate(&s, &f, SortKey::Newest, PageRequest::new(99, 3), &opts, NOW);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 3);
        assert_eq!(page.items.len(), 1);

        let (page, _) = evaluate(&s, &f, SortKey::Newest, PageRequest { page: 0, per_page: 3 }, &opts, NOW);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn evaluate_empty_result_keeps_invariants() {
        let s = snap(vec![rec(1, "only")]);
        let mut f = FilterState::default();
        f.query = "no such thing".to_string();
        let (page, dbg) = evaluate(&s, &f, SortKey::Newest, PageRequest::default(), &FeedOptions::default(), NOW);
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.current_page, 1);
        assert!(page.items.is_empty());
        assert!(page.window.is_empty());
        assert_eq!(dbg.total, 1);
        assert_eq!(dbg.after_match, 0);
    }

    #[test]
    fn evaluate_page_count_is_min_of_per_page_and_remaining() {
        let records: Vec<Record> = (1..=10).map(|n| rec(n, "post")).collect();
        let s = snap(records);
        let f = FilterState::default();
        let (page, _) = evaluate(&s, &f, SortKey::Newest, PageRequest::new(4, 3), &FeedOptions::default(), NOW);
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn facet_catalog_counts_and_orders() {
        let mut a = tagged(1, "a", &["rust", "wasm"]);
        a.categories.push(CategoryRef { name: "Systems".into(), slug: "systems".into() });
        let mut b = tagged(2, "b", &["rust"]);
        b.categories.push(CategoryRef { name: "Systems".into(), slug: "systems".into() });
        let c = tagged(3, "c", &["zig"]);
        let catalog = facet_catalog(&snap(vec![a, b, c]));

        assert_eq!(catalog.categories.len(), 1);
        assert_eq!(catalog.categories[0].count, 2);
        assert_eq!(catalog.tags[0].key, "rust");
        assert_eq!(catalog.tags[0].count, 2);
        // Ties break alphabetically.
        assert_eq!(catalog.tags[1].key, "wasm");
        assert_eq!(catalog.tags[2].key, "zig");
    }

    #[test]
    fn top_trending_orders_by_decayed_score() {
        let mut hot = rec(1, "hot");
        hot.views = 1000;
        hot.published_ts = Some(NOW - HOUR);
        let mut cold = rec(2, "cold");
        cold.views = 1000;
        cold.published_ts = Some(NOW - 2000 * HOUR);
        let out = top_trending(&snap(vec![cold, hot]), 10, NOW);
        assert_eq!(out[0].record.uid[0], 1);
        assert_eq!(out[0].raw, out[1].raw);
        assert!(out[0].decayed > out[1].decayed);
    }
}
