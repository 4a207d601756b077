//! Byline core types: records, filter/sort state, snapshots.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type Uid = [u8; 16];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocDeltaKind {
    Upserted,
    Removed,
}

/// One change from the content store: a raw document plus its fate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocDelta {
    pub uid: Uid,
    pub kind: DocDeltaKind,
    /// Raw document as the store emitted it; shaped into a `Record` at ingest.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryRef {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorRef {
    pub username: String,
    pub avatar: Option<String>,
}

/// Shaped article held in memory. Counters are already folded to counts;
/// bookmarks stay as a set so the bookmarked-only facet can test membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub uid: Uid,
    /// The store's display id (slug or object id), kept for rendering links.
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub tags: SmallVec<[String; 8]>,
    pub categories: SmallVec<[CategoryRef; 4]>,
    pub author: AuthorRef,
    /// Unix seconds; `None` = never published (never sorts as newest).
    pub published_ts: Option<i64>,
    pub updated_ts: Option<i64>,
    pub views: u64,
    pub likes: u32,
    pub comments: u32,
    pub bookmarks: SmallVec<[String; 4]>,
    /// Estimated minutes; `None` falls back per call site (5 in the facet
    /// filter, 0 in comparators).
    pub read_time: Option<u16>,
    pub featured: bool,
}

impl Record {
    pub fn has_category(&self, slug: &str) -> bool {
        self.categories.iter().any(|c| c.slug == slug)
    }

    pub fn is_bookmarked_by(&self, viewer: &str) -> bool {
        self.bookmarks.iter().any(|b| b == viewer)
    }
}

/// Immutable, epoch-stamped view of the content set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedSnapshot {
    pub epoch: u64,
    pub records: Vec<Record>,
}

// ---- Pipeline inputs ----

/// Publication-age facet. Cutoffs are relative to "now" at evaluation time:
/// day/week are exact durations, month/year are calendar-aware.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    All,
    Today,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::All => "all",
            TimeRange::Today => "today",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(TimeRange::All),
            "today" => Ok(TimeRange::Today),
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            "year" => Ok(TimeRange::Year),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Newest,
    Oldest,
    Popular,
    Trending,
    Likes,
    Comments,
    ReadTime,
}

impl SortKey {
    /// Wire form used by the remote search endpoint (`sortBy=`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Newest => "newest",
            SortKey::Oldest => "oldest",
            SortKey::Popular => "popular",
            SortKey::Trending => "trending",
            SortKey::Likes => "likes",
            SortKey::Comments => "comments",
            SortKey::ReadTime => "readTime",
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" => Ok(SortKey::Newest),
            "oldest" => Ok(SortKey::Oldest),
            "popular" => Ok(SortKey::Popular),
            "trending" => Ok(SortKey::Trending),
            "likes" => Ok(SortKey::Likes),
            "comments" => Ok(SortKey::Comments),
            "readtime" | "read-time" => Ok(SortKey::ReadTime),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

/// Facet selection owned by the consuming view and passed in per invocation.
/// The default restricts nothing; the pipeline never mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FilterState {
    /// `None` = "all"; `Some(slug)` keeps records whose category set has it.
    pub category: Option<String>,
    pub query: String,
    /// ANY-match: a record passes if its tag set intersects this one.
    pub tags: Vec<String>,
    pub time_range: TimeRange,
    pub featured_only: bool,
    pub bookmarked_only: bool,
    /// Inclusive read-time bounds in minutes; `None` = unbounded.
    pub min_read_time: Option<u16>,
    pub max_read_time: Option<u16>,
}

/// 1-based page request. `per_page` is fixed per view (6–9 in practice).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page: per_page.max(1) }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 9 }
    }
}

pub mod prelude {
    pub use super::{
        AuthorRef, CategoryRef, DocDelta, DocDeltaKind, FeedSnapshot, FilterState, PageRequest,
        Record, SortKey, TimeRange, Uid,
    };
}
