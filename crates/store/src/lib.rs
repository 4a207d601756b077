//! Byline store: coalescing ingest and snapshot publication.
//!
//! The content store collaborator emits raw documents; this crate shapes them
//! into `Record`s, coalesces bursts by uid, and publishes immutable
//! epoch-stamped snapshots behind an `ArcSwap` for pipeline readers.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use byline_core::{AuthorRef, CategoryRef, DocDelta, DocDeltaKind, FeedSnapshot, Record, Uid};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Derive a stable 16-byte uid from a store document id. UUID ids parse
/// directly; anything else (slugs, object ids) gets FNV-1a folded into both
/// halves so distinct ids stay distinct in practice.
pub fn uid_from_str(id: &str) -> Uid {
    if let Ok(u) = uuid::Uuid::parse_str(id) {
        return *u.as_bytes();
    }
    let mut h: u64 = 0xcbf29ce484222325;
    for b in id.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    // Second pass with a different seed for the high half.
    let mut h2: u64 = 0x84222325cbf29ce4;
    for b in id.as_bytes().iter().rev() {
        h2 ^= *b as u64;
        h2 = h2.wrapping_mul(0x100000001b3);
    }
    let mut uid = [0u8; 16];
    uid[..8].copy_from_slice(&h.to_be_bytes());
    uid[8..].copy_from_slice(&h2.to_be_bytes());
    uid
}

fn doc_id(raw: &serde_json::Value) -> Option<&str> {
    raw.get("id")
        .or_else(|| raw.get("_id"))
        .or_else(|| raw.get("slug"))
        .and_then(|v| v.as_str())
}

/// Build an upsert/remove delta from a raw store document.
pub fn delta_from_doc(raw: serde_json::Value, kind: DocDeltaKind) -> anyhow::Result<DocDelta> {
    let id = doc_id(&raw).ok_or_else(|| anyhow::anyhow!("document missing id/_id/slug"))?;
    let uid = uid_from_str(id);
    Ok(DocDelta { uid, kind, raw })
}

// ---- Shaping ----

/// Counters may arrive as a number or as an array of user ids.
fn count_or_len(v: Option<&serde_json::Value>) -> u64 {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::Array(a)) => a.len() as u64,
        _ => 0,
    }
}

fn parse_ts(v: Option<&serde_json::Value>) -> Option<i64> {
    match v {
        Some(serde_json::Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp()),
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}

fn string_list(v: Option<&serde_json::Value>) -> SmallVec<[String; 8]> {
    let mut out = SmallVec::new();
    if let Some(arr) = v.and_then(|v| v.as_array()) {
        for item in arr {
            if let Some(s) = item.as_str() {
                out.push(s.to_string());
            }
        }
    }
    out
}

fn category_list(v: Option<&serde_json::Value>) -> SmallVec<[CategoryRef; 4]> {
    let mut out = SmallVec::new();
    if let Some(arr) = v.and_then(|v| v.as_array()) {
        for item in arr {
            match item {
                serde_json::Value::String(s) => out.push(CategoryRef {
                    name: s.clone(),
                    slug: s.to_lowercase(),
                }),
                serde_json::Value::Object(o) => {
                    let name = o.get("name").and_then(|v| v.as_str()).unwrap_or("");
                    let slug = o
                        .get("slug")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| name.to_lowercase());
                    if !name.is_empty() || !slug.is_empty() {
                        out.push(CategoryRef { name: name.to_string(), slug });
                    }
                }
                _ => {}
            }
        }
    }
    out
}

fn author_ref(v: Option<&serde_json::Value>) -> AuthorRef {
    match v {
        Some(serde_json::Value::String(s)) => AuthorRef { username: s.clone(), avatar: None },
        Some(serde_json::Value::Object(o)) => AuthorRef {
            username: o
                .get("username")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            avatar: o.get("avatar").and_then(|v| v.as_str()).map(|s| s.to_string()),
        },
        _ => AuthorRef::default(),
    }
}

/// Shape a raw store document into a `Record`. Absent or malformed fields
/// fall back instead of erroring: counters to 0, tag/category arrays to
/// empty, dates to `None`.
pub fn shape_record(uid: Uid, raw: &serde_json::Value) -> Record {
    let slug = doc_id(raw).unwrap_or("").to_string();
    Record {
        uid,
        slug,
        title: raw
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        excerpt: raw
            .get("excerpt")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tags: string_list(raw.get("tags")),
        categories: category_list(raw.get("categories")),
        author: author_ref(raw.get("author")),
        published_ts: parse_ts(raw.get("publishedAt")),
        updated_ts: parse_ts(raw.get("updatedAt")),
        views: raw.get("views").and_then(|v| v.as_u64()).unwrap_or(0),
        likes: count_or_len(raw.get("likes")).min(u32::MAX as u64) as u32,
        comments: count_or_len(raw.get("comments")).min(u32::MAX as u64) as u32,
        bookmarks: string_list(raw.get("bookmarks")).into_iter().collect(),
        read_time: raw
            .get("readTime")
            .and_then(|v| v.as_u64())
            .map(|m| m.min(u16::MAX as u64) as u16),
        featured: raw.get("featured").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

// ---- Ingest primitives ----

/// Coalescing queue keyed by uid with FIFO order and fixed capacity.
pub struct Coalescer {
    map: FxHashMap<Uid, DocDelta>,
    order: VecDeque<Uid>,
    cap: usize,
    dropped: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap, dropped: 0 }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn push(&mut self, d: DocDelta) {
        let uid = d.uid;
        if !self.map.contains_key(&uid) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.dropped += 1;
                    metrics::counter!("store_ingest_dropped_total", 1u64);
                }
            }
            self.order.push_back(uid);
        }
        self.map.insert(uid, d);
    }

    /// Drain all currently coalesced deltas in arrival order.
    pub fn drain_ready(&mut self) -> Vec<DocDelta> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(uid) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&uid) {
                out.push(d);
            }
        }
        out
    }
}

/// Builds `FeedSnapshot` instances from deltas. Keeps insertion order (the
/// collection's "original relative order" that the pipeline preserves) and a
/// uid index for O(1) upserts.
pub struct SnapshotBuilder {
    epoch: u64,
    records: Vec<Record>,
    index: FxHashMap<Uid, usize>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { epoch: 0, records: Vec::new(), index: FxHashMap::default() }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply a batch of deltas. Each batch bumps the epoch once.
    pub fn apply(&mut self, batch: Vec<DocDelta>) {
        for d in batch {
            match d.kind {
                DocDeltaKind::Upserted => {
                    let rec = shape_record(d.uid, &d.raw);
                    match self.index.get(&d.uid) {
                        Some(&i) => self.records[i] = rec,
                        None => {
                            self.index.insert(d.uid, self.records.len());
                            self.records.push(rec);
                        }
                    }
                }
                DocDeltaKind::Removed => {
                    if let Some(i) = self.index.remove(&d.uid) {
                        self.records.remove(i);
                        for v in self.index.values_mut() {
                            if *v > i {
                                *v -= 1;
                            }
                        }
                    }
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<FeedSnapshot> {
        Arc::new(FeedSnapshot { epoch: self.epoch, records: self.records.clone() })
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for readers to access the current snapshot and subscribe to swaps.
pub struct BackendHandle {
    snap: Arc<ArcSwap<FeedSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl BackendHandle {
    pub fn current(&self) -> Arc<FeedSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }
}

/// Spawn an ingest loop consuming deltas and swapping snapshots. Returns a
/// sender for deltas and a handle for reads.
pub fn spawn_ingest(cap: usize) -> (mpsc::Sender<DocDelta>, BackendHandle) {
    let cap = cap.max(1);
    let (tx, mut rx) = mpsc::channel::<DocDelta>(cap);
    let snap = Arc::new(ArcSwap::from_pointee(FeedSnapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut builder = SnapshotBuilder::new();
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(8));
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(d) => {
                            // A bulk load outruns the ticker; flush at
                            // capacity instead of letting push evict a
                            // pending delta.
                            if coalescer.len() >= cap {
                                let batch = coalescer.drain_ready();
                                builder.apply(batch);
                                let next = builder.freeze();
                                publish(&snap_clone, &epoch_tx, next);
                            }
                            coalescer.push(d);
                        }
                        None => {
                            debug!("delta channel closed; draining and exiting ingest loop");
                            let batch = coalescer.drain_ready();
                            if !batch.is_empty() {
                                builder.apply(batch);
                                let next = builder.freeze();
                                publish(&snap_clone, &epoch_tx, next);
                            }
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let batch = coalescer.drain_ready();
                    if !batch.is_empty() {
                        builder.apply(batch);
                        let next = builder.freeze();
                        publish(&snap_clone, &epoch_tx, next);
                    }
                }
            }
        }
        info!("ingest loop stopped");
    });

    (tx, BackendHandle { snap, epoch_rx })
}

fn publish(
    slot: &Arc<ArcSwap<FeedSnapshot>>,
    epoch_tx: &watch::Sender<u64>,
    next: Arc<FeedSnapshot>,
) {
    let epoch = next.epoch;
    metrics::gauge!("store_records", next.records.len() as f64);
    slot.store(next);
    let _ = epoch_tx.send(epoch);
}

// ---- Bulk load ----

/// Parse a content-store export: either a JSON array of documents or NDJSON
/// (one document per line).
pub fn parse_documents(text: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let docs: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
        return Ok(docs);
    }
    let mut out = Vec::new();
    for (no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(v) => out.push(v),
            Err(e) => {
                warn!(line = no + 1, error = %e, "skipping malformed document line");
            }
        }
    }
    Ok(out)
}

/// Send one upsert delta per document into the ingest channel. Returns the
/// number sent; documents without any id are skipped with a warning.
pub async fn prime_documents(
    docs: Vec<serde_json::Value>,
    tx: &mpsc::Sender<DocDelta>,
) -> anyhow::Result<usize> {
    let mut sent = 0usize;
    for raw in docs {
        match delta_from_doc(raw, DocDeltaKind::Upserted) {
            Ok(d) => {
                tx.send(d).await.map_err(|_| anyhow::anyhow!("ingest channel closed"))?;
                sent += 1;
            }
            Err(e) => warn!(error = %e, "skipping document"),
        }
    }
    Ok(sent)
}
