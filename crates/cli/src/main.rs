#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use byline_api::{BylineApi, FeedDebugInfo, FeedOptions, FeedPage, InProcApi, RemoteSearchOutcome};
use byline_core::{FilterState, PageRequest, SortKey, TimeRange};
use byline_search::{HttpTransport, SearchParams, SearchSession};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "bylinectl", version, about = "Byline content discovery CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Content export to load: a JSON array or NDJSON, one document per line
    #[arg(long = "file", global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the discovery pipeline over an export and print one page
    Feed {
        /// Case-insensitive substring query over title, excerpt, tags and author
        #[arg(long, default_value = "")]
        query: String,
        /// Restrict to a single category slug
        #[arg(long)]
        category: Option<String>,
        /// Comma-separated tag selection; a record passes if it carries any of them
        #[arg(long)]
        tags: Option<String>,
        /// Publication window: all, today, week, month, year
        #[arg(long = "time", default_value = "all")]
        time: TimeRange,
        /// Ranking: newest, oldest, popular, trending, likes, comments, readtime
        #[arg(long, default_value = "newest")]
        sort: SortKey,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long = "per-page", default_value_t = 9)]
        per_page: usize,
        /// Only records flagged as featured
        #[arg(long, action = ArgAction::SetTrue)]
        featured: bool,
        /// Only records bookmarked by --viewer
        #[arg(long, action = ArgAction::SetTrue)]
        bookmarked: bool,
        /// Viewer uid for bookmark filtering
        #[arg(long)]
        viewer: Option<String>,
        /// Age-decay trending scores over a one-week window
        #[arg(long, action = ArgAction::SetTrue)]
        decay: bool,
        /// Report how many records each pipeline stage kept
        #[arg(long, action = ArgAction::SetTrue)]
        explain: bool,
        /// Keep only records readable in at least this many minutes
        #[arg(long = "min-read")]
        min_read: Option<u16>,
        /// Keep only records readable in at most this many minutes
        #[arg(long = "max-read")]
        max_read: Option<u16>,
    },
    /// Top records by decayed trending score
    Trending {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Category and tag catalog with record counts
    Facets,
    /// Query a remote search endpoint with the same facet vocabulary
    Search {
        /// Search phrase
        query: String,
        /// Endpoint base URL, e.g. https://api.example.dev/search
        #[arg(long)]
        endpoint: String,
        #[arg(long, default_value = "newest")]
        sort: SortKey,
        #[arg(long = "time", default_value = "all")]
        time: TimeRange,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        featured: bool,
        #[arg(long = "min-read")]
        min_read: Option<u16>,
        #[arg(long = "max-read")]
        max_read: Option<u16>,
    },
    /// Print the effective runtime configuration
    Stats,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = std::env::var("BYLINE_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("BYLINE_METRICS_ADDR") {
        match addr.parse::<std::net::SocketAddr>() {
            Ok(sock) => {
                let builder =
                    metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock);
                if let Err(e) = builder.install() {
                    warn!(error = %e, "metrics exporter install failed");
                } else {
                    info!(addr = %sock, "metrics exporter listening");
                }
            }
            Err(e) => warn!(error = %e, addr = %addr, "invalid BYLINE_METRICS_ADDR"),
        }
    }
}

/// Parse an export file, replay it through the ingest loop and wait until the
/// drain finishes so the snapshot we query is complete.
async fn load_api(file: Option<&Path>) -> Result<InProcApi> {
    let path = file.context("--file is required for this command")?;
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let docs = byline_store::parse_documents(&text)?;

    let cap = std::env::var("BYLINE_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(2048);
    let (tx, backend) = byline_store::spawn_ingest(cap);
    let sent = byline_store::prime_documents(docs, &tx).await?;
    info!(sent, "primed export documents");

    // One-shot load: close the channel and wait for the ingest loop to drain
    // everything and exit, so the snapshot we query is complete.
    drop(tx);
    if sent > 0 {
        let wait_secs = std::env::var("BYLINE_WAIT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(8);
        let mut rx = backend.subscribe_epoch();
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!("timed out waiting for ingest to settle");
                break;
            }
            let rem = deadline.duration_since(now).min(Duration::from_secs(2));
            match tokio::time::timeout(rem, rx.changed()).await {
                Ok(Ok(())) => {}
                // Watch sender dropped: the loop has exited, all deltas applied.
                Ok(Err(_)) => break,
                Err(_) => {}
            }
        }
    }
    Ok(InProcApi::new(backend))
}

fn split_tags(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Feed {
            query,
            category,
            tags,
            time,
            sort,
            page,
            per_page,
            featured,
            bookmarked,
            viewer,
            decay,
            explain,
            min_read,
            max_read,
        } => {
            if bookmarked && viewer.is_none() {
                warn!("--bookmarked has no effect without --viewer");
            }
            let api = load_api(cli.file.as_deref()).await?;
            let filter = FilterState {
                category,
                query,
                tags: split_tags(tags),
                time_range: time,
                featured_only: featured,
                bookmarked_only: bookmarked,
                min_read_time: min_read,
                max_read_time: max_read,
            };
            let opts = FeedOptions { decay_trending: decay, viewer };
            let resp = api
                .feed(filter, sort, PageRequest::new(page, per_page), opts)
                .await?;
            match cli.output {
                Output::Json => {
                    if explain {
                        #[derive(serde::Serialize)]
                        struct Explained<'a> {
                            page: &'a FeedPage,
                            debug: &'a FeedDebugInfo,
                        }
                        let body = Explained { page: &resp.page, debug: &resp.debug };
                        println!("{}", serde_json::to_string_pretty(&body)?);
                    } else {
                        println!("{}", serde_json::to_string_pretty(&*resp.page)?);
                    }
                }
                Output::Human => {
                    print_feed_page(&resp.page);
                    if explain {
                        eprintln!(
                            "kept: {} total -> {} matched -> {} faceted",
                            resp.debug.total, resp.debug.after_match, resp.debug.after_facets
                        );
                    }
                }
            }
        }
        Commands::Trending { limit } => {
            let api = load_api(cli.file.as_deref()).await?;
            let rows = api.trending(limit).await?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                Output::Human => {
                    println!("{:<40} {:>8} {:>10}", "TITLE", "RAW", "DECAYED");
                    for s in &rows {
                        println!("{:<40} {:>8} {:>10.1}", s.record.title, s.raw, s.decayed);
                    }
                }
            }
        }
        Commands::Facets => {
            let api = load_api(cli.file.as_deref()).await?;
            let catalog = api.facets().await?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&catalog)?),
                Output::Human => {
                    println!("{:<28} {:>6}", "CATEGORY", "COUNT");
                    for c in &catalog.categories {
                        println!("{:<28} {:>6}", c.label, c.count);
                    }
                    println!();
                    println!("{:<28} {:>6}", "TAG", "COUNT");
                    for t in &catalog.tags {
                        println!("{:<28} {:>6}", t.label, t.count);
                    }
                }
            }
        }
        Commands::Search {
            query,
            endpoint,
            sort,
            time,
            tags,
            category,
            featured,
            min_read,
            max_read,
        } => {
            let filter = FilterState {
                category,
                tags: split_tags(tags),
                time_range: time,
                featured_only: featured,
                min_read_time: min_read,
                max_read_time: max_read,
                ..FilterState::default()
            };
            let params = SearchParams::from_state(&query, &filter, sort);
            let transport = HttpTransport::new(endpoint)?;
            let session = SearchSession::new(transport);
            match session.dispatch(params).await {
                RemoteSearchOutcome::Delivered { results, .. } => match cli.output {
                    Output::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                    Output::Human => {
                        println!("{:<26} {:<40} {:>6}", "SLUG", "TITLE", "REL");
                        for hit in &results.results {
                            println!("{:<26} {:<40} {:>6.2}", hit.slug, hit.title, hit.relevance);
                        }
                        println!(
                            "total: {}  avg_relevance: {:.2}  avg_read_time: {:.1}",
                            results.total, results.avg_relevance, results.avg_read_time
                        );
                    }
                },
                RemoteSearchOutcome::Failed { error, results, .. } => {
                    eprintln!("search failed: {error}");
                    if let Output::Json = cli.output {
                        println!("{}", serde_json::to_string_pretty(&results)?);
                    }
                }
                RemoteSearchOutcome::Stale { seq } => {
                    eprintln!("search request {seq} superseded before it finished");
                }
            }
        }
        Commands::Stats => {
            let cap = std::env::var("BYLINE_QUEUE_CAP")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(2048);
            let (_tx, backend) = byline_store::spawn_ingest(cap);
            let api = InProcApi::new(backend);
            let s = api.stats().await?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&s)?),
                Output::Human => {
                    println!("queue_cap:          {}", s.queue_cap);
                    println!("wait_secs:          {}", s.wait_secs);
                    println!("feed_cache_cap:     {}", s.feed_cache_cap);
                    println!("debounce_ms:        {}", s.debounce_ms);
                    println!("http_timeout_secs:  {}", s.http_timeout_secs);
                    println!("trending_floor:     {}", s.trending_floor);
                    println!("metrics_addr:       {}", s.metrics_addr.as_deref().unwrap_or("-"));
                }
            }
        }
    }
    Ok(())
}

fn print_feed_page(page: &FeedPage) {
    println!(
        "page {}/{}  ({} matching records)",
        page.current_page,
        page.total_pages.max(1),
        page.total
    );
    println!("{:<40} {:<16} {:>6} {:>7} {:>5}", "TITLE", "AUTHOR", "AGE", "VIEWS", "MIN");
    for r in &page.items {
        println!(
            "{:<40} {:<16} {:>6} {:>7} {:>5}",
            r.title,
            r.author.username,
            render_age(r.published_ts),
            r.views,
            r.read_time.map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    if !page.window.is_empty() {
        let nav: Vec<String> = page
            .window
            .iter()
            .map(|p| {
                if *p == page.current_page {
                    format!("[{p}]")
                } else {
                    p.to_string()
                }
            })
            .collect();
        println!("pages: {}", nav.join(" "));
    }
}

fn render_age(published_ts: Option<i64>) -> String {
    let Some(ts) = published_ts else { return "-".into() };
    if ts <= 0 {
        return "-".into();
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let mut secs = (now - ts).max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let mins = secs / 60;
    if days > 0 {
        format!("{days}d{hours}h")
    } else if hours > 0 {
        format!("{hours}h{mins}m")
    } else if mins > 0 {
        format!("{mins}m")
    } else {
        format!("{secs}s")
    }
}
