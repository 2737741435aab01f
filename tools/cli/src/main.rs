//! Lectio CLI - Command line scripture reader.
//!
//! Reads and searches translations, manages bookmarks and highlights
//! offline, and pushes pending changes to a sync server.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lectio_common::{Testament, TranslationId};
use lectio_content::{
    CacheConfig, CacheRequest, Catalog, DirLoader, HttpLoader, TranslationCache, TranslationLoader,
};
use lectio_search::{BookFilter, SearchEngine, SearchOptions};
use lectio_storage::{create_default_registry, Schema};
use lectio_sync::{
    BackgroundSync, BackgroundSyncConfig, Bookmark, BookmarkFilter, EntityKind, FlushReport,
    Highlight, HighlightFilter, HttpTransport, OfflineSyncStore, SyncConfig, SyncTag,
    SyncTransport, SyncTrigger,
};

use crate::config::{AppConfig, ContentSource};

#[derive(Parser)]
#[command(name = "lectio")]
#[command(about = "Lectio - Offline scripture reader")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/lectio/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the translation source (URL or directory).
    #[arg(long, global = true)]
    content: Option<String>,

    /// Override the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the sync endpoint.
    #[arg(long, global = true)]
    sync_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available translations.
    Translations,

    /// Print one chapter.
    Read {
        /// Translation id, e.g. "kjv".
        translation: String,
        book: String,
        chapter: u32,
    },

    /// Search loaded translations.
    Search {
        query: String,

        /// Translations to search (repeatable).
        #[arg(short, long = "translation", required = true)]
        translations: Vec<String>,

        /// Restrict to one book.
        #[arg(short, long, conflicts_with = "testament")]
        book: Option<String>,

        /// Restrict to one testament.
        #[arg(long, value_enum)]
        testament: Option<TestamentArg>,

        /// Maximum results (default from config).
        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        case_sensitive: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage bookmarks.
    #[command(subcommand)]
    Bookmark(BookmarkCommand),

    /// Manage highlights.
    #[command(subcommand)]
    Highlight(HighlightCommand),

    /// Show changes waiting to be synced.
    Outbox {
        /// Only one kind: "bookmark" or "highlight".
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Push pending changes to the sync server.
    Sync {
        /// Keep running and flush on this period (seconds) until Ctrl-C.
        #[arg(short, long)]
        watch: Option<u64>,
    },

    /// Load translations and report the approximate cache size.
    CacheSize {
        /// Translations to load first (repeatable).
        #[arg(short, long = "translation")]
        translations: Vec<String>,
    },
}

#[derive(Subcommand)]
enum BookmarkCommand {
    /// Bookmark a verse.
    Add {
        book: String,
        chapter: u32,
        verse: u32,

        #[arg(short, long)]
        note: Option<String>,

        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Remove a bookmark by id (e.g. "John-3-16").
    Remove { id: String },

    /// Set or clear (when omitted) the note on a bookmark.
    Note {
        id: String,
        note: Option<String>,
    },

    /// List bookmarks, newest first.
    List {
        #[arg(short, long)]
        book: Option<String>,

        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Remove every bookmark.
    Clear,
}

#[derive(Subcommand)]
enum HighlightCommand {
    /// Highlight a passage of a verse.
    Add {
        book: String,
        chapter: u32,
        verse: u32,
        text: String,

        #[arg(short, long, default_value = "yellow")]
        color: String,
    },

    /// Remove a highlight by id.
    Remove { id: String },

    /// Change a highlight's color.
    Color { id: String, color: String },

    /// List highlights in canonical order.
    List {
        #[arg(short, long)]
        book: Option<String>,

        /// Requires --book.
        #[arg(long, requires = "book")]
        chapter: Option<u32>,
    },

    /// Remove every highlight.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum TestamentArg {
    Old,
    New,
}

impl From<TestamentArg> for Testament {
    fn from(arg: TestamentArg) -> Self {
        match arg {
            TestamentArg::Old => Testament::Old,
            TestamentArg::New => Testament::New,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Bookmark,
    Highlight,
}

impl From<KindArg> for EntityKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Bookmark => EntityKind::Bookmark,
            KindArg::Highlight => EntityKind::Highlight,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(content) = cli.content {
        config.content_source = Some(content);
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }
    if let Some(endpoint) = cli.sync_endpoint {
        config.sync_endpoint = Some(endpoint);
    }

    match cli.command {
        Commands::Translations => cmd_translations(),

        Commands::Read {
            translation,
            book,
            chapter,
        } => cmd_read(&config, &translation, &book, chapter).await,

        Commands::Search {
            query,
            translations,
            book,
            testament,
            limit,
            case_sensitive,
            json,
        } => {
            let filter = match (book, testament) {
                (Some(book), _) => Some(BookFilter::Book(book)),
                (None, Some(testament)) => Some(BookFilter::Testament(testament.into())),
                (None, None) => None,
            };
            let options = SearchOptions::new()
                .with_limit(limit.unwrap_or(config.search_limit))
                .with_case_sensitive(case_sensitive);
            let options = match filter {
                Some(filter) => options.with_book_filter(filter),
                None => options,
            };
            cmd_search(&config, &query, &translations, options, json).await
        }

        Commands::Bookmark(command) => cmd_bookmark(&config, command).await,

        Commands::Highlight(command) => cmd_highlight(&config, command).await,

        Commands::Outbox { kind } => cmd_outbox(&config, kind.map(Into::into)).await,

        Commands::Sync { watch } => match watch {
            Some(0) => bail!("--watch period must be at least 1 second"),
            Some(secs) => cmd_sync_watch(&config, Duration::from_secs(secs)).await,
            None => cmd_sync(&config).await,
        },

        Commands::CacheSize { translations } => cmd_cache_size(&config, &translations).await,
    }
}

/// Build the translation cache over the configured source.
fn open_cache(config: &AppConfig) -> Result<TranslationCache> {
    let loader: Arc<dyn TranslationLoader> = match config.content_source()? {
        ContentSource::Http(url) => {
            Arc::new(HttpLoader::new(url).context("Failed to create content loader")?)
        }
        ContentSource::Dir(root) => Arc::new(DirLoader::new(root)),
    };
    debug!(loader = loader.name(), "content loader ready");

    let cache_config = match config.max_resident {
        Some(max) => CacheConfig::new().with_max_resident(max),
        None => CacheConfig::new(),
    };
    Ok(TranslationCache::new(loader, cache_config))
}

/// Load translations concurrently; every load shares the cache.
async fn load_translations(
    config: &AppConfig,
    cache: &TranslationCache,
    ids: &[String],
) -> Result<Vec<TranslationId>> {
    let timeout = Duration::from_secs(config.load_timeout_secs);
    let ids = ids
        .iter()
        .map(|id| TranslationId::new(id.as_str()))
        .collect::<lectio_common::Result<Vec<_>>>()
        .context("Invalid translation id")?;

    let mut tasks = Vec::new();
    for id in &ids {
        let cache = cache.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            cache.ensure_loaded_with_timeout(&id, timeout).await
        }));
    }
    for (id, task) in ids.iter().zip(tasks) {
        let data = task
            .await
            .context("Load task panicked")?
            .with_context(|| format!("Failed to load translation {}", id))?;
        info!(translation = %id, verses = data.verse_count(), "translation loaded");
    }

    Ok(ids)
}

/// Open the local store with the configured backend.
async fn open_store(config: &AppConfig) -> Result<OfflineSyncStore> {
    let registry = create_default_registry();
    let backend = config.store_backend.as_str();

    let store_config = if backend == "sqlite" {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        json!({ "path": config.database_path().to_string_lossy() })
    } else {
        json!({})
    };

    let kv = registry
        .open(backend, Schema::reader(), &store_config)
        .with_context(|| format!("Failed to open '{}' store", backend))?;

    let sync_config = SyncConfig::new()
        .with_max_retries(config.max_retries)
        .with_flush_concurrency(config.flush_concurrency);
    OfflineSyncStore::open(kv, sync_config)
        .await
        .context("Failed to open offline store")
}

fn open_transport(config: &AppConfig) -> Result<HttpTransport> {
    let transport = HttpTransport::new(config.sync_endpoint()?)
        .context("Failed to create sync transport")?;
    Ok(match &config.sync_token {
        Some(token) => transport.with_token(token),
        None => transport,
    })
}

fn cmd_translations() -> Result<()> {
    let catalog = Catalog::builtin()?;
    for translation in catalog.iter() {
        println!(
            "  {:<6} {:<8} {} ({})",
            translation.id.as_str(),
            translation.abbreviation,
            translation.display_name,
            translation.language
        );
    }
    Ok(())
}

async fn cmd_read(config: &AppConfig, translation: &str, book: &str, chapter: u32) -> Result<()> {
    let cache = open_cache(config)?;
    let ids = load_translations(config, &cache, &[translation.to_string()]).await?;

    let verses = cache.get_chapter(&ids[0], book, chapter)?;
    if verses.is_empty() {
        bail!("{} {} not found in {}", book, chapter, ids[0]);
    }

    println!("{} {}", verses[0].book, chapter);
    for verse in verses {
        println!("{:>3} {}", verse.number, verse.text);
    }
    Ok(())
}

async fn cmd_search(
    config: &AppConfig,
    query: &str,
    translations: &[String],
    options: SearchOptions,
    as_json: bool,
) -> Result<()> {
    let cache = open_cache(config)?;
    let ids = load_translations(config, &cache, translations).await?;

    let engine = SearchEngine::new(cache);
    let results = engine
        .search(query, &options.with_translations(ids))
        .context("Search failed")?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for result in &results {
        println!(
            "  {:<18} [{}] {:.2}  {}",
            result.verse.reference(),
            result.translation_id,
            result.score,
            mark_spans(&result.verse.text, &result.highlight_spans)
        );
    }
    println!("{} result(s)", results.len());
    Ok(())
}

/// Wrap highlight spans in `[` `]`.
fn mark_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * 2);
    let mut cursor = 0;
    for &(start, end) in spans {
        let (Some(before), Some(matched)) = (text.get(cursor..start), text.get(start..end)) else {
            continue;
        };
        out.push_str(before);
        out.push('[');
        out.push_str(matched);
        out.push(']');
        cursor = end;
    }
    out.push_str(text.get(cursor..).unwrap_or_default());
    out
}

async fn cmd_bookmark(config: &AppConfig, command: BookmarkCommand) -> Result<()> {
    let store = open_store(config).await?;

    match command {
        BookmarkCommand::Add {
            book,
            chapter,
            verse,
            note,
            collection,
        } => {
            let mut bookmark = Bookmark::new(book, chapter, verse);
            if let Some(note) = note {
                bookmark = bookmark.with_note(note);
            }
            if let Some(collection) = collection {
                bookmark = bookmark.with_collection(collection);
            }
            let id = bookmark.id.clone();
            let reference = bookmark.reference();
            store
                .add_bookmark(bookmark)
                .await
                .context("Failed to add bookmark")?;
            println!("Bookmarked {} ({})", reference, id);
        }

        BookmarkCommand::Remove { id } => {
            if store.remove_bookmark(&id).await? {
                println!("Removed bookmark {}", id);
            } else {
                println!("No bookmark {}", id);
            }
        }

        BookmarkCommand::Note { id, note } => {
            let bookmark = store
                .update_bookmark_note(&id, note)
                .await
                .context("Failed to update bookmark")?;
            match &bookmark.note {
                Some(note) => println!("{}: {}", bookmark.reference(), note),
                None => println!("{}: note cleared", bookmark.reference()),
            }
        }

        BookmarkCommand::List { book, collection } => {
            let filter = BookmarkFilter { book, collection };
            let bookmarks = store.list_bookmarks(&filter).await?;
            if bookmarks.is_empty() {
                println!("No bookmarks.");
            }
            for bookmark in bookmarks {
                println!(
                    "  {:<18} [{}] {}",
                    bookmark.reference(),
                    bookmark.collection,
                    bookmark.note.as_deref().unwrap_or("")
                );
            }
        }

        BookmarkCommand::Clear => {
            let removed = store.clear_bookmarks().await?;
            println!("Removed {} bookmark(s)", removed);
        }
    }

    Ok(())
}

async fn cmd_highlight(config: &AppConfig, command: HighlightCommand) -> Result<()> {
    let store = open_store(config).await?;

    match command {
        HighlightCommand::Add {
            book,
            chapter,
            verse,
            text,
            color,
        } => {
            let highlight = Highlight::new(book, chapter, verse, text, color);
            let id = highlight.id.clone();
            let reference = highlight.reference();
            store
                .add_highlight(highlight)
                .await
                .context("Failed to add highlight")?;
            println!("Highlighted {} ({})", reference, id);
        }

        HighlightCommand::Remove { id } => {
            if store.remove_highlight(&id).await? {
                println!("Removed highlight {}", id);
            } else {
                println!("No highlight {}", id);
            }
        }

        HighlightCommand::Color { id, color } => {
            let highlight = store
                .update_highlight_color(&id, &color)
                .await
                .context("Failed to update highlight")?;
            println!("{} is now {}", highlight.reference(), highlight.color);
        }

        HighlightCommand::List { book, chapter } => {
            let filter = HighlightFilter { book, chapter };
            let highlights = store.list_highlights(&filter).await?;
            if highlights.is_empty() {
                println!("No highlights.");
            }
            for highlight in highlights {
                println!(
                    "  {:<18} {:<8} \"{}\"  {}",
                    highlight.reference(),
                    highlight.color,
                    highlight.text,
                    highlight.id
                );
            }
        }

        HighlightCommand::Clear => {
            let removed = store.clear_highlights().await?;
            println!("Removed {} highlight(s)", removed);
        }
    }

    Ok(())
}

async fn cmd_outbox(config: &AppConfig, kind: Option<EntityKind>) -> Result<()> {
    let store = open_store(config).await?;
    let entries = store.pending_outbox(kind).await?;

    if entries.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    for entry in &entries {
        let error = entry
            .last_error
            .as_deref()
            .map(|e| format!("  last error: {}", e))
            .unwrap_or_default();
        println!(
            "  #{:<4} {:<9} {:<7} {}  attempts={}{}",
            entry.seq,
            entry.kind.as_str(),
            format!("{:?}", entry.operation),
            entry.id,
            entry.attempts,
            error
        );
    }
    println!("{} pending", entries.len());
    Ok(())
}

async fn cmd_sync(config: &AppConfig) -> Result<()> {
    let store = open_store(config).await?;
    let transport = open_transport(config)?;

    info!(transport = transport.name(), "flushing outbox");
    let report = store
        .flush_outbox(&transport)
        .await
        .context("Failed to flush outbox")?;
    print_report(None, &report);

    if !report.dropped.is_empty() {
        bail!("{} change(s) could not be synced", report.dropped.len());
    }
    Ok(())
}

async fn cmd_sync_watch(config: &AppConfig, period: Duration) -> Result<()> {
    let transport: Arc<dyn SyncTransport> = Arc::new(open_transport(config)?);
    let (sync, handle) = BackgroundSync::new(BackgroundSyncConfig::new().with_periodic(period));
    let store = Arc::new(
        open_store(config)
            .await?
            .with_trigger(Arc::new(sync.clone())),
    );

    let task = tokio::spawn(handle.run(store, transport, |tag, report| {
        print_report(Some(tag), report)
    }));
    for tag in SyncTag::ALL {
        sync.request(tag);
    }

    info!(?period, "syncing until interrupted");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    sync.shutdown().await;
    task.await.context("Background sync panicked")?;
    Ok(())
}

fn print_report(tag: Option<SyncTag>, report: &FlushReport) {
    let prefix = tag.map(|t| format!("[{}] ", t)).unwrap_or_default();
    println!(
        "{}delivered={} retried={} superseded={} dropped={} remaining={}",
        prefix,
        report.delivered,
        report.retried,
        report.superseded,
        report.dropped.len(),
        report.remaining
    );
    if report.unreadable > 0 {
        warn!(count = report.unreadable, "skipped unreadable outbox entries");
    }
    for dropped in &report.dropped {
        warn!(
            kind = %dropped.kind,
            id = %dropped.id,
            attempts = dropped.attempts,
            error = %dropped.last_error,
            "gave up syncing change"
        );
    }
}

async fn cmd_cache_size(config: &AppConfig, translations: &[String]) -> Result<()> {
    let cache = open_cache(config)?;
    load_translations(config, &cache, translations).await?;

    let response = cache.respond(&CacheRequest::GetCacheSize);
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
