//! `shelfkeeperd` — the Shelfkeeper operation core binary.
//!
//! `serve` runs the HTTP API and operation queue; `scan`/`organize` run one
//! operation to completion from the command line with no server attached;
//! `tag` is a diagnostic that runs the tag extractor on a single file.
//! `playlist` is out of scope for this build (the playlist generator is an
//! external collaborator, per the design notes) and exits with a message
//! saying so.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use shelfkeeper_common::config::{CliOverrides, Config};
use shelfkeeper_common::events::EventHub;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use shelfkeeper_core::api::{self, AppState};
use shelfkeeper_core::extractors::TagExtractor;
use shelfkeeper_core::models::{LibraryState, OperationKind};
use shelfkeeper_core::organizer::{OrganizeOptions, Organizer};
use shelfkeeper_core::parsing::{HeuristicParser, LlmParser};
use shelfkeeper_core::queue::{Executor, Queue};
use shelfkeeper_core::scanner::{CancelToken, ScanOptions, Scanner};
use shelfkeeper_core::migrations;
use shelfkeeper_core::store::{BookFilter, ListOptions, Store};

#[derive(Parser)]
#[command(name = "shelfkeeperd", version, about = "Audiobook library operation core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the redb database file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Storage engine. Only `redb` is implemented; accepted for forward
    /// compatibility with the configuration surface.
    #[arg(long, global = true, default_value = "redb")]
    engine: String,

    /// HTTP listen port (`serve` only).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Scanner worker pool size.
    #[arg(long, global = true)]
    scan_workers: Option<usize>,

    /// Operation queue worker pool size.
    #[arg(long, global = true)]
    queue_workers: Option<usize>,

    /// Per-operation timeout, in seconds, applied to every registered kind.
    #[arg(long, global = true, default_value = "3600")]
    operation_timeout_secs: u64,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and operation queue.
    Serve,
    /// Scan a directory and exit.
    Scan {
        /// Directory to scan. Defaults to the library root.
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        force_update: bool,
    },
    /// Organize every book in the `import` library state and exit.
    Organize {
        /// Restrict to books whose file path starts with this directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Run the tag extractor on a single file and print the result as JSON.
    Tag {
        path: PathBuf,
    },
    /// Placeholder: playlist generation is not implemented in this build.
    Playlist,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .init();
}

fn cli_overrides(cli: &Cli) -> CliOverrides {
    CliOverrides {
        database_path: cli.db.as_ref().map(|p| p.to_string_lossy().to_string()),
        library_root: None,
        port: cli.port,
        scan_workers: cli.scan_workers,
        queue_workers: cli.queue_workers,
    }
}

fn build_executors(
    store: Store,
    events: EventHub,
    config: &Config,
    timeout: Duration,
) -> HashMap<OperationKind, (Executor, Duration)> {
    let mut executors: HashMap<OperationKind, (Executor, Duration)> = HashMap::new();

    let heuristic_parser = HeuristicParser::new();
    let llm_parser = LlmParser::new(config.llm_endpoint.clone(), config.llm_api_key.clone());
    let scanner = Arc::new(Scanner::new(
        store.clone(),
        events.clone(),
        TagExtractor::new(),
        heuristic_parser,
        llm_parser,
    ));
    let library_root = config.library_root.clone();
    let scan_executor: Executor = {
        let scanner = Arc::clone(&scanner);
        let library_root = library_root.clone();
        Arc::new(move |ctx| {
            let scanner = Arc::clone(&scanner);
            let library_root = library_root.clone();
            Box::pin(async move {
                let root = ctx
                    .params
                    .get("path")
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| library_root.clone());
                let force_update = ctx
                    .params
                    .get("force_update")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let options = ScanOptions {
                    force_update,
                    ..ScanOptions::default()
                };
                let cancel = bridge_cancel(ctx.cancel.clone());
                let summary = scanner
                    .scan(&root, &library_root, &options, cancel, &ctx.operation_id)
                    .await?;
                Ok(serde_json::to_value(summary)?)
            })
        })
    };
    executors.insert(OperationKind::Scan, (scan_executor, timeout));

    let organizer = Arc::new(Organizer::new(store.clone(), events.clone()));
    let organize_executor: Executor = {
        let organizer = Arc::clone(&organizer);
        let library_root = library_root.clone();
        let store = store.clone();
        Arc::new(move |ctx| {
            let organizer = Arc::clone(&organizer);
            let library_root = library_root.clone();
            let store = store.clone();
            Box::pin(async move {
                let dir_filter = ctx
                    .params
                    .get("dir")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let books = store.list_books(
                    &BookFilter {
                        library_state: Some(LibraryState::Import),
                        ..BookFilter::default()
                    },
                    &ListOptions {
                        limit: usize::MAX,
                        offset: 0,
                        sort_field: None,
                        sort_direction: shelfkeeper_core::store::SortDirection::Ascending,
                    },
                )?;
                let options = OrganizeOptions::default();
                let mut organized = 0u64;
                let mut failed = 0u64;
                let total = books.len() as u64;
                ctx.reporter.set_total(total).await?;
                for book in books {
                    if let Some(dir) = &dir_filter {
                        let matches = book
                            .file_path
                            .as_deref()
                            .is_some_and(|p| p.starts_with(dir.as_str()));
                        if !matches {
                            ctx.reporter.advance(1).await?;
                            continue;
                        }
                    }
                    match organizer
                        .organize(&book.id, &library_root, &options, &ctx.operation_id)
                        .await
                    {
                        Ok(_) => organized += 1,
                        Err(e) => {
                            failed += 1;
                            ctx.reporter
                                .log(
                                    shelfkeeper_core::models::LogLevel::Warn,
                                    format!("failed to organize book {}: {e}", book.id),
                                )
                                .await?;
                        }
                    }
                    ctx.reporter.advance(1).await?;
                }
                Ok(serde_json::json!({ "organized": organized, "failed": failed }))
            })
        })
    };
    executors.insert(OperationKind::Organize, (organize_executor, timeout));

    executors
}

/// Bridges the queue's `tokio_util::sync::CancellationToken` to the
/// scanner's own cooperative flag, since the scanner is written against a
/// lighter-weight token it can clone into `rayon` closures.
fn bridge_cancel(token: tokio_util::sync::CancellationToken) -> CancelToken {
    let cancel = CancelToken::new();
    let flagged = cancel.clone();
    tokio::spawn(async move {
        token.cancelled().await;
        flagged.cancel();
    });
    cancel
}

async fn run_scan_once(
    store: Store,
    events: EventHub,
    config: &Config,
    dir: Option<PathBuf>,
    force_update: bool,
) -> anyhow::Result<()> {
    let root = dir.unwrap_or_else(|| config.library_root.clone());
    let scanner = Scanner::new(
        store,
        events,
        TagExtractor::new(),
        HeuristicParser::new(),
        LlmParser::new(config.llm_endpoint.clone(), config.llm_api_key.clone()),
    );
    let options = ScanOptions {
        force_update,
        ..ScanOptions::default()
    };
    let summary = scanner
        .scan(&root, &config.library_root, &options, CancelToken::new(), "cli-scan")
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_organize_once(store: Store, events: EventHub, config: &Config, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let organizer = Organizer::new(store.clone(), events);
    let books = store.list_books(
        &BookFilter {
            library_state: Some(LibraryState::Import),
            ..BookFilter::default()
        },
        &ListOptions {
            limit: usize::MAX,
            offset: 0,
            sort_field: None,
            sort_direction: shelfkeeper_core::store::SortDirection::Ascending,
        },
    )?;
    let options = OrganizeOptions::default();
    let mut organized = 0;
    for book in books {
        if let Some(dir) = &dir {
            let dir = dir.to_string_lossy().to_string();
            if !book.file_path.as_deref().is_some_and(|p| p.starts_with(dir.as_str())) {
                continue;
            }
        }
        match organizer.organize(&book.id, &config.library_root, &options, "cli-organize").await {
            Ok(result) => {
                organized += 1;
                println!("organized {} -> {}", book.id, result.destination.display());
            }
            Err(e) => error!(book_id = %book.id, error = %e, "organize failed"),
        }
    }
    println!("organized {organized} book(s)");
    Ok(())
}

fn run_tag(path: &std::path::Path) -> anyhow::Result<()> {
    let extractor = TagExtractor::new();
    let candidate = extractor.extract(path)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "title": candidate.title,
            "author_primary": candidate.author_primary,
            "author_additional": candidate.author_additional,
            "narrator": candidate.narrator,
            "series": candidate.series,
            "series_position": candidate.series_position,
            "publisher": candidate.publisher,
            "publish_year": candidate.publish_year,
            "language": candidate.language,
            "duration_seconds": candidate.duration_seconds,
            "genre": candidate.genre,
            "comment": candidate.comment,
            "has_cover_art": candidate.cover_art.is_some(),
            "format": format!("{:?}", candidate.format),
        }))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Tag { path } = &cli.command {
        return run_tag(path).map_err(|e| {
            error!(error = %e, "tag extraction failed");
            e
        });
    }
    if matches!(cli.command, Commands::Playlist) {
        println!("playlist generation is not part of this build; see DESIGN.md");
        return Ok(());
    }

    let overrides = cli_overrides(&cli);
    let config = Config::resolve(cli.config.as_deref(), overrides)?;
    info!(db = %config.database_path.display(), library_root = %config.library_root.display(), "resolved configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.library_root)?;

    let store = Store::open(&config.database_path)?;
    migrations::run(&store)?;
    let events = EventHub::default();

    match cli.command {
        Commands::Tag { .. } | Commands::Playlist => unreachable!("handled above"),
        Commands::Scan { dir, force_update } => {
            run_scan_once(store, events, &config, dir, force_update).await?;
        }
        Commands::Organize { dir } => {
            run_organize_once(store, events, &config, dir).await?;
        }
        Commands::Serve => {
            let timeout = Duration::from_secs(cli.operation_timeout_secs);
            let executors = build_executors(store.clone(), events.clone(), &config, timeout);
            let queue = Arc::new(Queue::new(store.clone(), events.clone(), config.queue_workers, executors));
            queue.recover().await?;
            let _workers = queue.clone().start();

            let state = AppState {
                store,
                events,
                queue,
                library_root: config.library_root.clone(),
                opt_out_marker: ".jabexclude".to_string(),
                event_stream_max_lifetime: Duration::from_secs(config.event_stream_max_lifetime_secs),
            };
            let app = api::router(state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
            info!(port = config.port, "listening");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
