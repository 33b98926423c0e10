//! # docflow CLI
//!
//! The `docflow` binary drives the ingestion pipeline. It provides
//! commands for database initialization, one-off and continuous file
//! ingestion, web source crawling, and reconciliation.
//!
//! ## Usage
//!
//! ```bash
//! docflow --config ./config/docflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docflow init` | Create the SQLite database and run schema migrations |
//! | `docflow ingest <path>` | Ingest a single file |
//! | `docflow watch` | Watch a directory and ingest on change |
//! | `docflow web add <url>` | Register a web source for crawling |
//! | `docflow web run` | Process due web sources (once or as a loop) |
//! | `docflow reconcile` | Repair drift left by a prior crash |
//! | `docflow search <query>` | Search graph facts |
//! | `docflow status` | Show store counts |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docflow::config;
use docflow::ingest::{self, AppContext};
use docflow::migrate;
use docflow::models::SourceDocument;
use docflow::reconcile;
use docflow::store;
use docflow::watch;
use docflow::web;

/// docflow — a document ingestion pipeline with chunking, embeddings,
/// and an optional knowledge graph.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "docflow",
    about = "Document ingestion pipeline with chunking, embeddings, and an optional knowledge graph",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Ingest a single file.
    ///
    /// Extracts text, chunks it, optionally embeds and submits to the
    /// graph, and persists everything. Reprocessing the same file is
    /// safe: existing state is deleted first.
    Ingest {
        /// Path to the file to ingest.
        path: PathBuf,

        /// Stable identifier for the document. Defaults to the path.
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Watch the configured directory and ingest files on change.
    ///
    /// Requires a `[watch]` section in the configuration. Runs a startup
    /// reconciliation scan first, then scan cycles until interrupted.
    Watch {
        /// Run a single scan cycle and exit.
        #[arg(long)]
        once: bool,
    },

    /// Manage web sources.
    Web {
        #[command(subcommand)]
        action: WebAction,
    },

    /// Run the startup reconciliation scan.
    ///
    /// Detects documents left half-ingested by a prior crash, cleans
    /// orphaned chunks and graph data, and reports what needs
    /// reprocessing.
    Reconcile,

    /// Search graph facts.
    ///
    /// Requires a configured graph backend.
    Search {
        query: String,
    },

    /// Show document, chunk, and web source counts.
    Status,
}

/// Web source subcommands.
#[derive(Subcommand)]
enum WebAction {
    /// Register a URL for crawling.
    Add {
        url: String,

        /// Crawl depth: 1 fetches the page, 2 also aggregates its links.
        #[arg(long, default_value_t = 1)]
        depth: u32,

        /// Recrawl interval in hours. Omit to crawl once.
        #[arg(long)]
        interval_hours: Option<i64>,
    },

    /// List registered web sources and their status.
    List,

    /// Process all due web sources.
    Run {
        /// Keep running, polling for due sources.
        #[arg(long)]
        watch: bool,

        /// Poll interval in seconds when running continuously.
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docflow=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, source_id } => {
            let ctx = AppContext::from_config(cfg).await?;
            migrate::apply(&ctx.pool).await?;

            let bytes = std::fs::read(&path)?;
            let source_id = source_id.unwrap_or_else(|| path.to_string_lossy().to_string());
            let doc = SourceDocument {
                source_id,
                title: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.to_string_lossy().to_string()),
                url: None,
                media_type: watch::media_type_for(&path).to_string(),
                folder_path: path.parent().map(|p| p.to_string_lossy().to_string()),
            };

            let outcome = ingest::ingest_document(&ctx, &doc, &bytes).await;
            println!("ingest {}", outcome.source_id);
            println!("  chunks written: {}", outcome.chunks_written);
            if outcome.rows_written > 0 {
                println!("  rows written: {}", outcome.rows_written);
            }
            if outcome.used_graph {
                println!("  graph episodes: {}", outcome.graph_episodes);
            }
            if let Some(warning) = &outcome.graph_warning {
                println!("  graph warning: {}", warning);
            }
            if outcome.success {
                println!("ok");
            } else {
                println!("failed: {}", outcome.error.as_deref().unwrap_or("unknown"));
                std::process::exit(1);
            }
        }
        Commands::Watch { once } => {
            let ctx = AppContext::from_config(cfg).await?;
            migrate::apply(&ctx.pool).await?;

            let report = reconcile::startup_scan(&ctx).await?;
            if !report.reprocess.is_empty() {
                println!(
                    "startup scan queued {} document(s) for reprocessing",
                    report.reprocess.len()
                );
            }

            if once {
                let summary = watch::scan_once(&ctx).await?;
                println!(
                    "watch: {} ingested, {} removed, {} unchanged, {} failed",
                    summary.ingested, summary.unchanged, summary.removed, summary.failed
                );
            } else {
                watch::run_loop(&ctx).await?;
            }
        }
        Commands::Web { action } => match action {
            WebAction::Add {
                url,
                depth,
                interval_hours,
            } => {
                let ctx = AppContext::from_config(cfg).await?;
                migrate::apply(&ctx.pool).await?;
                let id = web::add_web_source(&ctx.pool, &url, depth, interval_hours).await?;
                println!("added web source {} ({})", id, url);
            }
            WebAction::List => {
                let ctx = AppContext::from_config(cfg).await?;
                migrate::apply(&ctx.pool).await?;
                for (id, url, status, chunks) in web::list_web_sources(&ctx.pool).await? {
                    println!("{}  {}  {}  chunks={}", id, status, url, chunks);
                }
            }
            WebAction::Run {
                watch,
                interval_secs,
            } => {
                let ctx = AppContext::from_config(cfg).await?;
                migrate::apply(&ctx.pool).await?;
                if watch {
                    web::run_loop(&ctx, interval_secs).await?;
                } else {
                    let n = web::process_cycle(&ctx).await?;
                    println!("processed {} web sources", n);
                }
            }
        },
        Commands::Reconcile => {
            let ctx = AppContext::from_config(cfg).await?;
            migrate::apply(&ctx.pool).await?;

            let report = reconcile::startup_scan(&ctx).await?;
            println!("reconcile");
            println!("  metadata without chunks: {}", report.metadata_only);
            println!("  chunks without metadata: {}", report.chunks_only);
            println!("  orphaned chunks removed: {}", report.chunks_removed);
            println!("  stale tracking entries removed: {}", report.stale_removed);
            let swept = reconcile::graph_orphan_sweep(&ctx).await?;
            println!("  graph orphan sources cleaned: {}", swept);
            if report.reprocess.is_empty() {
                println!("  nothing to reprocess");
            } else {
                println!("  queued for reprocessing:");
                for id in &report.reprocess {
                    println!("    {}", id);
                }
            }
            println!("ok");
        }
        Commands::Search { query } => {
            let ctx = AppContext::from_config(cfg).await?;
            let Some(graph) = &ctx.graph else {
                anyhow::bail!("search requires graph.enabled = true");
            };
            let facts = graph.search(&query).await?;
            if facts.is_empty() {
                println!("no results");
            } else {
                for fact in facts {
                    println!("- {}", fact);
                }
            }
        }
        Commands::Status => {
            let ctx = AppContext::from_config(cfg).await?;
            migrate::apply(&ctx.pool).await?;

            let docs = store::metadata_source_ids(&ctx.pool).await?.len();
            let chunk_sources = store::chunk_source_ids(&ctx.pool).await?.len();
            let web_sources = web::list_web_sources(&ctx.pool).await?.len();
            println!("documents: {}", docs);
            println!("sources with chunks: {}", chunk_sources);
            println!("web sources: {}", web_sources);
        }
    }

    Ok(())
}
