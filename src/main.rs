//! `fk` — the FindersKeepers command-line interface.
//!
//! Thin CLI over the [`findkeep`] library: schema migrations, single-file
//! ingestion, ad-hoc queries, embedding maintenance, and the HTTP server.
//! The broader CLI (bulk connector sync, source management) is out of
//! scope (spec §1); automated intake goes through the HTTP ingestion API
//! (§6.1) instead.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use findkeep::job_queue::Priority;
use findkeep::models::SourceItem;
use findkeep::store::{GrStore, RvStore, ViStore};
use findkeep::{config, db, embed_cmd, export, get, migrate, orchestrator::Orchestrator, search, server, stats};

#[derive(Parser)]
#[command(
    name = "fk",
    about = "FindersKeepers — a local-first personal knowledge hub for AI-assisted development",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/findkeep.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Ingest a single file
    IngestFile {
        /// Project namespace
        #[arg(long, default_value = "default")]
        project: String,

        /// Reingest even if the content hash is already indexed
        #[arg(long)]
        force: bool,

        /// Path to the file
        path: PathBuf,
    },

    /// Query indexed documents
    Query {
        /// Project namespace
        #[arg(long, default_value = "default")]
        project: String,

        /// Query text
        q: String,

        /// Query mode: keyword, vector, hybrid, or graph-augmented
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results
        #[arg(long, default_value = "10")]
        top_k: i64,
    },

    /// Retrieve a document by ID
    Get {
        /// Document ID (UUID)
        id: String,
    },

    /// Manage embeddings
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show database statistics
    Stats,

    /// Export the index as JSON
    Export {
        /// Output file path; defaults to stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP server
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings
    Pending {
        /// Maximum number of chunks to embed
        #[arg(long)]
        limit: Option<usize>,

        /// Override batch size from config
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings
    Rebuild {
        /// Override batch size from config
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::IngestFile { project, force, path } => {
            run_ingest_file(&cfg, &project, &path, force).await?;
        }
        Commands::Query { project, q, mode, top_k } => {
            run_query(&cfg, &project, &q, &mode, top_k).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn open_stores(cfg: &config::Config) -> anyhow::Result<(RvStore, ViStore, GrStore)> {
    let pool = std::sync::Arc::new(db::connect(cfg).await?);
    Ok((RvStore::new(pool.clone()), ViStore::new(pool.clone()), GrStore::new(pool)))
}

async fn run_ingest_file(cfg: &config::Config, project: &str, path: &PathBuf, force: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)?;
    let body = String::from_utf8_lossy(&bytes).to_string();
    let now = chrono::Utc::now();

    let item = SourceItem {
        source: "filesystem".to_string(),
        source_id: path.display().to_string(),
        source_url: None,
        title: path.file_name().map(|n| n.to_string_lossy().to_string()),
        author: None,
        created_at: now,
        updated_at: now,
        content_type: "text/plain".to_string(),
        body,
        metadata_json: "{}".to_string(),
        raw_json: None,
        raw_bytes: Some(bytes),
    };

    let (rv, vi, gr) = open_stores(cfg).await?;
    let orchestrator = Orchestrator::new(cfg.clone(), rv, vi, gr);
    orchestrator.spawn_workers();

    let job_id = orchestrator.ingest_item(project, item, Priority::Interactive, force);
    println!("job: {job_id}");
    wait_for_job(&orchestrator, job_id).await;
    Ok(())
}

async fn wait_for_job(orchestrator: &Orchestrator, job_id: findkeep::job_queue::JobId) {
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        match orchestrator.get_job(job_id) {
            Some(rec) => {
                print!("\r{}/{} processed", rec.processed_count, rec.total);
                use std::io::Write;
                let _ = std::io::stdout().flush();
                if matches!(
                    rec.status,
                    findkeep::orchestrator::JobStatus::Completed | findkeep::orchestrator::JobStatus::Failed
                ) {
                    println!();
                    if let Some(err) = rec.last_error {
                        eprintln!("last error: {err}");
                    }
                    break;
                }
            }
            None => break,
        }
    }
}

async fn run_query(cfg: &config::Config, project: &str, q: &str, mode: &str, top_k: i64) -> anyhow::Result<()> {
    let (rv, vi, gr) = open_stores(cfg).await?;
    let options = search::QueryOptions {
        top_k,
        mode: mode.to_string(),
        filters: search::QueryFilters::default(),
    };
    let results = search::query(cfg, &rv, &vi, &gr, project, q, &options).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            r.score,
            r.title.as_deref().unwrap_or("(untitled)"),
            r.document_id
        );
        println!("   {}", r.snippet);
    }
    Ok(())
}

