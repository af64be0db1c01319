mod config;
mod db;
mod errors;
mod fetch;
mod pacing;
mod parser;
mod stages;
mod utils;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use config::Settings;
use fetch::{join_url, HttpFetcher};
use parser::artifact::BencodeDecoder;
use stages::annotate::GeminiAnnotator;
use utils::format_duration;

#[derive(Parser)]
#[command(name = "corpus_scraper", about = "Listing harvester and file-name corpus builder")]
struct Cli {
    /// Settings file (default: ./corpus_scraper.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables
    Init,
    /// Walk listing pages and store new handles
    Discover {
        /// Start url or path on the index (default: discover.start_path)
        #[arg(long)]
        url: Option<String>,
        /// Max listing pages to fetch
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Fetch detail pages and store magnet links
    Resolve {
        /// Max items to attempt (default: all unresolved)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Download torrent files from the cache origin
    Retrieve {
        /// Max items to attempt (default: all unretrieved)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Decode torrent files and store video member paths
    Extract {
        /// Re-extract every file in the artifact directory
        #[arg(long)]
        rescan: bool,
    },
    /// Assign the training/evaluation split
    Partition,
    /// Queue normalized file names of one split for labeling
    Normalize {
        /// T (training) or E (evaluation)
        #[arg(short, long)]
        group: Option<char>,
    },
    /// Label queued file names with the annotation service
    Annotate {
        #[arg(long)]
        max_requests: Option<usize>,
    },
    /// Clear every stored label
    ResetLabels,
    /// Write labeled file names as a JSON array
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Show per-stage counts
    Stats,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            open_store(&settings.db_path)?;
            println!("Database ready at {}", settings.db_path.display());
        }
        Commands::Discover { url, max_pages } => {
            let base = settings.require_base_site()?.to_string();
            if let Some(n) = max_pages {
                settings.discover.max_pages = n;
            }
            let start = join_url(&base, url.as_deref().unwrap_or(&settings.discover.start_path))?;
            let conn = open_store(&settings.db_path)?;
            let fetcher = HttpFetcher::new(&settings.http, Some(base.as_str()))?;
            let report = stages::discover::run(&conn, &fetcher, &start, &settings.discover).await?;
            report.summary.log();
            println!("{} new handles", report.added);
        }
        Commands::Resolve { limit } => {
            let base = settings.require_base_site()?;
            let conn = open_store(&settings.db_path)?;
            let fetcher = HttpFetcher::new(&settings.http, Some(base))?;
            stages::resolve::run(&conn, &fetcher, base, &settings.resolve, limit)
                .await?
                .log();
        }
        Commands::Retrieve { limit } => {
            let origin = settings.require_cache_origin()?;
            let conn = open_store(&settings.db_path)?;
            let timeout = Duration::from_secs(settings.retrieve.timeout_secs);
            let fetcher = HttpFetcher::with_timeout(&settings.http, None, timeout)?;
            stages::retrieve::run(
                &conn,
                &fetcher,
                origin,
                &settings.artifact_dir,
                &settings.retrieve,
                limit,
            )
            .await?
            .log();
        }
        Commands::Extract { rescan } => {
            let conn = open_store(&settings.db_path)?;
            let summary = if rescan {
                stages::extract::rescan(&conn, &BencodeDecoder, &settings.artifact_dir, &settings.extract)?
            } else {
                stages::extract::run(&conn, &BencodeDecoder, &settings.artifact_dir, &settings.extract)?
            };
            summary.log();
        }
        Commands::Partition => {
            let conn = open_store(&settings.db_path)?;
            let report = stages::partition::run(&conn, &settings.partition, &mut rand::rng())?;
            report.summary.log();
            println!("{} training, {} evaluation", report.train, report.eval);
        }
        Commands::Normalize { group } => {
            if let Some(g) = group {
                settings.normalize.group = g.to_ascii_uppercase();
            }
            let conn = open_store(&settings.db_path)?;
            let report = stages::normalize::run(&conn, &settings.normalize, &mut rand::rng())?;
            report.summary.log();
            println!(
                "{} names produced, {} added to the label queue",
                report.produced, report.inserted
            );
        }
        Commands::Annotate { max_requests } => {
            if let Some(n) = max_requests {
                settings.annotate.max_requests = n;
            }
            let api_key = settings.require_api_key()?;
            let prompt = std::fs::read_to_string(&settings.annotate.prompt_path).with_context(|| {
                format!("Failed to read prompt {:?}", settings.annotate.prompt_path)
            })?;
            let conn = open_store(&settings.db_path)?;
            let annotator = GeminiAnnotator::new(&settings.annotate, api_key)?;
            let report = stages::annotate::run(&conn, &annotator, &prompt, &settings.annotate).await?;
            report.summary.log();
            println!("{} labeled, {} unmatched", report.labeled, report.unmatched);
        }
        Commands::ResetLabels => {
            let conn = open_store(&settings.db_path)?;
            let n = db::reset_labels(&conn)?;
            println!("Cleared {} labels", n);
        }
        Commands::Export { out } => {
            let conn = open_store(&settings.db_path)?;
            let n = export_labels(&conn, &out)?;
            println!("Wrote {} labeled names to {}", n, out.display());
        }
        Commands::Stats => {
            let conn = open_store(&settings.db_path)?;
            print_stats(&conn)?;
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn open_store(path: &Path) -> Result<Connection> {
    let conn = db::connect(path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

#[derive(Serialize)]
struct ExportRow {
    text: String,
    label: serde_json::Value,
}

fn export_labels(conn: &Connection, out: &Path) -> Result<usize> {
    let rows: Vec<ExportRow> = db::fetch_labeled(conn)?
        .into_iter()
        .map(|(text, label)| ExportRow {
            label: serde_json::from_str(&label).unwrap_or(serde_json::Value::String(label)),
            text,
        })
        .collect();
    let file = File::create(out).with_context(|| format!("Failed to create {:?}", out))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &rows)?;
    info!("Exported {} rows", rows.len());
    Ok(rows.len())
}

fn print_stats(conn: &Connection) -> Result<()> {
    let s = db::get_stats(conn)?;
    println!("Handles:      {}", s.total);
    println!("Resolved:     {}", s.resolved);
    println!("Retrieved:    {}", s.retrieved);
    println!("Extracted:    {}", s.extracted);
    println!("Training:     {}", s.train);
    println!("Evaluation:   {}", s.eval);
    println!("Text items:   {}", s.text_items);
    println!("Labeled:      {}", s.labeled);

    let items = db::fetch_work_items(conn)?;
    let mut by_stage = BTreeMap::new();
    for item in &items {
        *by_stage.entry(item.stage()).or_insert(0usize) += 1;
    }
    println!("\n--- Furthest stage ---");
    for (stage, n) in &by_stage {
        println!("  {:<12} {}", format!("{:?}", stage), n);
    }

    if s.inconsistent > 0 {
        let ids: Vec<String> = items
            .iter()
            .filter(|w| !w.is_consistent())
            .map(|w| w.id.to_string())
            .collect();
        println!(
            "\n{} rows have a later column set while an earlier one is empty: {}",
            s.inconsistent,
            ids.join(", ")
        );
    }
    Ok(())
}
