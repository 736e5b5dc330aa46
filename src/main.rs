use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tributary::config::Config;
use tributary::cycle::{
    run_cycle, run_file_cycle, CycleOptions, CycleOutcome, FileCycleOptions, FileItem,
};
use tributary::defaults::{builtin_sources, load_sources_file};
use tributary::feed::build_client;
use tributary::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "tributary", about = "Personal RSS/Atom aggregator")]
struct Args {
    /// Database path (overrides config file)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and seed the built-in source list
    Init,
    /// Register a feed source
    Add {
        url: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        label: Option<String>,
    },
    /// List configured sources
    Sources {
        /// Include disabled sources
        #[arg(long)]
        all: bool,
    },
    /// Delete a source and its items
    Remove { id: i64 },
    /// Re-enable a source
    Enable { id: i64 },
    /// Disable a source without deleting its history
    Disable { id: i64 },
    /// Fetch all enabled sources and print the merged result
    Run {
        /// Only items from the last N hours
        #[arg(long, value_name = "N")]
        since_hours: Option<i64>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// One-shot mode: aggregate a {category: [urls]} JSON file instead
        /// of the store (no persistence, no caching)
        #[arg(long, value_name = "FILE")]
        file_sources: Option<PathBuf>,
    },
}

fn config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("tributary")
            .join("config.toml"),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match config_path() {
        Some(path) => Config::load(&path).context("Failed to load config file")?,
        None => Config::default(),
    };
    if let Some(db) = &args.db {
        config.db_path = db.to_string_lossy().into_owned();
    }

    match args.command {
        Command::Init => {
            let db = Database::open(&config.db_path)
                .await
                .context("Failed to initialize database")?;
            let seeded = db.seed_default_sources(&builtin_sources()).await?;
            if seeded > 0 {
                println!("Initialized {} with {} built-in sources", config.db_path, seeded);
            } else {
                println!("Database {} already initialized", config.db_path);
            }
        }
        Command::Add {
            url,
            category,
            label,
        } => {
            let db = Database::open(&config.db_path).await?;
            let id = db
                .add_source(&url, category.as_deref(), label.as_deref())
                .await?;
            println!("Added source {} ({})", id, url);
        }
        Command::Sources { all } => {
            let db = Database::open(&config.db_path).await?;
            let sources = db.list_sources(!all).await?;
            for source in sources {
                let status = source
                    .last_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "never fetched".to_string());
                println!(
                    "{:>4}  [{}] {}  ({}{}, {})",
                    source.id,
                    source.category.as_deref().unwrap_or("-"),
                    source.label.as_deref().unwrap_or(&source.url),
                    if source.enabled { "enabled" } else { "disabled" },
                    if source.label.is_some() {
                        format!(", {}", source.url)
                    } else {
                        String::new()
                    },
                    status,
                );
            }
        }
        Command::Remove { id } => {
            let db = Database::open(&config.db_path).await?;
            if db.remove_source(id).await? {
                println!("Removed source {}", id);
            } else {
                println!("No source with id {}", id);
            }
        }
        Command::Enable { id } => {
            let db = Database::open(&config.db_path).await?;
            db.set_source_enabled(id, true).await?;
        }
        Command::Disable { id } => {
            let db = Database::open(&config.db_path).await?;
            db.set_source_enabled(id, false).await?;
        }
        Command::Run {
            since_hours,
            category,
            limit,
            json,
            file_sources,
        } => {
            let client = build_client(&config.user_agent).context("Failed to build HTTP client")?;
            let since = since_hours.map(|hours| Utc::now() - ChronoDuration::hours(hours));

            if let Some(path) = file_sources {
                let sources = load_sources_file(&path);
                let opts = FileCycleOptions {
                    since,
                    category,
                    limit: limit.map(|n| n as usize),
                    concurrency: config.concurrency,
                    request_timeout: Duration::from_secs(config.request_timeout_secs),
                };
                let items = run_file_cycle(&client, &sources, &opts).await;
                if json {
                    println!("{}", serde_json::to_string_pretty(&items)?);
                } else {
                    print_file_items(&items);
                }
            } else {
                let db = Database::open(&config.db_path).await?;
                let opts = CycleOptions {
                    since,
                    category,
                    limit,
                    concurrency: config.concurrency,
                    request_timeout: Duration::from_secs(config.request_timeout_secs),
                    deadline: config.cycle_deadline_secs.map(Duration::from_secs),
                };
                let outcome = run_cycle(&db, &client, &opts).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                } else {
                    print_cycle_outcome(&db, &outcome).await?;
                }
            }
        }
    }

    Ok(())
}

fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .map(|dt: DateTime<Utc>| format!(" ({})", dt.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default()
}

fn print_file_items(items: &[FileItem]) {
    for item in items {
        println!(
            "- [{}] {}\n  {}{}",
            item.source,
            item.title,
            item.link.as_deref().unwrap_or(""),
            format_timestamp(item.published),
        );
    }
}

async fn print_cycle_outcome(db: &Database, outcome: &CycleOutcome) -> Result<()> {
    // Map source ids to display names for the listing.
    let sources = db.list_sources(false).await?;
    let name_of = |id: i64| -> String {
        sources
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.label.clone().unwrap_or_else(|| s.url.clone()))
            .unwrap_or_else(|| format!("source {}", id))
    };

    for item in &outcome.items {
        println!(
            "- [{}] {}\n  {}{}",
            name_of(item.source_id),
            item.title,
            item.link.as_deref().unwrap_or(""),
            format_timestamp(item.published.or(Some(item.first_seen))),
        );
    }

    eprintln!();
    for report in &outcome.report {
        let detail = report
            .detail
            .as_deref()
            .map(|d| format!(" - {}", d))
            .unwrap_or_default();
        eprintln!(
            "{:>16}  {} (+{} ~{}){}",
            report.status.to_string(),
            report.url,
            report.created,
            report.updated,
            detail,
        );
    }

    Ok(())
}
