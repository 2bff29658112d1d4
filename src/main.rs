use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nalax::analytics::GeoResolver;
use nalax::config::Config;
use nalax::cutoff::parse_cutoff;
use nalax::ingest::{Batcher, EventAssembler, LogFollower, Pipeline};
use nalax::storage::{SqliteStorage, Storage};

#[derive(Parser)]
#[command(name = "nalax")]
#[command(about = "Access-log ingestion and daily analytics", long_about = None)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Geo range table (overrides GEO_TABLE_PATH)
    #[arg(long, global = true)]
    geo_table: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema steps
    Migrate,
    /// Follow an access log and store its events
    Tail {
        /// Access log to follow
        path: PathBuf,
        /// Flush after this many events (0 disables)
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Flush after this many seconds (0 disables)
        #[arg(long)]
        buffer_time: Option<u64>,
        /// Replay the existing file before following
        #[arg(long)]
        from_start: bool,
    },
    /// Roll raw events into the daily tables
    Aggregate {
        /// RFC 3339 timestamp, epoch seconds, or age such as 7d (default: now)
        #[arg(long)]
        before: Option<String>,
    },
    /// Print the busiest daily buckets
    Report {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Resolve addresses against the geo table
    Lookup {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database {
        config.database.url = url;
    }
    if let Some(path) = cli.geo_table {
        config.geo.table_path = path;
    }

    if let Commands::Lookup { addresses } = &cli.command {
        let geo = load_geo(&config)?;
        for address in addresses {
            let result = geo.lookup(address);
            println!("{:<40} {:<10} {}", address, result.region, result.network);
        }
        return Ok(());
    }

    let storage = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("failed to open database {}", config.database.url))?,
    );
    let version = storage.migrate().await?;

    match cli.command {
        Commands::Migrate => {
            println!("Schema version {version}");
        }
        Commands::Tail {
            path,
            buffer_size,
            buffer_time,
            from_start,
        } => {
            if let Some(size) = buffer_size {
                config.ingest.buffer_size = size;
            }
            if let Some(secs) = buffer_time {
                config.ingest.buffer_time_secs = secs;
            }
            tail(&config, storage, path, from_start).await?;
        }
        Commands::Aggregate { before } => {
            let now = Utc::now();
            let cutoff = match before {
                Some(expr) => parse_cutoff(&expr, now)?,
                None => now,
            };
            let count = storage.aggregate(cutoff).await?;
            println!("Aggregated {count} events older than {}", cutoff.to_rfc3339());
        }
        Commands::Report { limit } => {
            report(storage.as_ref(), limit).await?;
        }
        Commands::Lookup { .. } => {}
    }

    Ok(())
}

fn load_geo(config: &Config) -> Result<Arc<GeoResolver>> {
    let geo = GeoResolver::load(&config.geo.table_path, config.geo.cache_capacity)?;
    Ok(Arc::new(geo))
}

async fn tail(
    config: &Config,
    storage: Arc<SqliteStorage>,
    path: PathBuf,
    from_start: bool,
) -> Result<()> {
    let geo = load_geo(config)?;
    let follower = LogFollower::new(path, config.ingest.follow_config(from_start));
    let mut handle = follower.follow()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let batcher = Batcher::new(storage, config.ingest.batch_config());
    let mut pipeline = Pipeline::new(EventAssembler::new(geo), batcher);
    let stats = pipeline.run(&mut handle, shutdown_rx).await?;

    println!(
        "Processed {} lines: {} events stored, {} malformed, {} rejected",
        stats.lines, stats.events, stats.decode_failures, stats.assemble_failures
    );
    Ok(())
}

async fn report(storage: &dyn Storage, limit: i64) -> Result<()> {
    println!("Raw events awaiting aggregation: {}", storage.count_events().await?);

    println!();
    println!("Top pages");
    println!(
        "{:<10} {:<24} {:<8} {:<40} {:>8}",
        "Date", "Host", "Method", "Path", "Count"
    );
    println!("{}", "-".repeat(94));
    for row in storage.top_pages(limit).await? {
        println!(
            "{:04}-{:02}-{:02} {:<24} {:<8} {:<40} {:>8}",
            row.year, row.month, row.day, row.host, row.method, row.path, row.count
        );
    }

    println!();
    println!("Top regions");
    println!("{:<10} {:<24} {:<10} {:>8}", "Date", "Host", "Region", "Count");
    println!("{}", "-".repeat(55));
    for row in storage.top_regions(limit).await? {
        println!(
            "{:04}-{:02}-{:02} {:<24} {:<10} {:>8}",
            row.year, row.month, row.day, row.host, row.region, row.count
        );
    }

    println!();
    println!("Top devices");
    println!(
        "{:<10} {:<24} {:<8} {:<8} {:<8} {:>8}",
        "Date", "Host", "Device", "OS", "Browser", "Count"
    );
    println!("{}", "-".repeat(71));
    for row in storage.top_devices(limit).await? {
        println!(
            "{:04}-{:02}-{:02} {:<24} {:<8} {:<8} {:<8} {:>8}",
            row.year, row.month, row.day, row.host, row.device, row.os, row.browser, row.count
        );
    }

    Ok(())
}
