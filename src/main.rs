//! Heartbeat Intervals CLI
//!
//! Runs the interval server and offers direct access to a local store.
//! RocksDB allows one process per store directory, so the local commands
//! need the server to be stopped.

use chrono::Utc;
use clap::{Parser, Subcommand};
use heartbeat_intervals::{
    config::Config,
    core::{EntityKey, Heartbeat, HeartbeatAggregator, Interval, QueryService, StaleSweeper},
    stats::create_shared_stats_with_persistence,
    store::open_shared,
    VERSION,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "heartbeat-intervals")]
#[command(version = VERSION)]
#[command(about = "Compacts entity heartbeats into activity intervals", long_about = None)]
struct Cli {
    /// Data directory (overrides the configured one)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Gap threshold in seconds (overrides the configured one)
    #[arg(long, global = true)]
    gap_threshold: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Interface to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Record a single heartbeat
    Heartbeat {
        group: String,
        user: String,
        device: String,

        /// Epoch seconds (defaults to now)
        #[arg(long)]
        ts: Option<i64>,
    },

    /// List stored intervals
    List {
        /// Only open intervals
        #[arg(long)]
        active: bool,

        /// Restrict to one entity, given as group/user/device
        #[arg(long)]
        entity: Option<String>,
    },

    /// Show one interval
    Get { id: String },

    /// Close intervals that have been silent longer than the gap threshold
    Sweep {
        /// Reference time in epoch seconds (defaults to now)
        #[arg(long)]
        now: Option<i64>,
    },

    /// Show write statistics
    Status,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.data_dir {
        config.data_path = dir;
    }
    if let Some(secs) = cli.gap_threshold {
        config.gap_threshold = Duration::from_secs(secs);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Error: Could not create data directory: {e}");
        std::process::exit(1);
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            cmd_serve(&config);
        }
        Commands::Heartbeat {
            group,
            user,
            device,
            ts,
        } => {
            cmd_heartbeat(&config, EntityKey::new(group, user, device), ts);
        }
        Commands::List { active, entity } => {
            cmd_list(&config, active, entity.as_deref());
        }
        Commands::Get { id } => {
            cmd_get(&config, &id);
        }
        Commands::Sweep { now } => {
            cmd_sweep(&config, now);
        }
        Commands::Status => {
            cmd_status(&config);
        }
        Commands::Config => {
            cmd_config(&config);
        }
    }
}

#[cfg(feature = "server")]
fn cmd_serve(config: &Config) {
    use heartbeat_intervals::server::{run, ServerConfig};

    println!("Heartbeat Intervals v{VERSION}");
    println!("  Store: {:?}", config.store_path());
    println!("  Gap threshold: {}s", config.gap_threshold.as_secs());
    println!();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        let server = run(ServerConfig::from_config(config)).await?;
        println!("Listening on http://{}", server.addr());
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        println!();
        println!("Stopping server...");
        server.shutdown().await
    });

    if let Err(e) = result {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_config: &Config) {
    eprintln!("Error: serve requires the `server` feature");
    std::process::exit(1);
}

fn open_store(config: &Config) -> heartbeat_intervals::SharedStore {
    match open_shared(config.store_path()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening store: {e}");
            eprintln!("Is a server already running against {:?}?", config.data_path);
            std::process::exit(1);
        }
    }
}

fn print_interval(interval: &Interval) {
    println!(
        "{}  {}/{}/{}  {} -> {}  ({}s{})",
        interval.id,
        interval.group,
        interval.user,
        interval.device,
        interval.ts_start,
        interval.ts_end,
        interval.duration(),
        if interval.active { ", open" } else { "" }
    );
}

fn cmd_heartbeat(config: &Config, entity: EntityKey, ts: Option<i64>) {
    let store = open_store(config);
    let stats = create_shared_stats_with_persistence(config.stats_path());
    let aggregator = HeartbeatAggregator::new(store, config.gap_threshold_secs(), config.retry)
        .with_stats(stats.clone());

    let heartbeat = Heartbeat::new(entity, ts.unwrap_or_else(|| Utc::now().timestamp()));
    match aggregator.record(&heartbeat) {
        Ok((interval, outcome)) => {
            println!("{outcome:?}");
            print_interval(&interval);
        }
        Err(e) => {
            eprintln!("Error recording heartbeat: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }
}

fn parse_entity(s: &str) -> Option<EntityKey> {
    let mut parts = s.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(g), Some(u), Some(d)) => Some(EntityKey::new(g, u, d)),
        _ => None,
    }
}

fn cmd_list(config: &Config, active: bool, entity: Option<&str>) {
    let query = QueryService::new(open_store(config));

    let result: Result<Vec<Interval>, _> = match entity {
        Some(raw) => {
            let Some(entity) = parse_entity(raw) else {
                eprintln!("Error: entity must be given as group/user/device");
                std::process::exit(1);
            };
            query
                .list_entity(&entity)
                .map(|all| all.into_iter().filter(|i| !active || i.active).collect())
        }
        None if active => query.list_active(),
        None => query.list_all(),
    };

    match result {
        Ok(intervals) => {
            if intervals.is_empty() {
                println!("No intervals found.");
            }
            for interval in &intervals {
                print_interval(interval);
            }
        }
        Err(e) => {
            eprintln!("Error listing intervals: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_get(config: &Config, id: &str) {
    let query = QueryService::new(open_store(config));
    match query.get_by_id(id) {
        Ok(Some(interval)) => println!(
            "{}",
            serde_json::to_string_pretty(&interval).unwrap_or_else(|_| "Error".to_string())
        ),
        Ok(None) => {
            println!("No interval with id {id}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error reading interval: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_sweep(config: &Config, now: Option<i64>) {
    let store = open_store(config);
    let stats = create_shared_stats_with_persistence(config.stats_path());
    let sweeper = StaleSweeper::new(store, config.gap_threshold_secs(), config.retry)
        .with_stats(stats.clone());

    match sweeper.sweep(now.unwrap_or_else(|| Utc::now().timestamp())) {
        Ok(report) => {
            println!(
                "Scanned {} open interval(s), closed {}",
                report.scanned,
                report.closed.len()
            );
            for interval in &report.closed {
                print_interval(interval);
            }
            if report.contended > 0 {
                println!("Skipped {} contended entities", report.contended);
            }
        }
        Err(e) => {
            eprintln!("Error sweeping: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }
}

fn cmd_status(config: &Config) {
    println!("Heartbeat Intervals Status");
    println!("==========================");
    println!();
    println!("Store: {:?}", config.store_path());
    println!("Gap threshold: {}s", config.gap_threshold.as_secs());
    println!();

    if config.stats_path().exists() {
        let stats = create_shared_stats_with_persistence(config.stats_path());
        println!("{}", stats.summary());
    } else {
        println!("No write statistics recorded yet.");
    }
}

fn cmd_config(config: &Config) {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}
