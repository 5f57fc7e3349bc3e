//! ScanWire CLI
//!
//! Command-line client for the scan-progress server:
//! - Watch live scan events
//! - Measure round-trip latency
//! - Generate a config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use scanwire::connection::{ScanProgress, Stats};
use scanwire::{
    generate_default_config, Config, ConnectionManager, Event, EventKind, LoggingConfig, RoomKey,
    RoomType,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scanwire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time client for the scan-progress server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Server base URL, overrides the config file
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Socket.IO namespace, overrides the config file
    #[arg(long, global = true)]
    pub namespace: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print events until Ctrl-C
    Watch {
        /// Scan to follow
        #[arg(short, long)]
        scan: Option<String>,
        /// Extra rooms as type:name (e.g. global:lobby)
        #[arg(short, long)]
        room: Vec<String>,
        /// Auth token, overrides the config file
        #[arg(short, long)]
        token: Option<String>,
        /// Print raw events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Measure round-trip latency
    Ping {
        /// Number of pings
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,
        /// Delay between pings (ms)
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Print a default config file
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(url) = &cli.url {
        config.connection.url = url.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.connection.namespace = namespace.clone();
    }

    init_logging(&config.logging);

    match cli.command {
        Commands::Watch {
            scan,
            room,
            token,
            json,
        } => {
            if token.is_some() {
                config.auth.token = token;
            }
            watch(config, scan, room, json).await?;
        }

        Commands::Ping { count, interval_ms } => {
            ping(config, count, Duration::from_millis(interval_ms)).await?;
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("scanwire={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn manager_for(config: &Config) -> ConnectionManager {
    let mut connection = config.connection.clone();
    connection.auto_connect = false;
    let manager = ConnectionManager::with_websocket(connection);
    if let Some(auth) = config.auth_data() {
        manager.set_auth(auth);
    }
    manager
}

async fn watch(config: Config, scan: Option<String>, rooms: Vec<String>, json: bool) -> anyhow::Result<()> {
    let rooms: Vec<RoomKey> = rooms
        .iter()
        .map(|room| room.parse::<RoomKey>().map_err(anyhow::Error::msg))
        .collect::<Result<_, _>>()?;

    let manager = manager_for(&config);
    for kind in EventKind::ALL {
        manager.on(kind, move |event| print_event(event, json));
    }

    tracing::info!("Connecting to {}", config.connection.connection_url());
    if !manager.connect().await {
        tracing::warn!("Initial connection failed, retrying in the background");
    }

    // Remembered while offline and joined on every connection
    if let Some(scan_id) = &scan {
        manager.join_scan(scan_id);
    }
    for room in &rooms {
        match room.room_type {
            RoomType::Scan => manager.join_scan(&room.name),
            room_type => manager.join_room(&room.name, room_type),
        };
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let stats = manager.stats();
    manager.cleanup();
    print_stats(&stats);
    Ok(())
}

async fn ping(config: Config, count: u32, interval: Duration) -> anyhow::Result<()> {
    let manager = manager_for(&config);
    let url = config.connection.connection_url();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    manager.on(EventKind::PongReceived, move |event| {
        let _ = tx.send(event.data["latency"].as_u64());
    });

    if !manager.connect().await {
        let reason = manager.stats().last_error.unwrap_or_default();
        manager.cleanup();
        bail!("Cannot connect to {}: {}", url, reason);
    }

    for seq in 1..=count {
        if !manager.ping(None) {
            eprintln!("Connection lost");
            break;
        }
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Some(latency))) => println!("pong from {}: seq={} time={} ms", url, seq, latency),
            Ok(_) => println!("pong from {}: seq={} (unmatched)", url, seq),
            Err(_) => println!("Request timeout for seq={}", seq),
        }
        if seq < count {
            tokio::time::sleep(interval).await;
        }
    }

    let stats = manager.stats();
    manager.cleanup();
    println!();
    println!(
        "{} pings, average {:.1} ms, last {} ms",
        count, stats.average_latency_ms, stats.last_latency_ms
    );
    Ok(())
}

fn print_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to encode event: {}", e),
        }
        return;
    }

    let time = event.timestamp.format("%H:%M:%S");
    match event.kind {
        EventKind::ScanProgress => match event.decode::<ScanProgress>() {
            Ok(progress) => println!(
                "{} [{}] {:>5.1}% {} {}",
                time,
                progress.scan_id,
                progress.progress,
                progress.current_phase,
                progress.message.unwrap_or_default()
            ),
            Err(_) => println!("{} [{}] {}", time, event.kind, event.data),
        },
        _ => println!("{} [{}] {}", time, event.kind, event.data),
    }
}

fn print_stats(stats: &Stats) {
    println!();
    println!("Session statistics:");
    println!(
        "  Connections: {} total, {} successful, {} failed",
        stats.total_connections, stats.successful_connections, stats.failed_connections
    );
    println!(
        "  Messages: {} sent, {} received, {} queued, {} dropped",
        stats.messages_sent, stats.messages_received, stats.messages_queued, stats.messages_dropped
    );
    println!("  Reconnect attempts: {}", stats.reconnect_attempts);
    println!("  Uptime: {}s", stats.total_uptime_ms / 1000);
    println!(
        "  Latency: {:.1} ms average, {} ms last",
        stats.average_latency_ms, stats.last_latency_ms
    );
    if let Some(error) = &stats.last_error {
        println!("  Last error: {} ({} total)", error, stats.error_count);
    }
}
