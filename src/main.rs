//! Roomcast - Room-partitioned WebSocket message relay
//!
//! Usage:
//!   roomcast [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -b, --bind <ADDR>      Bind address (default: 0.0.0.0:8080)
//!   --broker <ADDR>        Broker address (default: localhost:9092)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use roomcast::bridge::{self, BridgeClient};
use roomcast::config::Config;
use roomcast::hub::Hub;
use roomcast::server::Server;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Roomcast - room-partitioned WebSocket message relay
#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(author = "Roomcast Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Room-partitioned WebSocket message relay bridged over a durable broker topic")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for WebSocket clients
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Broker address (host:port)
    #[arg(long)]
    broker: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use defaults
    let mut config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(config_path) = &args.config {
        info!("Loaded configuration from {:?}", config_path);
    }

    // CLI args override file config
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(broker) = args.broker {
        config.broker.address = broker;
    }
    config.validate().map_err(|e| {
        eprintln!("Invalid configuration: {}", e);
        e
    })?;

    info!("Starting Roomcast relay");
    info!("  Bind address: {}", config.server.bind);
    info!("  WebSocket path: {}/<room_id>", config.server.ws_path);
    info!("  Broker: {} (topic: {}, group: {})",
        config.broker.address, config.broker.topic, config.broker.group);

    // The hub hands locally-originated messages to the publisher worker
    // through this queue; it never talks to the broker itself.
    let (publish_tx, publish_rx) = mpsc::channel(config.limits.publish_queue_capacity);
    let (hub, handle) = Hub::new(publish_tx);
    tokio::spawn(hub.run());

    // Broker bridge: one client handles both directions. Deliveries flow
    // through the feed queue and come back to the hub as external events.
    let (feed_tx, feed_rx) = mpsc::channel(config.limits.feed_queue_capacity);
    let publisher: Arc<dyn bridge::MessagePublisher> =
        BridgeClient::spawn(config.broker.clone(), feed_tx);
    tokio::spawn(bridge::run_publisher(publisher, publish_rx));
    tokio::spawn(bridge::run_feed(feed_rx, handle.clone()));

    let server = Server::new(config.server.clone(), config.limits.clone(), handle);
    server.run().await?;

    Ok(())
}
