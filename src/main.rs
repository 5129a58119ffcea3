//! zenamqp - Main Entry Point
//!
//! Loads the device list, starts one connection task per device and runs
//! until SIGINT or SIGTERM.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use zenamqp::config::CollectorConfig;
use zenamqp::error::CollectorResult;
use zenamqp::event::{EventSink, JsonLinesSink, LogEventSink};
use zenamqp::observability::{init_default_logging, metrics};
use zenamqp::task::{ConnectionTask, TaskScheduler};
use zenamqp::transport::AmqpConnector;

/// Default config locations, tried in order
const DEFAULT_CONFIG_PATHS: &[&str] = &["zenamqp.toml", "config/zenamqp.toml"];

/// AMQP queue event collector
#[derive(Parser)]
#[command(name = "zenamqp")]
#[command(about = "Collects events from AMQP queues")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ZENAMQP_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (overrides LOG_LEVEL)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume every configured queue until interrupted
    Run {
        /// Where normalized events go
        #[arg(long, value_enum, default_value_t = SinkKind::Log)]
        sink: SinkKind,
    },
    /// Validate configuration
    Config {
        /// Print the resolved configuration (passwords masked)
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Structured log lines
    Log,
    /// One JSON object per line on stdout
    Jsonl,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    apply_verbosity(cli.verbose);
    init_default_logging();

    info!("Starting zenamqp v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { sink } => run_collector(config, sink).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn apply_verbosity(verbose: u8) {
    let level = match verbose {
        0 => return,
        1 => "DEBUG",
        _ => "TRACE",
    };
    std::env::set_var("LOG_LEVEL", level);
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<CollectorConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(CollectorConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(CollectorConfig::load_from_file(path)?);
        }
    }

    Err(format!(
        "No configuration file found. Provide one with -c/--config or create {}",
        DEFAULT_CONFIG_PATHS[0]
    )
    .into())
}

fn build_sink(kind: SinkKind) -> Arc<dyn EventSink> {
    match kind {
        SinkKind::Log => Arc::new(LogEventSink::new()),
        SinkKind::Jsonl => Arc::new(JsonLinesSink::new()),
    }
}

/// Wire connector, sink and one task per device into a scheduler
fn build_scheduler(
    config: &CollectorConfig,
    sink: Arc<dyn EventSink>,
) -> CollectorResult<TaskScheduler> {
    let connector = Arc::new(AmqpConnector::new(config.connect_timeout()));
    let mut scheduler = TaskScheduler::new();

    for target in config.device_targets()? {
        info!(
            device_id = %target.device_id,
            queue = %target.queue,
            interval_secs = target.interval.as_secs(),
            "Scheduling device"
        );
        let task = ConnectionTask::new(target, connector.clone(), sink.clone())
            .with_agent(&config.collector.name)
            .with_consumer_tag(&config.collector.consumer_tag);
        scheduler.add_task(Arc::new(task));
    }

    Ok(scheduler)
}

async fn run_collector(
    config: CollectorConfig,
    sink: SinkKind,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut scheduler = build_scheduler(&config, build_sink(sink))?;
    if scheduler.tasks().is_empty() {
        warn!("No devices configured, nothing to collect");
        return Ok(());
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    scheduler.start();
    info!("Collector running with {} device(s)", scheduler.tasks().len());

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    scheduler.shutdown().await;

    for (name, state) in scheduler.states() {
        info!(task = %name, state = %state, "Final task state");
    }
    info!(metrics = ?metrics().get_metrics(), "Collector metrics");
    Ok(())
}

fn handle_config_command(
    config: &CollectorConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let targets = config.device_targets()?;

    if show {
        let mut masked = config.clone();
        for device in &mut masked.devices {
            if device.password.is_some() {
                device.password = Some("***".to_string());
            }
        }
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&masked)?);
    }

    info!(devices = targets.len(), "Configuration validation complete");
    Ok(())
}
