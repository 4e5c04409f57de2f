//! Homie device daemon
//!
//! Publishes host load and memory as a Homie `system` node. The publish interval can be
//! changed at runtime through `<base><device>/system/interval/set`.

use homie_device::config::HomieConfig;
use homie_device::device::{Device, Node};
use homie_device::error::HomieResult;
use homie_device::observability::init_default_logging;
use homie_device::publisher::{format_duration, parse_duration, IntervalControl, PeriodicPublisher};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Homie convention device over MQTT
#[derive(Parser)]
#[command(name = "homie-device")]
#[command(about = "Homie 3.0.1 device publishing host statistics over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "HOMIE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and publish until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting homie-device v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<HomieConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(HomieConfig::load_from_file(path)?);
    }

    for candidate in ["homie.toml", "config/homie.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(HomieConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create homie.toml".into())
}

fn handle_config_command(config: &HomieConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid for device {}", config.device.id);

    if show {
        let mut shown = config.clone();
        if shown.mqtt.password.is_some() {
            shown.mqtt.password = Some("********".to_string());
        }
        println!("{}", toml::to_string_pretty(&shown)?);
    }
    Ok(())
}

async fn run_device(config: HomieConfig) -> Result<(), Box<dyn std::error::Error>> {
    let interval = parse_duration(&config.publish.interval)?;
    let device = Device::from_config(config);

    // the interval property handler only holds a weak reference
    let _interval_control = build_system_node(&device, interval)?;
    PeriodicPublisher::device_stats(&device)?;

    device.connect().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(device = %device.name(), "Device is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    device.close_publishers();
    device.disconnect().await?;
    Ok(())
}

/// Build the `system` node, its publisher and the settable interval property
fn build_system_node(
    device: &Arc<Device>,
    interval: std::time::Duration,
) -> HomieResult<Arc<IntervalControl>> {
    let node = device.new_node("system", "host")?;
    node.new_property("load", "float")?;
    node.new_property("memory", "integer")?;
    let interval_property = node.new_property("interval", "string")?;
    interval_property.set_value(format_duration(interval));

    let publisher = PeriodicPublisher::new(interval)?;
    publisher.add_node_publisher(&node, publish_host_stats)?;

    let control = IntervalControl::new(publisher);
    interval_property.set_handler(control.handler());
    Ok(control)
}

fn publish_host_stats(node: &Node) -> HomieResult<()> {
    if let Some(load) = node.property("load") {
        match read_load_average() {
            Some(value) => {
                load.set_value(value);
                load.publish()?;
            }
            None => warn!("Load average unavailable"),
        }
    }
    if let Some(memory) = node.property("memory") {
        match read_available_memory_kb() {
            Some(value) => {
                memory.set_value(value.to_string());
                memory.publish()?;
            }
            None => warn!("Memory statistics unavailable"),
        }
    }
    Ok(())
}

/// One-minute load average from `/proc/loadavg`
fn read_load_average() -> Option<String> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    content.split_whitespace().next().map(str::to_string)
}

/// `MemAvailable` from `/proc/meminfo`, in kB
fn read_available_memory_kb() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    content
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}
