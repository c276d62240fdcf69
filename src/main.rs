//! Bytebeam device runtime - main entry point

use bytebeam_device::actions::ActionRegistry;
use bytebeam_device::config::DeviceConfig;
use bytebeam_device::device::DeviceRuntime;
use bytebeam_device::observability::{init_default_logging, init_logging, LogFormat};
use bytebeam_device::transport::mqtt::MqttClient;
use bytebeam_device::transport::Transport;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info, Level};

/// Bytebeam device runtime
#[derive(Parser)]
#[command(name = "bytebeam-device")]
#[command(about = "Device-side runtime for Bytebeam actions and telemetry")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BYTEBEAM_CONFIG")]
    config: Option<PathBuf>,

    /// Bytebeam provisioning file (device_config.json) used instead of a TOML config
    #[arg(long, value_name = "FILE", conflicts_with = "config")]
    provisioning: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and serve actions until interrupted
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

    init_observability(cli.verbose);

    info!(
        "Starting bytebeam-device v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match load_configuration(cli.config.as_deref(), cli.provisioning.as_deref()) {
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

fn init_observability(verbose: u8) {
    if verbose == 0 {
        init_default_logging();
        return;
    }

    let level = if verbose == 1 { Level::DEBUG } else { Level::TRACE };
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    init_logging(level, LogFormat::parse(&format), false);
}

fn load_configuration(
    config_path: Option<&Path>,
    provisioning_path: Option<&Path>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = provisioning_path {
        info!("Loading provisioning file: {}", path.display());
        return Ok(DeviceConfig::load_provisioning_file(path)?);
    }

    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for candidate in ["device.toml", "config/device.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DeviceConfig::load_from_file(path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create device.toml".into())
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        device_id = %config.device.id,
        project_id = %config.device.project_id,
        "Device starting"
    );

    let transport = MqttClient::new(&config)?;
    let registry = ActionRegistry::new();
    let mut runtime = DeviceRuntime::new(config, transport, registry);

    runtime.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Device is running and waiting for actions");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = monitor_connection_health(&runtime) => {
            error!("MQTT connection permanently lost, shutting down device...");
        }
    }

    runtime.shutdown().await?;
    Ok(())
}

fn handle_config_command(
    config: &DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves once the transport has given up reconnecting
async fn monitor_connection_health<T: Transport + 'static>(runtime: &DeviceRuntime<T>) {
    loop {
        if runtime.is_permanently_disconnected() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
}
