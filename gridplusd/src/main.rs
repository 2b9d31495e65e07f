//! gridplusd
//!
//! Daemon regulating a Grid+ 6-channel fan controller against the CPU
//! temperature: quiet under light load, full cooling under heavy load.

mod signals;
mod supervisor;
mod thermal;

use clap::Parser;
use gridplus_core::{DaemonConfig, GridError, LogTarget, Result};
use gridplus_hardware::GridController;
use std::path::PathBuf;
use tracing::{debug, error, info};

use signals::Signals;
use supervisor::{Daemon, Supervisor};
use thermal::ThermalMonitor;

/// Grid+ fan-control daemon
#[derive(Parser, Debug)]
#[command(name = "gridplusd")]
#[command(version, about = "Grid+ fan-control daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/gridplusd/config.toml")]
    config: PathBuf,

    /// Serial device of the fan controller (overrides the config file)
    #[arg(short, long)]
    device: Option<String>,

    /// Thermal sensor name (overrides the config file)
    #[arg(short, long)]
    sensor: Option<String>,

    /// Log sink: stderr or syslog (overrides the config file)
    #[arg(short, long)]
    logger: Option<LogTarget>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args).await {
        Ok(config) => config,
        Err(e) => {
            init_tracing(args.logger.unwrap_or(LogTarget::Stderr), args.verbose);
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.logger, args.verbose);

    let controller = match GridController::open(&config.device).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("cannot access the fan controller: {}", e);
            std::process::exit(1);
        }
    };

    let monitor = match ThermalMonitor::enumerate().await {
        Ok(monitor) if monitor.is_empty() => {
            error!("no temperature sensors found");
            std::process::exit(1);
        }
        Ok(monitor) => monitor,
        Err(e) => {
            error!("cannot access the temperature monitor: {}", e);
            std::process::exit(1);
        }
    };

    debug!("found {} temperature sensors", monitor.len());
    for sensor in monitor.sensors() {
        debug!("  {}", sensor.name());
    }

    let sensor = match monitor.find(&config.sensor) {
        Some(sensor) => sensor.clone(),
        None => {
            error!("cannot find the '{}' sensor", config.sensor);
            std::process::exit(1);
        }
    };

    let signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("cannot install signal handlers: {}", e);
            std::process::exit(1);
        }
    };

    info!("started");

    let supervisor = Supervisor::new(controller, config.transfer.clone());
    let mut daemon = Daemon::new(supervisor, sensor, config.device.clone(), signals);

    if let Some(stop) = daemon.run().await {
        info!("got signal '{}' ({})", stop.name(), stop.number());
    }

    info!("terminated");
}

/// Load the configuration file and apply command-line overrides.
///
/// A missing file yields the defaults; a malformed one is fatal.
async fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config = match tokio::fs::read_to_string(&args.config).await {
        Ok(content) => DaemonConfig::from_toml(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(e) => {
            return Err(GridError::Config(format!(
                "cannot read {}: {e}",
                args.config.display()
            )))
        }
    };

    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(sensor) = &args.sensor {
        config.sensor = sensor.clone();
    }
    if let Some(logger) = args.logger {
        config.logger = logger;
    }

    config.validate()?;
    Ok(config)
}

/// Install the tracing subscriber for the selected log sink.
///
/// The syslog flavor assumes stderr is forwarded to the journal (the usual
/// systemd service setup), which stamps and prioritizes lines itself.
fn init_tracing(target: LogTarget, verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let registry = tracing_subscriber::registry().with(filter);

    match target {
        LogTarget::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogTarget::Syslog => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .without_time()
                    .with_target(false),
            )
            .init(),
    }
}
