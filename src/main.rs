//! Dew point controller - main entry point
//!
//! Wires the MQTT broker handle, the connection manager, and the sensor
//! service together and runs them until SIGINT or SIGTERM. The `relay`
//! command sends a single relay command and exits.

use dewpoint_controller::config::ControllerConfig;
use dewpoint_controller::connection::ConnectionManager;
use dewpoint_controller::error::ControllerResult;
use dewpoint_controller::lifecycle_span;
use dewpoint_controller::observability::init_default_logging;
use dewpoint_controller::service::{Relay, RelayClient, RelayCommand, SensorService};
use dewpoint_controller::transport::{BrokerHandle, MqttBroker, TopicAdapter};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn, Instrument};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["dewpoint.toml", "config/dewpoint.toml"];

/// Publishes dew point and enthalpy for HVAC air sensors over MQTT
#[derive(Parser)]
#[command(name = "dewpoint-controller")]
#[command(about = "Derives dew point and enthalpy from MQTT sensor readings")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
    /// Send one command to a relay
    Relay {
        /// dehumidification_1, dehumidification_2 or humidification
        relay: Relay,
        /// toggle, on or off
        command: RelayCommand,
    },
}

type TaskSlot = Option<JoinHandle<ControllerResult<()>>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!(
        "Starting dewpoint-controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_controller(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Relay { relay, command } => send_relay_command(&config, relay, command).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<ControllerConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ControllerConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ControllerConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults and environment");
    Ok(ControllerConfig::from_env()?)
}

async fn run_controller(config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let span = lifecycle_span!(
        event = "run",
        client_id = %config.mqtt.client_id,
        app_env = ?config.app_env
    );

    run_tasks(config).instrument(span).await
}

async fn run_tasks(config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Arc::new(MqttBroker::new(config.mqtt.clone())?);
    let manager = Arc::new(ConnectionManager::from_config(Arc::clone(&broker), &config));
    let events = manager
        .events()
        .ok_or("connection event stream already taken")?;
    let adapter = Arc::new(TopicAdapter::new(Arc::clone(&broker)));
    let mut service = SensorService::from_config(adapter, &config);

    let (service_stop_tx, service_stop_rx) = watch::channel(false);
    let (manager_stop_tx, manager_stop_rx) = watch::channel(false);

    let mut service_task: TaskSlot = Some(tokio::spawn(async move {
        service.run(events, service_stop_rx).await
    }));
    let mut manager_task: TaskSlot = Some({
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run(manager_stop_rx).await })
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(
        broker_url = %config.mqtt.broker_url,
        sensors = config.sensors.locations.len(),
        "Controller running"
    );

    let mut failure = None;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        Some(result) = join(&mut manager_task) => {
            failure = task_failure("connection manager", result);
        }
        Some(result) = join(&mut service_task) => {
            failure = task_failure("sensor service", result);
        }
    }

    // service first so its final flush still has a connection
    let grace_period = config.service.grace_period();
    let stopped = tokio::time::timeout(grace_period, async {
        let _ = service_stop_tx.send(true);
        if let Some(result) = join(&mut service_task).await {
            failure = failure.take().or(task_failure("sensor service", result));
        }
        let _ = manager_stop_tx.send(true);
        if let Some(result) = join(&mut manager_task).await {
            failure = failure.take().or(task_failure("connection manager", result));
        }
    })
    .await;

    if stopped.is_err() {
        warn!(?grace_period, "Shutdown grace period elapsed, aborting tasks");
        for handle in [service_task.take(), manager_task.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    info!(reconnects = manager.reconnect_count(), "Controller stopped");
    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

/// Await a task still held in `slot`, emptying the slot
async fn join(slot: &mut TaskSlot) -> Option<Result<ControllerResult<()>, JoinError>> {
    let handle = slot.as_mut()?;
    let result = handle.await;
    *slot = None;
    Some(result)
}

fn task_failure(name: &str, result: Result<ControllerResult<()>, JoinError>) -> Option<String> {
    match result {
        Ok(Ok(())) => {
            info!("{} finished", name);
            None
        }
        Ok(Err(e)) => {
            error!(
                error = %e,
                configuration = e.is_configuration_error(),
                "{} failed",
                name
            );
            Some(format!("{name} failed: {e}"))
        }
        Err(e) => {
            error!(error = %e, "{} task panicked or was cancelled", name);
            Some(format!("{name} task ended abnormally: {e}"))
        }
    }
}

async fn send_relay_command(
    config: &ControllerConfig,
    relay: Relay,
    command: RelayCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    // own client id so a running controller keeps its session
    let mut mqtt = config.mqtt.clone();
    mqtt.client_id = format!("{}-relay", mqtt.client_id);
    let broker = Arc::new(MqttBroker::new(mqtt)?);
    broker.connect(true).await?;

    let relays = RelayClient::new(
        Arc::new(TopicAdapter::new(Arc::clone(&broker))),
        config.sensors.topic_prefix.clone(),
    );
    let result = relays.set(relay, command).await;

    if let Err(e) = broker.shutdown().await {
        warn!(error = %e, "Broker shutdown after relay command failed");
    }
    Ok(result?)
}

fn handle_config_command(
    config: &ControllerConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
