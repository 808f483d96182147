use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use gatekeeper_config::ConfigStore;
use gatekeeper_domain::identifier::DeviceId;
use gatekeeper_domain::observation::Advertisement;
use gatekeeper_mqtt::{MqttTransport, PresencePublisher};
use gatekeeper_tracker::engine::Engine;
use gatekeeper_tracker::service;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// base directory holding the config/ folder
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// override the broker host from mqtt.json
    #[arg(long)]
    broker: Option<String>,

    /// run without the hub's own radio (satellite observations only)
    #[arg(long)]
    no_local_scan: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let store = Arc::new(ConfigStore::open(&args.base_dir)?);
    let mut mqtt_settings = store.load_mqtt();
    if let Some(broker) = args.broker {
        mqtt_settings.broker = broker;
    }
    info!(
        broker = %mqtt_settings.broker,
        port = mqtt_settings.port,
        identity = %mqtt_settings.identity,
        "starting gatekeeper"
    );

    let engine = Engine::new(store.clone());
    let (tracker, inbound) = service::channel(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (transport, bus_task) =
        MqttTransport::connect(&mqtt_settings, tracker.clone(), shutdown_rx.clone());
    let publisher = Arc::new(PresencePublisher::new(
        Arc::new(transport.clone()),
        &mqtt_settings,
    ));

    // Retained discovery configs for the hub and every tracked device.
    if let Err(err) = publisher.publish_discovery(&store.list_devices()).await {
        warn!(%err, "initial discovery publish failed");
    }

    let tracker_task = tokio::spawn(service::run(
        engine,
        inbound,
        publisher.clone(),
        shutdown_rx.clone(),
    ));

    // Prime the hub so it registers as a satellite right away.
    tracker
        .observe_local(Advertisement::new(DeviceId::mac("00:00:00:00:00:00"), -100))
        .await;

    let scanner_task = if args.no_local_scan {
        None
    } else {
        let tracker = tracker.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = gatekeeper_scanner::run(tracker, shutdown).await {
                warn!(%err, "local scanner unavailable");
            }
        }))
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown_tx.send(true).ok();

    tracker_task.await.ok();
    if let Some(task) = scanner_task {
        task.await.ok();
    }
    transport.disconnect().await;
    bus_task.await.ok();
    info!("stopped");
    Ok(())
}
