//! Climate Simulator - simulated climate controllers publishing over MQTT
//!
//! Each configured device gets:
//! - its own simulation engine, owned by an actor task
//! - its own MQTT connection (client id `{device_id}-{uuid}`)
//! - a publisher loop emitting telemetry on `devices/{id}/telemetry`
//!   and accepting commands on `devices/{id}/commands`
//!
//! Ctrl-C stops every loop; each device then reports "offline" and disconnects.

mod actor;
mod config;
mod engine;
mod publisher;

use anyhow::{Context, Result};
use climate_shared::{MqttTransport, Transport};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::actor::EngineHandle;
use crate::config::SimulatorConfig;
use crate::engine::SimulationEngine;
use crate::publisher::DevicePublisher;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("climate_simulator=info,climate_shared=info")),
        )
        .init();

    info!("Climate simulator starting...");

    let config = SimulatorConfig::load()
        .await
        .context("Failed to load simulator configuration")?;
    info!(
        "Simulating {} device(s) against {}",
        config.devices.len(),
        config.mqtt.broker()
    );

    let cancel = CancellationToken::new();
    let mut publishers = JoinSet::new();

    for device in &config.devices {
        let simulation = config.simulation_for(device);
        let engine = match device.seed {
            Some(seed) => SimulationEngine::seeded(simulation, seed),
            None => SimulationEngine::new(simulation),
        };
        let (handle, _engine_task) = EngineHandle::spawn(&device.device_id, engine);
        let transport: Arc<dyn Transport> =
            Arc::new(MqttTransport::new(config.mqtt.clone(), &device.device_id));

        let publisher = DevicePublisher::new(transport, handle, device.clone());
        let cancel = cancel.clone();
        let device_id = device.device_id.clone();
        publishers.spawn(async move {
            publisher
                .run(cancel)
                .await
                .with_context(|| format!("Device {} failed", device_id))
        });
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let mut failures = 0usize;
    while let Some(joined) = publishers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                error!("{:#}", e);
            }
            Err(e) => {
                failures += 1;
                error!("Publisher task panicked: {}", e);
            }
        }
    }

    if failures == config.devices.len() {
        anyhow::bail!("no device could be started");
    }

    info!("Climate simulator stopped");
    Ok(())
}
