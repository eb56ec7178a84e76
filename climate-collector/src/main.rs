/**
 * CLIMATE COLLECTOR - Entry point of the telemetry ingestion service
 *
 * ROLE : subscribes to every device topic and appends what it receives
 * (telemetry, commands, status) to the record store.
 *
 * BOOT : .env -> logging -> collector.yaml -> store -> startup delay
 *        -> MQTT connect + subscribe -> ingest until Ctrl-C
 */

mod collector;
mod config;
mod dedup;
mod dto;
mod records;
mod store;

use crate::collector::TelemetryCollector;
use crate::config::{load_config, StoreBackend};
use crate::store::{JsonlStore, MemoryStore, RecordStore};

use anyhow::{Context, Result};
use climate_shared::{MqttTransport, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("climate_collector=info,climate_shared=info")),
        )
        .init();

    let cfg = load_config().await.context("Failed to load collector configuration")?;

    let store: Arc<dyn RecordStore> = match cfg.store.backend {
        StoreBackend::Jsonl => Arc::new(
            JsonlStore::open(cfg.store.path.clone())
                .with_context(|| format!("Failed to open store at {}", cfg.store.path.display()))?,
        ),
        StoreBackend::Memory => {
            info!("Using in-memory store, records are lost at exit");
            Arc::new(MemoryStore::new())
        }
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    if !cfg.startup_delay().is_zero() {
        info!("Waiting {}s before connecting", cfg.startup_delay_secs);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(cfg.startup_delay()) => {}
        }
    }

    info!("Starting telemetry collector against {}", cfg.mqtt.broker());
    let transport: Arc<dyn Transport> =
        Arc::new(MqttTransport::new(cfg.mqtt.clone(), "telemetry-collector"));
    let collector = Arc::new(TelemetryCollector::new(
        transport,
        store,
        cfg.topics.clone(),
        cfg.duplicates,
    ));

    let inbox = collector.start().await?;
    collector.run(inbox, cancel).await;
    Ok(())
}
