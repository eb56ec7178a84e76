//! Device publisher: drives one engine on a timer and bridges it to the transport
//!
//! Lifecycle:
//! connect -> subscribe `devices/{id}/commands` -> publish "online"
//! -> loop { tick, publish telemetry, sleep } until cancelled
//! -> publish "offline" (best effort) -> disconnect

use anyhow::{Context, Result};
use climate_shared::{
    handler, DeviceCommand, DeviceStatus, DeviceTelemetry, DeviceTopic, InboundMessage,
    StatusMessage, Transport,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actor::EngineHandle;
use crate::config::DeviceSettings;

pub struct DevicePublisher {
    transport: Arc<dyn Transport>,
    engine: EngineHandle,
    device: DeviceSettings,
    telemetry_topic: String,
    commands_topic: String,
    status_topic: String,
}

impl DevicePublisher {
    pub fn new(transport: Arc<dyn Transport>, engine: EngineHandle, device: DeviceSettings) -> Self {
        Self {
            telemetry_topic: DeviceTopic::telemetry(&device.device_id).to_topic(),
            commands_topic: DeviceTopic::commands(&device.device_id).to_topic(),
            status_topic: DeviceTopic::status(&device.device_id).to_topic(),
            transport,
            engine,
            device,
        }
    }

    /// Full lifecycle. Only a failed connect/subscribe is returned as an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.start().await?;
        self.run_simulation_loop(&cancel).await;
        self.stop().await;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.transport
            .connect()
            .await
            .with_context(|| format!("{}: failed to connect to MQTT broker", self.device.device_id))?;

        let engine = self.engine.clone();
        let subscribed = self
            .transport
            .subscribe(
                &self.commands_topic,
                handler(move |message| handle_command_message(&engine, &message)),
            )
            .await;
        if let Err(e) = subscribed {
            if let Err(teardown) = self.transport.disconnect().await {
                warn!("Disconnect after failed subscribe also failed: {}", teardown);
            }
            return Err(e).context("Failed to subscribe to command topic");
        }

        self.publish_status(DeviceStatus::Online).await;
        Ok(())
    }

    pub async fn run_simulation_loop(&self, cancel: &CancellationToken) {
        info!(
            "Starting simulation loop for device {} ({})",
            self.device.device_id, self.device.device_name
        );

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick_and_publish() => outcome,
            };

            let pause = match outcome {
                Ok(()) => self.device.publish_interval(),
                Err(e) => {
                    error!("Error in simulation loop for {}: {:#}", self.device.device_id, e);
                    self.device.error_backoff()
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Simulation loop ended for {}", self.device.device_id);
    }

    /// Best effort: failures are logged, never returned
    pub async fn stop(&self) {
        if let Ok(state) = self.engine.snapshot().await {
            info!(
                "Final state of {}: {:.1}°C, {:.1}%, mode {}",
                self.device.device_id, state.temperature, state.humidity, state.mode
            );
        }
        self.publish_status(DeviceStatus::Offline).await;
        if let Err(e) = self.transport.disconnect().await {
            error!("Failed to disconnect {} from MQTT broker: {}", self.device.device_id, e);
        }
    }

    async fn tick_and_publish(&self) -> Result<()> {
        let state = self.engine.tick().await?;
        let telemetry =
            DeviceTelemetry::from_state(&self.device.device_id, &self.device.device_name, &state);
        let payload = serde_json::to_vec(&telemetry).context("Failed to serialize telemetry")?;

        match self.transport.publish(&self.telemetry_topic, payload).await {
            Ok(()) => debug!(
                "Published telemetry - Temp: {:.1}°C, Humidity: {:.1}%, Power: {:.0}W",
                telemetry.sensors.temperature,
                telemetry.sensors.humidity,
                telemetry.sensors.power_consumption
            ),
            Err(e) => warn!("Dropped telemetry for {}: {}", self.device.device_id, e),
        }
        Ok(())
    }

    async fn publish_status(&self, status: DeviceStatus) {
        let message = StatusMessage::new(&self.device.device_id, &self.device.device_name, status);
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize status message: {}", e);
                return;
            }
        };

        match self.transport.publish(&self.status_topic, payload).await {
            Ok(()) => info!("Device {} is {}", self.device.device_id, status),
            Err(e) => warn!("Failed to publish {} status for {}: {}", status, self.device.device_id, e),
        }
    }
}

/// Decodes an inbound command and queues it on the engine; bad payloads are dropped
fn handle_command_message(engine: &EngineHandle, message: &InboundMessage) {
    let command: DeviceCommand = match serde_json::from_slice(&message.payload) {
        Ok(command) => command,
        Err(e) => {
            error!("Failed to decode command on {}: {}", message.topic, e);
            return;
        }
    };

    if let Err(e) = engine.submit_command(command) {
        error!("Failed to queue command for {}: {}", engine.device_id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::engine::SimulationEngine;
    use climate_devkit::{MockTransport, TestHarness};
    use climate_shared::OperatingMode;
    use serde_json::Value;
    use std::time::Duration;

    fn fast_device(device_id: &str) -> DeviceSettings {
        DeviceSettings {
            device_id: device_id.to_string(),
            device_name: "Test unit".to_string(),
            publish_interval_ms: 10,
            error_backoff_ms: 10,
            seed: None,
            simulation: None,
        }
    }

    fn publisher(transport: &MockTransport, device_id: &str) -> (DevicePublisher, EngineHandle) {
        let engine = SimulationEngine::seeded(SimulationConfig::default(), 1);
        let (handle, _task) = EngineHandle::spawn(device_id, engine);
        let publisher = DevicePublisher::new(
            Arc::new(transport.clone()),
            handle.clone(),
            fast_device(device_id),
        );
        (publisher, handle)
    }

    async fn run_for(publisher: DevicePublisher, duration: Duration) -> Result<()> {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            stopper.cancel();
        });
        publisher.run(cancel).await
    }

    #[tokio::test]
    async fn test_lifecycle_publishes_status_and_telemetry() {
        let mut harness = TestHarness::new();
        let (publisher, _engine) = publisher(&harness.transport, "D1");

        run_for(publisher, Duration::from_millis(80)).await.unwrap();

        harness.expect_messages("devices/D1/status", 2);
        harness.verify_expectations().unwrap();
        assert_eq!(harness.get_stats().subscriptions, vec!["devices/D1/commands"]);

        let transport = &harness.transport;
        let statuses = transport.find_messages_by_topic("devices/D1/status");
        let first: Value = serde_json::from_slice(&statuses[0].payload).unwrap();
        assert_eq!(first["status"], "online");
        harness
            .assert_field_equals("devices/D1/status", "status", &Value::from("offline"))
            .unwrap();
        harness
            .assert_field_equals("devices/D1/status", "deviceId", &Value::from("D1"))
            .unwrap();

        assert!(!transport.find_messages_by_topic("devices/D1/telemetry").is_empty());
        harness
            .assert_field_equals("devices/D1/telemetry", "deviceName", &Value::from("Test unit"))
            .unwrap();
        harness
            .assert_field_equals("devices/D1/telemetry", "operatingMode", &Value::from("Normal"))
            .unwrap();
        let sample = transport
            .get_last_json_message::<Value>("devices/D1/telemetry")
            .unwrap()
            .unwrap();
        assert!(sample["sensors"]["temperature"].is_f64());

        assert!(!transport.is_connected());
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_inbound_command_changes_mode() {
        let harness = TestHarness::new();
        let (publisher, engine) = publisher(&harness.transport, "D2");
        publisher.start().await.unwrap();

        let reached = harness.send_command("D2", "activate_compressor").await.unwrap();
        assert_eq!(reached, 1);

        let state = engine.tick().await.unwrap();
        assert_eq!(state.mode, OperatingMode::ForcedCooling);
        assert!(state.compressor_active);
    }

    #[tokio::test]
    async fn test_malformed_command_is_dropped() {
        let transport = MockTransport::new();
        let (publisher, engine) = publisher(&transport, "D3");
        publisher.start().await.unwrap();

        transport
            .simulate_incoming("devices/D3/commands", b"not json".to_vec())
            .await;
        transport
            .simulate_incoming("devices/D3/commands", br#"{"parameters":{}}"#.to_vec())
            .await;

        let state = engine.snapshot().await.unwrap();
        assert_eq!(state.mode, OperatingMode::Normal);
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let transport = MockTransport::new();
        transport.set_connect_failure(true);
        let (publisher, _engine) = publisher(&transport, "D4");

        let result = run_for(publisher, Duration::from_millis(30)).await;
        assert!(result.is_err());
        assert!(transport.get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failures_do_not_stop_the_loop() {
        let harness = TestHarness::new();
        let transport = harness.transport.clone();
        let (publisher, _engine) = publisher(&transport, "D5");
        publisher.start().await.unwrap();
        transport.set_publish_failure(true);

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let looping = tokio::spawn(async move {
            publisher.run_simulation_loop(&loop_cancel).await;
            publisher
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(transport.find_messages_by_topic("devices/D5/telemetry").is_empty());

        transport.set_publish_failure(false);
        assert!(harness.wait_for_messages("devices/D5/telemetry", 1, 1000).await);
        cancel.cancel();
        let publisher = looping.await.unwrap();
        publisher.stop().await;
    }

    #[tokio::test]
    async fn test_tick_errors_are_retried_until_cancelled() {
        let transport = MockTransport::new();
        let engine = SimulationEngine::seeded(SimulationConfig::default(), 1);
        let (handle, task) = EngineHandle::spawn("D6", engine);
        task.abort();
        let _ = task.await;

        let publisher = DevicePublisher::new(Arc::new(transport.clone()), handle, fast_device("D6"));
        run_for(publisher, Duration::from_millis(50)).await.unwrap();

        assert!(transport.find_messages_by_topic("devices/D6/telemetry").is_empty());
        let statuses = transport.find_messages_by_topic("devices/D6/status");
        assert_eq!(statuses.len(), 2, "online and offline status still published");
    }
}
