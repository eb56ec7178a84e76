//! Engine actor: the only owner of a device's `SimulationEngine`
//!
//! Tick requests (from the publisher loop) and commands (from the MQTT handler)
//! share one unbounded queue and are drained in arrival order by a single task,
//! so a tick and a command never interleave.

use climate_shared::{DeviceCommand, DeviceState};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::SimulationEngine;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("simulation engine for {0} has stopped")]
    Stopped(String),
}

enum EngineRequest {
    /// Advance one tick and report the resulting state
    Tick(oneshot::Sender<DeviceState>),
    Command(DeviceCommand),
    Snapshot(oneshot::Sender<DeviceState>),
}

/// Cloneable handle to a running engine actor
#[derive(Clone)]
pub struct EngineHandle {
    device_id: String,
    sender: mpsc::UnboundedSender<EngineRequest>,
}

impl EngineHandle {
    /// Moves the engine into its own task. The task ends (returning the engine)
    /// once every handle has been dropped.
    pub fn spawn<R>(device_id: &str, engine: SimulationEngine<R>) -> (Self, JoinHandle<SimulationEngine<R>>)
    where
        R: Rng + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_engine(device_id.to_string(), engine, receiver));
        (
            Self {
                device_id: device_id.to_string(),
                sender,
            },
            task,
        )
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn tick(&self) -> Result<DeviceState, EngineError> {
        let (reply, state) = oneshot::channel();
        self.send(EngineRequest::Tick(reply))?;
        state.await.map_err(|_| self.stopped())
    }

    /// Non-blocking: safe to call from a transport callback
    pub fn submit_command(&self, command: DeviceCommand) -> Result<(), EngineError> {
        self.send(EngineRequest::Command(command))
    }

    /// Current state without advancing the simulation
    pub async fn snapshot(&self) -> Result<DeviceState, EngineError> {
        let (reply, state) = oneshot::channel();
        self.send(EngineRequest::Snapshot(reply))?;
        state.await.map_err(|_| self.stopped())
    }

    fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.sender.send(request).map_err(|_| self.stopped())
    }

    fn stopped(&self) -> EngineError {
        EngineError::Stopped(self.device_id.clone())
    }
}

async fn run_engine<R: Rng>(
    device_id: String,
    mut engine: SimulationEngine<R>,
    mut requests: mpsc::UnboundedReceiver<EngineRequest>,
) -> SimulationEngine<R> {
    while let Some(request) = requests.recv().await {
        match request {
            EngineRequest::Tick(reply) => {
                engine.update_state();
                // the requester may have been cancelled meanwhile
                let _ = reply.send(engine.state().clone());
            }
            EngineRequest::Command(command) => {
                engine.process_command(&command);
            }
            EngineRequest::Snapshot(reply) => {
                let _ = reply.send(engine.state().clone());
            }
        }
    }

    debug!("Engine for {} stopped", device_id);
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use climate_shared::OperatingMode;

    #[tokio::test]
    async fn test_requests_are_applied_in_arrival_order() {
        let engine = SimulationEngine::seeded(SimulationConfig::default(), 1);
        let (handle, task) = EngineHandle::spawn("D1", engine);

        handle.submit_command(DeviceCommand::new("energy_saving")).unwrap();
        let state = handle.tick().await.unwrap();
        assert_eq!(state.mode, OperatingMode::EnergySaving);

        handle.submit_command(DeviceCommand::new("activate_compressor")).unwrap();
        handle.submit_command(DeviceCommand::new("normal_mode")).unwrap();
        let state = handle.snapshot().await.unwrap();
        assert_eq!(state.mode, OperatingMode::Normal);
        assert!(!state.compressor_active);

        drop(handle);
        let engine = task.await.unwrap();
        assert_eq!(engine.state().mode, OperatingMode::Normal);
    }

    #[tokio::test]
    async fn test_commands_from_other_threads_are_serialized() {
        let engine = SimulationEngine::seeded(SimulationConfig::default(), 8);
        let (handle, _task) = EngineHandle::spawn("D1", engine);

        let mut writers = Vec::new();
        for i in 0..8 {
            let handle = handle.clone();
            writers.push(std::thread::spawn(move || {
                let name = if i % 2 == 0 { "ACTIVATE_COMPRESSOR" } else { "ENERGY_SAVING" };
                for _ in 0..50 {
                    handle.submit_command(DeviceCommand::new(name)).unwrap();
                }
            }));
        }

        for _ in 0..100 {
            let state = handle.tick().await.unwrap();
            let expected = crate::engine::nominal_power(&state);
            assert!((state.power_consumption - expected).abs() <= 10.0);
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_stopped_engine_reports_error() {
        let engine = SimulationEngine::seeded(SimulationConfig::default(), 1);
        let (handle, task) = EngineHandle::spawn("D9", engine);
        task.abort();
        let _ = task.await;

        let err = handle.tick().await.unwrap_err();
        assert_eq!(err.to_string(), "simulation engine for D9 has stopped");
    }
}
