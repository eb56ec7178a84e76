//! Simulator configuration
//!
//! Handles:
//! - MQTT broker settings (with `CLIMATE_MQTT_HOST` / `CLIMATE_MQTT_PORT` overrides)
//! - The list of simulated devices and their publish cadence
//! - Simulation thresholds, shared or overridden per device
//!
//! Loaded from TOML at `$CLIMATE_SIMULATOR_CONFIG` (default `simulator.toml`).

use anyhow::{bail, Context, Result};
use climate_shared::MqttSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "CLIMATE_SIMULATOR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "simulator.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub mqtt: MqttSettings,
    /// Thresholds shared by every device, field by field overridable per device
    pub simulation: SimulationConfig,
    pub devices: Vec<DeviceSettings>,
}

/// One simulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub device_id: String,
    pub device_name: String,
    pub publish_interval_ms: u64,
    /// Pause after a failed tick before the loop resumes
    pub error_backoff_ms: u64,
    /// Fixed RNG seed for reproducible runs, entropy when absent
    pub seed: Option<u64>,
    pub simulation: Option<SimulationOverrides>,
}

/// Drift and actuation parameters of the simulation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub temperature_setpoint: f64,
    pub humidity_setpoint: f64,
    pub temperature_max_threshold: f64,
    pub humidity_max_threshold: f64,
    pub temperature_min_threshold: f64,
    pub humidity_min_threshold: f64,
    /// Probability that a Normal-mode tick drifts upwards
    pub increase_chance: f64,
    pub max_temperature_change: f64,
    pub max_humidity_change: f64,
}

/// Per-device `[devices.simulation]` table; a field left out keeps the shared value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOverrides {
    pub temperature_setpoint: Option<f64>,
    pub humidity_setpoint: Option<f64>,
    pub temperature_max_threshold: Option<f64>,
    pub humidity_max_threshold: Option<f64>,
    pub temperature_min_threshold: Option<f64>,
    pub humidity_min_threshold: Option<f64>,
    pub increase_chance: Option<f64>,
    pub max_temperature_change: Option<f64>,
    pub max_humidity_change: Option<f64>,
}

impl SimulationOverrides {
    pub fn apply(&self, shared: &SimulationConfig) -> SimulationConfig {
        let mut merged = shared.clone();
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(
                    if let Some(value) = self.$field {
                        merged.$field = value;
                    }
                )*
            };
        }
        overlay!(
            temperature_setpoint,
            humidity_setpoint,
            temperature_max_threshold,
            humidity_max_threshold,
            temperature_min_threshold,
            humidity_min_threshold,
            increase_chance,
            max_temperature_change,
            max_humidity_change
        );
        merged
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            temperature_setpoint: 22.0,
            humidity_setpoint: 50.0,
            temperature_max_threshold: 26.0,
            humidity_max_threshold: 65.0,
            temperature_min_threshold: 18.0,
            humidity_min_threshold: 30.0,
            increase_chance: 0.7,
            max_temperature_change: 0.5,
            max_humidity_change: 2.0,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            device_id: "SIM-001".to_string(),
            device_name: "Climate Controller Simulator".to_string(),
            publish_interval_ms: 5_000,
            error_backoff_ms: 5_000,
            seed: None,
            simulation: None,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            simulation: SimulationConfig::default(),
            devices: vec![DeviceSettings::default()],
        }
    }
}

impl DeviceSettings {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl SimulationConfig {
    fn validate(&self, device_id: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.increase_chance) {
            bail!("{device_id}: increase_chance must be within [0, 1]");
        }
        if self.max_temperature_change < 0.0 || self.max_humidity_change < 0.0 {
            bail!("{device_id}: max change per tick cannot be negative");
        }
        if !(self.temperature_min_threshold <= self.temperature_setpoint
            && self.temperature_setpoint <= self.temperature_max_threshold)
        {
            bail!("{device_id}: temperature thresholds must satisfy min <= setpoint <= max");
        }
        if !(self.humidity_min_threshold <= self.humidity_setpoint
            && self.humidity_setpoint <= self.humidity_max_threshold)
        {
            bail!("{device_id}: humidity thresholds must satisfy min <= setpoint <= max");
        }
        Ok(())
    }
}

impl SimulatorConfig {
    /// Load config from `$CLIMATE_SIMULATOR_CONFIG`, falling back to defaults when absent
    pub async fn load() -> Result<Self> {
        let path = Self::config_file_path();
        let mut config = Self::load_from(&path).await?;
        config.mqtt.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("No simulator config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: SimulatorConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid simulator config {}", path.display()))?;

        info!("Loaded simulator config from {}", path.display());
        Ok(config)
    }

    pub fn config_file_path() -> PathBuf {
        std::env::var(CONFIG_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into())
            .into()
    }

    /// Simulation parameters effective for a device
    pub fn simulation_for(&self, device: &DeviceSettings) -> SimulationConfig {
        match &device.simulation {
            Some(overrides) => overrides.apply(&self.simulation),
            None => self.simulation.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("at least one device must be configured");
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.device_id.is_empty() || device.device_id.contains(|c| matches!(c, '/' | '+' | '#')) {
                bail!("invalid device id '{}'", device.device_id);
            }
            if !seen.insert(device.device_id.as_str()) {
                bail!("duplicate device id '{}'", device.device_id);
            }
            if device.publish_interval_ms == 0 {
                bail!("{}: publish_interval_ms must be positive", device.device_id);
            }
            self.simulation_for(device).validate(&device.device_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].device_id, "SIM-001");
        assert_eq!(config.devices[0].publish_interval(), Duration::from_secs(5));
        assert_eq!(config.simulation.temperature_max_threshold, 26.0);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_devices_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[mqtt]
host = "broker.lan"
port = 1884

[simulation]
increase_chance = 0.5

[[devices]]
device_id = "AC-1"
device_name = "Office"
publish_interval_ms = 1000

[[devices]]
device_id = "AC-2"
device_name = "Server room"

[devices.simulation]
temperature_setpoint = 19.0
temperature_max_threshold = 21.0
temperature_min_threshold = 16.0
"#
        )
        .unwrap();

        let config = SimulatorConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].publish_interval_ms, 1000);
        assert_eq!(config.devices[1].publish_interval_ms, 5000);

        let office = config.simulation_for(&config.devices[0]);
        assert_eq!(office.increase_chance, 0.5);
        let server_room = config.simulation_for(&config.devices[1]);
        assert_eq!(server_room.temperature_setpoint, 19.0);
        assert_eq!(server_room.temperature_max_threshold, 21.0);
        assert_eq!(server_room.humidity_setpoint, 50.0);
        // untouched fields come from the shared table, not the built-in defaults
        assert_eq!(server_room.increase_chance, 0.5);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let config = SimulatorConfig::load_from(Path::new("/nonexistent/simulator.toml"))
            .await
            .unwrap();
        assert_eq!(config, SimulatorConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_devices() {
        let mut config = SimulatorConfig::default();
        config.devices.push(DeviceSettings::default());
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.devices[0].device_id = "a/b".into();
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.simulation.temperature_min_threshold = 30.0;
        assert!(config.validate().is_err());

        // the override alone looks fine, merged with the shared max it is not
        let mut config = SimulatorConfig::default();
        config.devices[0].simulation = Some(SimulationOverrides {
            temperature_setpoint: Some(28.0),
            ..SimulationOverrides::default()
        });
        assert!(config.validate().is_err());
    }
}
