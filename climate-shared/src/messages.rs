//! Wire messages exchanged between simulated devices and the collector
//!
//! All payloads are JSON with lower camel case field names and RFC 3339 timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating mode of a climate device. Always exactly one of four variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperatingMode {
    #[default]
    Normal,
    ForcedCooling,
    ForcedDehumidifying,
    EnergySaving,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Normal => "Normal",
            OperatingMode::ForcedCooling => "ForcedCooling",
            OperatingMode::ForcedDehumidifying => "ForcedDehumidifying",
            OperatingMode::EnergySaving => "EnergySaving",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(OperatingMode::Normal),
            "ForcedCooling" => Ok(OperatingMode::ForcedCooling),
            "ForcedDehumidifying" => Ok(OperatingMode::ForcedDehumidifying),
            "EnergySaving" => Ok(OperatingMode::EnergySaving),
            other => Err(format!("unknown operating mode: {other}")),
        }
    }
}

/// Internal state of one simulated device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// Celsius, never clamped
    pub temperature: f64,
    /// Percent, never clamped
    pub humidity: f64,
    /// Watts
    pub power_consumption: f64,
    pub compressor_active: bool,
    pub dehumidifier_active: bool,
    pub mode: OperatingMode,
    pub last_update: DateTime<Utc>,
}

/// Remote command addressed to one device (`devices/{id}/commands`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    /// Command name, matched case-insensitively (ex: "activate_compressor")
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl DeviceCommand {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            parameters: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorData {
    pub temperature: f64,
    pub humidity: f64,
    pub power_consumption: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorStatus {
    pub compressor: bool,
    pub dehumidifier: bool,
}

/// Telemetry snapshot published once per tick (`devices/{id}/telemetry`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTelemetry {
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub sensors: SensorData,
    pub actuators: ActuatorStatus,
    pub operating_mode: String,
}

impl DeviceTelemetry {
    /// Builds the published snapshot of a state, sensor values rounded to two decimals
    pub fn from_state(device_id: &str, device_name: &str, state: &DeviceState) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            timestamp: Utc::now(),
            sensors: SensorData {
                temperature: round2(state.temperature),
                humidity: round2(state.humidity),
                power_consumption: round2(state.power_consumption),
            },
            actuators: ActuatorStatus {
                compressor: state.compressor_active,
                dehumidifier: state.dehumidifier_active,
            },
            operating_mode: state.mode.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle announcement (`devices/{id}/status`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub device_id: String,
    pub device_name: String,
    pub status: DeviceStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusMessage {
    pub fn new(device_id: &str, device_name: &str, status: DeviceStatus) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            status,
            timestamp: Utc::now(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
