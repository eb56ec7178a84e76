/**
 * WIRE DTOs - Decoded form of device messages, as seen by the collector
 *
 * Devices publish lower camel case JSON, but field names are matched
 * case-insensitively: keys are folded to lowercase before decoding, so
 * `deviceId`, `DeviceId` and `DEVICEID` are all accepted. Opaque fields
 * (command `parameters`) are kept verbatim. Unknown fields are ignored
 * and missing ones take their default value.
 */

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Fields whose content is never folded
const COMMAND_OPAQUE_FIELDS: &[&str] = &["parameters"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelemetryDto {
    #[serde(rename = "deviceid")]
    pub device_id: String,
    #[serde(rename = "devicename")]
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub sensors: SensorDataDto,
    pub actuators: ActuatorStatusDto,
    #[serde(rename = "operatingmode")]
    pub operating_mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SensorDataDto {
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "powerconsumption")]
    pub power_consumption: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ActuatorStatusDto {
    pub compressor: bool,
    pub dehumidifier: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandDto {
    pub command: String,
    pub parameters: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusDto {
    #[serde(rename = "deviceid")]
    pub device_id: String,
    #[serde(rename = "devicename")]
    pub device_name: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

pub fn decode_telemetry(payload: &[u8]) -> serde_json::Result<TelemetryDto> {
    decode(payload, &[])
}

pub fn decode_command(payload: &[u8]) -> serde_json::Result<CommandDto> {
    decode(payload, COMMAND_OPAQUE_FIELDS)
}

pub fn decode_status(payload: &[u8]) -> serde_json::Result<StatusDto> {
    decode(payload, &[])
}

/// Decodes `payload` after folding its keys to lowercase, except below `opaque` keys
pub fn decode<T: DeserializeOwned>(payload: &[u8], opaque: &[&str]) -> serde_json::Result<T> {
    let value: Value = serde_json::from_slice(payload)?;
    serde_json::from_value(fold_keys(value, opaque))
}

fn fold_keys(value: Value, opaque: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut folded = Map::with_capacity(map.len());
            for (key, inner) in map {
                let key = key.to_lowercase();
                let inner = if opaque.contains(&key.as_str()) {
                    inner
                } else {
                    fold_keys(inner, opaque)
                };
                folded.insert(key, inner);
            }
            Value::Object(folded)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| fold_keys(v, opaque)).collect()),
        other => other,
    }
}
