/**
 * RECORDS - Persisted rows, one table per message kind
 *
 * A row is the DTO flattened into the stored shape. The store wraps it in
 * `Persisted<T>`, adding the auto-assigned id and the ingestion time.
 * Rows are append-only: never updated, never deleted.
 */

use crate::dto::{CommandDto, StatusDto, TelemetryDto};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common view used by the (deviceId, timestamp) index
pub trait Row: Clone + Serialize + for<'de> Deserialize<'de> + Send + 'static {
    fn device_id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub power_consumption: f64,
    pub compressor_active: bool,
    pub dehumidifier_active: bool,
    pub operating_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub device_id: String,
    pub command: String,
    /// Parameters serialized as JSON text
    pub parameters: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub device_id: String,
    pub device_name: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persisted<T> {
    pub id: u64,
    #[serde(flatten)]
    pub row: T,
    pub created_at: DateTime<Utc>,
}

/// A row on its way to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Telemetry(TelemetryRecord),
    Command(CommandRecord),
    Status(StatusRecord),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Telemetry(_) => "telemetry",
            Record::Command(_) => "command",
            Record::Status(_) => "status",
        }
    }
}

impl From<TelemetryDto> for TelemetryRecord {
    fn from(dto: TelemetryDto) -> Self {
        Self {
            device_id: dto.device_id,
            device_name: dto.device_name,
            timestamp: dto.timestamp,
            temperature: dto.sensors.temperature,
            humidity: dto.sensors.humidity,
            power_consumption: dto.sensors.power_consumption,
            compressor_active: dto.actuators.compressor,
            dehumidifier_active: dto.actuators.dehumidifier,
            operating_mode: dto.operating_mode,
        }
    }
}

impl CommandRecord {
    /// Commands carry no device id in their payload, it comes from the topic
    pub fn from_dto(device_id: &str, dto: CommandDto) -> Self {
        Self {
            device_id: device_id.to_string(),
            command: dto.command,
            parameters: dto
                .parameters
                .map(|p| serde_json::Value::Object(p).to_string()),
            timestamp: dto.timestamp,
        }
    }
}

impl From<StatusDto> for StatusRecord {
    fn from(dto: StatusDto) -> Self {
        Self {
            device_id: dto.device_id,
            device_name: dto.device_name,
            status: dto.status,
            timestamp: dto.timestamp,
        }
    }
}

macro_rules! impl_row {
    ($($ty:ty),+) => {
        $(impl Row for $ty {
            fn device_id(&self) -> &str {
                &self.device_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        })+
    };
}

impl_row!(TelemetryRecord, CommandRecord, StatusRecord);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::decode_command;

    #[test]
    fn test_command_record_takes_topic_device_id() {
        let dto = decode_command(br#"{"command":"energy_saving","parameters":{"level":2}}"#).unwrap();
        let record = CommandRecord::from_dto("AC-7", dto);
        assert_eq!(record.device_id, "AC-7");
        assert_eq!(record.parameters.as_deref(), Some(r#"{"level":2}"#));

        let dto = decode_command(br#"{"command":"normal_mode"}"#).unwrap();
        assert_eq!(CommandRecord::from_dto("AC-7", dto).parameters, None);
    }

    #[test]
    fn test_persisted_row_is_flat() {
        let persisted = Persisted {
            id: 3,
            row: StatusRecord {
                device_id: "D1".into(),
                device_name: "N".into(),
                status: "online".into(),
                timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            },
            created_at: "2024-01-01T00:00:01Z".parse().unwrap(),
        };

        let json = serde_json::to_value(&persisted).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["deviceId"], "D1");
        assert_eq!(json["createdAt"], "2024-01-01T00:00:01Z");

        let back: Persisted<StatusRecord> = serde_json::from_value(json).unwrap();
        assert_eq!(back, persisted);
    }
}
