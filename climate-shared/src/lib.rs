//! Climate Shared - messages and transport common to the device simulator and the collector
//!
//! This crate carries everything both sides of the pipeline must agree on:
//! - Topic layout (`devices/{id}/telemetry|commands|status`) and wildcard matching
//! - Wire messages (telemetry, status, commands, operating modes)
//! - The `Transport` contract and its MQTT implementation (rumqttc)

pub mod messages;
pub mod topics;
pub mod transport;

pub use messages::{
    ActuatorStatus, DeviceCommand, DeviceState, DeviceStatus, DeviceTelemetry, OperatingMode,
    SensorData, StatusMessage,
};
pub use topics::{DeviceTopic, MessageKind, TopicError};
pub use transport::{
    handler, InboundMessage, MessageHandler, MqttSettings, MqttTransport, Transport,
    TransportError,
};
