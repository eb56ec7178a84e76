/*!
In-memory transport for tests without a broker

Records every publish and subscription. Inbound traffic is injected with
`simulate_incoming`, or produced by the transport itself in loopback mode,
where each publish is also delivered to the matching subscribers.
*/

use async_trait::async_trait;
use climate_shared::topics;
use climate_shared::{InboundMessage, MessageHandler, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct MockSubscription {
    pattern: String,
    handler: MessageHandler,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    loopback: bool,
    fail_connect: bool,
    fail_publish: bool,
    connect_count: usize,
    disconnect_count: usize,
    published: Vec<MockMessage>,
    subscriptions: Vec<MockSubscription>,
}

/// Clones share the same recorded state
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes are delivered back to matching subscribers, like a local broker
    pub fn loopback() -> Self {
        let transport = Self::new();
        transport.state.lock().loopback = true;
        transport
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Delivers a message to every matching handler, returns how many were reached
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> usize
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
        };
        log::info!("📨 [MOCK] Simulated incoming: {}", message.topic);
        self.deliver(message)
    }

    fn deliver(&self, message: InboundMessage) -> usize {
        // handlers run outside the lock, they may publish
        let handlers: Vec<MessageHandler> = self
            .state
            .lock()
            .subscriptions
            .iter()
            .filter(|s| topics::matches(&message.topic, &s.pattern))
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            handler(message.clone());
        }
        handlers.len()
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.state.lock().published.clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.pattern.clone())
            .collect()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parses the last message published on a topic
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        match messages.last() {
            Some(last_msg) => Ok(Some(serde_json::from_slice(&last_msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnect_count
    }

    /// Forgets recorded messages and subscriptions
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.published.clear();
        state.subscriptions.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(TransportError::Connect {
                broker: "mock".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.connected = true;
        state.connect_count += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.connected {
            state.connected = false;
            state.disconnect_count += 1;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let loopback = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_publish {
                return Err(TransportError::Publish {
                    topic: topic.to_string(),
                    reason: "simulated failure".to_string(),
                });
            }
            state.published.push(MockMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
            state.loopback
        };

        log::info!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        if loopback {
            self.deliver(InboundMessage {
                topic: topic.to_string(),
                payload,
            });
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, handler: MessageHandler) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.push(MockSubscription {
            pattern: pattern.to_string(),
            handler,
        });
        log::info!("📥 [MOCK] Subscribed to {}", pattern);
        Ok(())
    }
}

/// Payloads in the device wire format (camelCase JSON)
pub struct ClimateMessageBuilder;

impl ClimateMessageBuilder {
    pub fn telemetry(device_id: &str, temperature: f64, humidity: f64) -> Value {
        serde_json::json!({
            "deviceId": device_id,
            "deviceName": format!("{} simulator", device_id),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "sensors": {
                "temperature": temperature,
                "humidity": humidity,
                "powerConsumption": 100.0
            },
            "actuators": {
                "compressor": false,
                "dehumidifier": false
            },
            "operatingMode": "Normal"
        })
    }

    pub fn command(command: &str, parameters: Option<Value>) -> Value {
        let mut message = serde_json::json!({
            "command": command,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        if let Some(parameters) = parameters {
            message["parameters"] = parameters;
        }
        message
    }

    pub fn status(device_id: &str, status: &str) -> Value {
        serde_json::json!({
            "deviceId": device_id,
            "deviceName": format!("{} simulator", device_id),
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_shared::handler;

    #[tokio::test]
    async fn test_mock_transport_publish_subscribe() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        transport
            .subscribe("devices/+/commands", handler(|_| {}))
            .await
            .unwrap();
        assert_eq!(transport.get_subscriptions(), vec!["devices/+/commands"]);

        transport
            .publish("devices/D1/telemetry", b"test message".to_vec())
            .await
            .unwrap();

        let messages = transport.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "devices/D1/telemetry");
        assert_eq!(messages[0].payload, b"test message");
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.publish("devices/D1/status", Vec::new()).await,
            Err(TransportError::NotConnected)
        ));

        transport.set_connect_failure(true);
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_loopback_reaches_matching_subscribers() {
        let transport = MockTransport::loopback();
        transport.connect().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport
            .subscribe("devices/+/telemetry", handler(move |msg| sink.lock().push(msg.topic)))
            .await
            .unwrap();

        transport.publish("devices/D1/telemetry", b"{}".to_vec()).await.unwrap();
        transport.publish("devices/D1/status", b"{}".to_vec()).await.unwrap();

        assert_eq!(*seen.lock(), vec!["devices/D1/telemetry".to_string()]);
    }

    #[tokio::test]
    async fn test_json_message_parsing() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        let payload = serde_json::to_vec(&ClimateMessageBuilder::telemetry("D1", 24.5, 40.0)).unwrap();
        transport.publish("devices/D1/telemetry", payload).await.unwrap();

        let parsed: Option<Value> = transport.get_last_json_message("devices/D1/telemetry").unwrap();
        let parsed = parsed.unwrap();
        assert_eq!(parsed["deviceId"], "D1");
        assert_eq!(parsed["sensors"]["temperature"], 24.5);
    }

    #[test]
    fn test_message_builders() {
        let command = ClimateMessageBuilder::command("energy_saving", Some(serde_json::json!({"level": 2})));
        assert_eq!(command["command"], "energy_saving");
        assert_eq!(command["parameters"]["level"], 2);
        assert!(ClimateMessageBuilder::command("normal_mode", None).get("parameters").is_none());

        let status = ClimateMessageBuilder::status("D2", "online");
        assert_eq!(status["status"], "online");
    }
}
