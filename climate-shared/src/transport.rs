//! Message transport contract and its MQTT implementation
//!
//! Both the device publisher and the collector talk to the broker only through
//! the [`Transport`] trait:
//! - `publish` is fire-and-forget with at-least-once delivery (QoS 1)
//! - `subscribe` registers a handler called once per matching inbound message,
//!   from a transport-owned task, possibly with duplicates
//! - no ordering guarantee across topics or publishers

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::topics;

/// Delay before polling again after a broker connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Grace period given to the event loop to flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// A message received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every inbound message matching a subscription
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Wraps a closure into a [`MessageHandler`]
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(InboundMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {broker} failed: {reason}")]
    Connect { broker: String, reason: String },
    #[error("timed out after {timeout_secs}s waiting for {broker}")]
    ConnectTimeout { broker: String, timeout_secs: u64 },
    #[error("transport is not connected")]
    NotConnected,
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to {pattern} failed: {reason}")]
    Subscribe { pattern: String, reason: String },
    #[error("disconnect failed: {0}")]
    Disconnect(String),
}

/// Publish/subscribe capability shared by the simulator and the collector
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// `pattern` may contain `+` / `#` wildcards
    async fn subscribe(&self, pattern: &str, handler: MessageHandler)
        -> Result<(), TransportError>;
}

/// Broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Capacity of the rumqttc request channel
    pub channel_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            channel_capacity: 10,
        }
    }
}

impl MqttSettings {
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies `CLIMATE_MQTT_HOST` / `CLIMATE_MQTT_PORT` when set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CLIMATE_MQTT_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("CLIMATE_MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid CLIMATE_MQTT_PORT: {}", port),
            }
        }
    }
}

struct Subscription {
    pattern: String,
    handler: MessageHandler,
}

type Subscriptions = Arc<Mutex<Vec<Subscription>>>;

/// [`Transport`] over an MQTT broker (rumqttc, QoS AtLeastOnce)
pub struct MqttTransport {
    settings: MqttSettings,
    client_id: String,
    client: Mutex<Option<AsyncClient>>,
    subscriptions: Subscriptions,
    event_task: Mutex<Option<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Client id is `{client_prefix}-{uuid}` so that several instances can share a broker
    pub fn new(settings: MqttSettings, client_prefix: &str) -> Self {
        Self {
            client_id: format!("{}-{}", client_prefix, Uuid::new_v4().simple()),
            settings,
            client: Mutex::new(None),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            event_task: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn current_client(&self) -> Result<AsyncClient, TransportError> {
        self.client.lock().clone().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let broker = self.settings.broker();
        let mut options = MqttOptions::new(&self.client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, self.settings.channel_capacity);

        // the broker must acknowledge before anything else happens
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        };
        let timeout_secs = self.settings.connect_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(timeout_secs), handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    broker,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    broker,
                    timeout_secs,
                })
            }
        }

        self.closing.store(false, Ordering::SeqCst);
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            self.subscriptions.clone(),
            self.closing.clone(),
        ));

        *self.client.lock() = Some(client);
        if let Some(previous) = self.event_task.lock().replace(task) {
            previous.abort();
        }

        info!("Connected to MQTT broker at {} as {}", broker, self.client_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let client = self.client.lock().take();
        let task = self.event_task.lock().take();
        let Some(client) = client else {
            return Ok(());
        };

        self.closing.store(true, Ordering::SeqCst);
        let result = client
            .disconnect()
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()));

        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }

        if result.is_ok() {
            info!("Disconnected from MQTT broker ({})", self.client_id);
        }
        result
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.current_client()?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Published message to topic {}", topic);
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        let client = self.current_client()?;

        // registered before the SUBSCRIBE goes out so no early message is missed
        self.subscriptions.lock().push(Subscription {
            pattern: pattern.to_string(),
            handler,
        });

        if let Err(e) = client.subscribe(pattern, QoS::AtLeastOnce).await {
            self.subscriptions.lock().retain(|s| s.pattern != pattern);
            return Err(TransportError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            });
        }

        info!("Subscribed to topic {}", pattern);
        Ok(())
    }
}

async fn run_event_loop(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                dispatch(&subscriptions, message);
            }
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                info!("Reconnected to MQTT broker");
                if !ack.session_present {
                    resubscribe(&client, &subscriptions);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT event loop stopped after disconnect");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Calls every handler whose pattern matches the topic
fn dispatch(subscriptions: &Mutex<Vec<Subscription>>, message: InboundMessage) {
    let handlers: Vec<MessageHandler> = subscriptions
        .lock()
        .iter()
        .filter(|s| topics::matches(&message.topic, &s.pattern))
        .map(|s| s.handler.clone())
        .collect();

    if handlers.is_empty() {
        debug!("No handler for topic {}", message.topic);
        return;
    }
    for handler in handlers {
        handler(message.clone());
    }
}

fn resubscribe(client: &AsyncClient, subscriptions: &Mutex<Vec<Subscription>>) {
    for subscription in subscriptions.lock().iter() {
        if let Err(e) = client.try_subscribe(subscription.pattern.clone(), QoS::AtLeastOnce) {
            warn!("Failed to re-subscribe to {}: {}", subscription.pattern, e);
        }
    }
}
