/*!
Test harness for components talking to a [`Transport`](climate_shared::Transport)

Wraps a [`MockTransport`] with:
- Expectations on the number of messages per topic
- Polling waits for asynchronous publishers
- Assertions on JSON fields of published messages
*/

use crate::mqtt_stub::{ClimateMessageBuilder, MockTransport};
use climate_shared::DeviceTopic;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use anyhow::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct TestHarness {
    pub transport: MockTransport,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            transport: MockTransport::new(),
            expectations: Vec::new(),
        }
    }

    /// Harness whose transport delivers publishes back to subscribers
    pub fn loopback() -> Self {
        Self {
            transport: MockTransport::loopback(),
            ..Self::new()
        }
    }

    /// Expect exactly `count` messages on `topic` at verification time
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    pub async fn send_json(&self, topic: &str, payload: &Value) -> Result<usize> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(self.transport.simulate_incoming(topic, bytes).await)
    }

    pub async fn send_telemetry(&self, device_id: &str, temperature: f64, humidity: f64) -> Result<usize> {
        let payload = ClimateMessageBuilder::telemetry(device_id, temperature, humidity);
        let topic = DeviceTopic::telemetry(device_id).to_topic();
        log::info!("🌡️ Sending telemetry for {}", device_id);
        self.send_json(&topic, &payload).await
    }

    pub async fn send_command(&self, device_id: &str, command: &str) -> Result<usize> {
        let payload = ClimateMessageBuilder::command(command, None);
        let topic = DeviceTopic::commands(device_id).to_topic();
        log::info!("⚡ Sending command {} to {}", command, device_id);
        self.send_json(&topic, &payload).await
    }

    /// Waits until at least `count` messages were published on `topic`
    pub async fn wait_for_messages(&self, topic: &str, count: usize, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        while Instant::now() < deadline {
            if self.transport.find_messages_by_topic(topic).len() >= count {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        log::warn!("⏰ Timeout waiting for {} message(s) on {}", count, topic);
        false
    }

    /// Polls `condition` until it holds or the timeout expires
    pub async fn wait_until<F>(&self, timeout_ms: u64, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        condition()
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.transport.find_messages_by_topic(&expectation.topic).len();

            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic, expectation.expected_count, actual_count
                );
            }
        }

        log::info!("✅ {} expectations verified", self.expectations.len());
        Ok(())
    }

    /// `field_path` is dot separated, e.g. `sensors.temperature`
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.transport.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("No message published on {}", topic);
        };

        match get_nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path, expected, actual
            ),
            None => anyhow::bail!("Field '{}' not found in latest message on {}", field_path, topic),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.transport.get_published_messages();
        let mut topic_counts = HashMap::new();

        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.transport.get_subscriptions(),
        }
    }

}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_shared::{handler, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new();
        harness.transport.connect().await.unwrap();
        harness.expect_messages("devices/D1/telemetry", 1);

        let payload = ClimateMessageBuilder::telemetry("D1", 21.5, 48.0);
        harness
            .transport
            .publish("devices/D1/telemetry", serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();

        harness.verify_expectations().unwrap();
        harness
            .assert_field_equals("devices/D1/telemetry", "sensors.temperature", &Value::from(21.5))
            .unwrap();
        assert!(harness
            .assert_field_equals("devices/D1/telemetry", "sensors.missing", &Value::Null)
            .is_err());

        let stats = harness.get_stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.topic_counts["devices/D1/telemetry"], 1);
    }

    #[tokio::test]
    async fn test_send_helpers_reach_subscribers() {
        let harness = TestHarness::new();
        harness.transport.connect().await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        harness
            .transport
            .subscribe(
                "devices/#",
                handler(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        assert_eq!(harness.send_telemetry("D1", 20.0, 45.0).await.unwrap(), 1);
        assert_eq!(harness.send_command("D1", "normal_mode").await.unwrap(), 1);
        assert!(harness.wait_until(100, || received.load(Ordering::SeqCst) == 2).await);
    }

    #[tokio::test]
    async fn test_wait_for_messages_times_out() {
        let harness = TestHarness::new();
        assert!(!harness.wait_for_messages("devices/D1/status", 1, 30).await);
    }
}
