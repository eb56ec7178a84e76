/**
 * DUPLICATE POLICY - What to do with at-least-once redeliveries
 *
 * The transport may deliver the same message twice. By default both copies
 * are stored. With `mode: window` the collector remembers the last N
 * (topic, payload) pairs it stored and drops exact repeats. A message that
 * failed to store is never remembered, so its redelivery still gets a chance.
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Every delivery becomes a record
    #[default]
    Disabled,
    /// Drop a message identical to one of the last `capacity` messages
    Window { capacity: usize },
}

type Fingerprint = (String, Vec<u8>);

#[derive(Default)]
struct Window {
    seen: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
}

pub struct DuplicateFilter {
    policy: DuplicatePolicy,
    window: Mutex<Window>,
}

impl DuplicateFilter {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            window: Mutex::new(Window::default()),
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Whether an identical message is still in the window
    pub fn contains(&self, topic: &str, payload: &[u8]) -> bool {
        if self.policy == DuplicatePolicy::Disabled {
            return false;
        }
        self.window.lock().seen.contains(&(topic.to_string(), payload.to_vec()))
    }

    /// Adds a message that made it to the store, evicting the oldest beyond capacity
    pub fn remember(&self, topic: &str, payload: &[u8]) {
        let capacity = match self.policy {
            DuplicatePolicy::Disabled => return,
            DuplicatePolicy::Window { capacity } => capacity,
        };

        let fingerprint = (topic.to_string(), payload.to_vec());
        let mut window = self.window.lock();
        if !window.seen.insert(fingerprint.clone()) {
            return;
        }
        window.order.push_back(fingerprint);
        while window.order.len() > capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.seen.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_filters() {
        let filter = DuplicateFilter::new(DuplicatePolicy::Disabled);
        filter.remember("devices/D1/telemetry", b"{}");
        assert!(!filter.contains("devices/D1/telemetry", b"{}"));
    }

    #[test]
    fn test_window_holds_remembered_messages_until_evicted() {
        let filter = DuplicateFilter::new(DuplicatePolicy::Window { capacity: 2 });
        assert!(!filter.contains("devices/D1/telemetry", b"a"));
        filter.remember("devices/D1/telemetry", b"a");
        assert!(filter.contains("devices/D1/telemetry", b"a"));
        // same payload on another topic is a different message
        assert!(!filter.contains("devices/D2/telemetry", b"a"));

        filter.remember("devices/D2/telemetry", b"a");
        filter.remember("devices/D1/telemetry", b"b");
        // "a" on D1 has been pushed out of the window
        assert!(!filter.contains("devices/D1/telemetry", b"a"));
        assert!(filter.contains("devices/D1/telemetry", b"b"));
    }

    #[test]
    fn test_checking_does_not_remember() {
        let filter = DuplicateFilter::new(DuplicatePolicy::Window { capacity: 4 });
        assert!(!filter.contains("devices/D1/status", b"x"));
        assert!(!filter.contains("devices/D1/status", b"x"));
    }

    #[test]
    fn test_remembering_twice_keeps_one_slot() {
        let filter = DuplicateFilter::new(DuplicatePolicy::Window { capacity: 2 });
        filter.remember("devices/D1/telemetry", b"a");
        filter.remember("devices/D1/telemetry", b"a");
        filter.remember("devices/D1/telemetry", b"b");
        assert!(filter.contains("devices/D1/telemetry", b"a"));
        assert!(filter.contains("devices/D1/telemetry", b"b"));
    }
}
