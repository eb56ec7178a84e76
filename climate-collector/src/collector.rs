/**
 * TELEMETRY COLLECTOR - Topic-routed ingestion of device messages
 *
 * FLOW :
 * transport handler (enqueue only) -> inbox -> one task per message
 *   -> parse topic into (deviceId, kind) -> duplicate policy
 *   -> decode DTO -> map to row -> store.append -> remember for the policy
 *
 * A failing message is logged and counted, the subscription keeps going.
 */

use crate::config::TopicPatterns;
use crate::dedup::{DuplicateFilter, DuplicatePolicy};
use crate::dto;
use crate::records::{CommandRecord, Record, StatusRecord, TelemetryRecord};
use crate::store::{RecordStore, StoreError};
use anyhow::{Context, Result};
use climate_shared::{handler, DeviceTopic, InboundMessage, MessageKind, TopicError, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("unroutable topic: {0}")]
    Topic(#[from] TopicError),
    #[error("invalid {kind} payload: {source}")]
    Decode {
        kind: MessageKind,
        source: serde_json::Error,
    },
    #[error("store rejected {kind} record: {source}")]
    Store {
        kind: &'static str,
        source: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Stored { kind: MessageKind, id: u64 },
    Duplicate,
}

#[derive(Debug, Default)]
pub struct CollectorStats {
    received: AtomicU64,
    stored: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub failed: u64,
}

impl CollectorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct TelemetryCollector {
    transport: Arc<dyn Transport>,
    store: Arc<dyn RecordStore>,
    patterns: TopicPatterns,
    duplicates: DuplicateFilter,
    stats: CollectorStats,
}

impl TelemetryCollector {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn RecordStore>,
        patterns: TopicPatterns,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            transport,
            store,
            patterns,
            duplicates: DuplicateFilter::new(policy),
            stats: CollectorStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Connects and subscribes every pattern. The returned inbox receives
    /// each inbound message; handlers never block the transport.
    pub async fn start(&self) -> Result<mpsc::UnboundedReceiver<InboundMessage>> {
        self.transport
            .connect()
            .await
            .context("Collector failed to connect to MQTT broker")?;

        let (inbox, messages) = mpsc::unbounded_channel();
        for pattern in self.patterns.all() {
            let inbox = inbox.clone();
            self.transport
                .subscribe(
                    pattern,
                    handler(move |message| {
                        // receiver gone means we are shutting down
                        let _ = inbox.send(message);
                    }),
                )
                .await
                .with_context(|| format!("Failed to subscribe to {}", pattern))?;
        }

        info!(
            "Collector subscribed to {} (duplicates: {:?})",
            self.patterns.all().join(", "),
            self.duplicates.policy()
        );
        Ok(messages)
    }

    /// Drains the inbox until cancelled, then lets in-flight messages finish and disconnects
    pub async fn run(
        self: Arc<Self>,
        mut messages: mpsc::UnboundedReceiver<InboundMessage>,
        cancel: CancellationToken,
    ) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = messages.recv() => match next {
                    Some(message) => {
                        let collector = self.clone();
                        in_flight.spawn(async move { collector.process(message) });
                    }
                    None => break,
                },
                // reap finished tasks so the set stays small
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}

        if let Err(e) = self.transport.disconnect().await {
            error!("Collector disconnect failed: {}", e);
        }

        let stats = self.stats();
        info!(
            "Collector stopped: {} received, {} stored, {} duplicates dropped, {} failed",
            stats.received, stats.stored, stats.duplicates, stats.failed
        );
    }

    /// Handles one message, logging and counting the outcome
    pub fn process(&self, message: InboundMessage) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        match self.handle_message(&message) {
            Ok(Outcome::Stored { kind, id }) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                debug!("Saved {} #{} from {}", kind, id, message.topic);
            }
            Ok(Outcome::Duplicate) => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped duplicate on {}", message.topic);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Error processing message from topic {}: {}", message.topic, e);
            }
        }
    }

    pub fn handle_message(&self, message: &InboundMessage) -> Result<Outcome, CollectError> {
        let topic = DeviceTopic::parse(&message.topic)?;

        if self.duplicates.contains(&message.topic, &message.payload) {
            return Ok(Outcome::Duplicate);
        }

        let decode_error = |source| CollectError::Decode {
            kind: topic.kind,
            source,
        };
        let record = match topic.kind {
            MessageKind::Telemetry => {
                let dto = dto::decode_telemetry(&message.payload).map_err(decode_error)?;
                warn_on_mismatch(&topic, &dto.device_id);
                Record::Telemetry(TelemetryRecord::from(dto))
            }
            MessageKind::Commands => {
                let dto = dto::decode_command(&message.payload).map_err(decode_error)?;
                Record::Command(CommandRecord::from_dto(&topic.device_id, dto))
            }
            MessageKind::Status => {
                let dto = dto::decode_status(&message.payload).map_err(decode_error)?;
                warn_on_mismatch(&topic, &dto.device_id);
                Record::Status(StatusRecord::from(dto))
            }
        };

        let kind = record.kind();
        let id = self
            .store
            .append(record)
            .map_err(|source| CollectError::Store { kind, source })?;
        self.duplicates.remember(&message.topic, &message.payload);
        Ok(Outcome::Stored {
            kind: topic.kind,
            id,
        })
    }
}

/// Payload device id is authoritative for telemetry and status rows
fn warn_on_mismatch(topic: &DeviceTopic, payload_device_id: &str) {
    if topic.device_id != payload_device_id {
        warn!(
            "Device id {:?} in payload differs from topic device {}",
            payload_device_id, topic.device_id
        );
    }
}
