/**
 * RECORD STORE - Append-only persistence for collected messages
 *
 * Three tables (telemetry, commands, status), each with:
 * - an auto-assigned integer id, starting at 1
 * - an ingestion timestamp (`createdAt`)
 * - a (deviceId, timestamp) index for per-device queries
 *
 * Backends:
 * - `MemoryStore` : process lifetime only (tests, dry runs)
 * - `JsonlStore`  : one JSON-lines file per table, reloaded on startup
 *
 * Every backend serializes its writes behind a single `parking_lot::Mutex`.
 */

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use crate::records::{CommandRecord, Persisted, Record, Row, StatusRecord, TelemetryRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence capability handed to the collector
pub trait RecordStore: Send + Sync {
    /// Appends a row and returns the id it was given
    fn append(&self, record: Record) -> Result<u64, StoreError>;

    /// Rows of one device, oldest first
    fn telemetry_for(&self, device_id: &str) -> Vec<Persisted<TelemetryRecord>>;

    fn commands_for(&self, device_id: &str) -> Vec<Persisted<CommandRecord>>;

    fn statuses_for(&self, device_id: &str) -> Vec<Persisted<StatusRecord>>;

    fn counts(&self) -> TableCounts;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub telemetry: usize,
    pub commands: usize,
    pub status: usize,
}

/// One in-memory table plus its (deviceId, timestamp) index
pub struct Table<T> {
    rows: Vec<Persisted<T>>,
    next_id: u64,
    /// device id -> (timestamp, id) -> position in `rows`
    index: BTreeMap<String, BTreeMap<(DateTime<Utc>, u64), usize>>,
}

impl<T: Row> Table<T> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
            index: BTreeMap::new(),
        }
    }

    /// Assigns the next id and the ingestion time without storing the row yet
    pub fn prepare(&self, row: T) -> Persisted<T> {
        Persisted {
            id: self.next_id,
            row,
            created_at: Utc::now(),
        }
    }

    /// Inserts a row that already has an id (fresh from `prepare`, or reloaded)
    pub fn insert(&mut self, persisted: Persisted<T>) {
        self.next_id = self.next_id.max(persisted.id + 1);
        self.index
            .entry(persisted.row.device_id().to_string())
            .or_default()
            .insert((persisted.row.timestamp(), persisted.id), self.rows.len());
        self.rows.push(persisted);
    }

    pub fn by_device(&self, device_id: &str) -> Vec<Persisted<T>> {
        self.index
            .get(device_id)
            .map(|entries| entries.values().map(|&pos| self.rows[pos].clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

impl<T: Row> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three tables, guarded together by the owning store
#[derive(Default)]
pub struct Tables {
    pub telemetry: Table<TelemetryRecord>,
    pub commands: Table<CommandRecord>,
    pub status: Table<StatusRecord>,
}

impl Tables {
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            telemetry: self.telemetry.len(),
            commands: self.commands.len(),
            status: self.status.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(device_id: &str, ts: &str) -> StatusRecord {
        StatusRecord {
            device_id: device_id.into(),
            device_name: "N".into(),
            status: "online".into(),
            timestamp: ts.parse().unwrap(),
        }
    }

    #[test]
    fn test_ids_are_sequential_and_index_orders_by_timestamp() {
        let mut table = Table::new();
        for (device, ts) in [
            ("D1", "2024-01-01T00:00:05Z"),
            ("D2", "2024-01-01T00:00:01Z"),
            ("D1", "2024-01-01T00:00:02Z"),
            ("D1", "2024-01-01T00:00:02Z"),
        ] {
            let row = table.prepare(status(device, ts));
            table.insert(row);
        }

        assert_eq!(table.len(), 4);
        let d1 = table.by_device("D1");
        let ids: Vec<u64> = d1.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4, 1]);
        assert!(table.by_device("D3").is_empty());
    }

    #[test]
    fn test_reloaded_ids_continue_the_sequence() {
        let mut table = Table::new();
        let mut row = table.prepare(status("D1", "2024-01-01T00:00:00Z"));
        row.id = 41;
        table.insert(row);
        assert_eq!(table.prepare(status("D1", "2024-01-01T00:00:01Z")).id, 42);
    }
}
