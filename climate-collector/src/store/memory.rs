use super::{RecordStore, StoreError, TableCounts, Tables};
use crate::records::{CommandRecord, Persisted, Record, StatusRecord, TelemetryRecord};
use parking_lot::Mutex;

/// Volatile store, lost at exit
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, record: Record) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let id = match record {
            Record::Telemetry(row) => {
                let persisted = tables.telemetry.prepare(row);
                let id = persisted.id;
                tables.telemetry.insert(persisted);
                id
            }
            Record::Command(row) => {
                let persisted = tables.commands.prepare(row);
                let id = persisted.id;
                tables.commands.insert(persisted);
                id
            }
            Record::Status(row) => {
                let persisted = tables.status.prepare(row);
                let id = persisted.id;
                tables.status.insert(persisted);
                id
            }
        };
        Ok(id)
    }

    fn telemetry_for(&self, device_id: &str) -> Vec<Persisted<TelemetryRecord>> {
        self.tables.lock().telemetry.by_device(device_id)
    }

    fn commands_for(&self, device_id: &str) -> Vec<Persisted<CommandRecord>> {
        self.tables.lock().commands.by_device(device_id)
    }

    fn statuses_for(&self, device_id: &str) -> Vec<Persisted<StatusRecord>> {
        self.tables.lock().status.by_device(device_id)
    }

    fn counts(&self) -> TableCounts {
        self.tables.lock().counts()
    }
}
