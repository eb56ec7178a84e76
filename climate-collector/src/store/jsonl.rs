/**
 * JSONL STORE - One append-only JSON-lines file per table
 *
 * Layout under the store directory:
 *   telemetry.jsonl / commands.jsonl / status.jsonl
 * Each line is a `Persisted<T>` (id + row + createdAt). On startup the files
 * are replayed to rebuild ids and the (deviceId, timestamp) index; an
 * unreadable line (ex: torn write at crash) is skipped with a warning.
 * After a failed or partial write the next row starts on a fresh line, so a
 * fragment never swallows the row written after it.
 */

use super::{RecordStore, StoreError, Table, TableCounts, Tables};
use crate::records::{CommandRecord, Persisted, Record, Row, StatusRecord, TelemetryRecord};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const TELEMETRY_FILE: &str = "telemetry.jsonl";
pub const COMMANDS_FILE: &str = "commands.jsonl";
pub const STATUS_FILE: &str = "status.jsonl";

/// Append side of one table file
struct Journal<W = File> {
    out: W,
    /// The file may end with an unterminated fragment
    torn: bool,
}

impl<W: Write> Journal<W> {
    fn new(out: W, torn: bool) -> Self {
        Self { out, torn }
    }

    /// `line` must end with a newline
    fn append_line(&mut self, line: &[u8]) -> io::Result<()> {
        let written = self.write_line(line);
        self.torn = written.is_err();
        written
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.torn {
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(line)?;
        self.out.flush()
    }
}

struct Files {
    telemetry: Journal,
    commands: Journal,
    status: Journal,
}

struct Inner {
    tables: Tables,
    files: Files,
}

pub struct JsonlStore {
    inner: Mutex<Inner>,
}

impl JsonlStore {
    /// Opens (or creates) the store in `dir` and replays existing rows
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let (telemetry, telemetry_file) = load_table(&dir.join(TELEMETRY_FILE))?;
        let (commands, commands_file) = load_table(&dir.join(COMMANDS_FILE))?;
        let (status, status_file) = load_table(&dir.join(STATUS_FILE))?;

        let tables = Tables {
            telemetry,
            commands,
            status,
        };
        let counts = tables.counts();
        info!(
            "JSONL store opened at {} ({} telemetry, {} commands, {} status rows)",
            dir.display(),
            counts.telemetry,
            counts.commands,
            counts.status
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                tables,
                files: Files {
                    telemetry: telemetry_file,
                    commands: commands_file,
                    status: status_file,
                },
            }),
        })
    }
}

impl RecordStore for JsonlStore {
    fn append(&self, record: Record) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let Inner { tables, files } = &mut *inner;
        match record {
            Record::Telemetry(row) => append_row(&mut tables.telemetry, &mut files.telemetry, row),
            Record::Command(row) => append_row(&mut tables.commands, &mut files.commands, row),
            Record::Status(row) => append_row(&mut tables.status, &mut files.status, row),
        }
    }

    fn telemetry_for(&self, device_id: &str) -> Vec<Persisted<TelemetryRecord>> {
        self.inner.lock().tables.telemetry.by_device(device_id)
    }

    fn commands_for(&self, device_id: &str) -> Vec<Persisted<CommandRecord>> {
        self.inner.lock().tables.commands.by_device(device_id)
    }

    fn statuses_for(&self, device_id: &str) -> Vec<Persisted<StatusRecord>> {
        self.inner.lock().tables.status.by_device(device_id)
    }

    fn counts(&self) -> TableCounts {
        self.inner.lock().tables.counts()
    }
}

/// The line hits the file before the row becomes visible in memory
fn append_row<T: Row, W: Write>(
    table: &mut Table<T>,
    journal: &mut Journal<W>,
    row: T,
) -> Result<u64, StoreError> {
    let persisted = table.prepare(row);
    let mut line = serde_json::to_vec(&persisted)?;
    line.push(b'\n');
    journal.append_line(&line)?;

    let id = persisted.id;
    table.insert(persisted);
    Ok(id)
}

fn load_table<T: Row>(path: &Path) -> Result<(Table<T>, Journal), StoreError> {
    let mut table = Table::new();
    let mut torn = false;

    if path.exists() {
        let content = fs::read_to_string(path)?;
        torn = !content.is_empty() && !content.ends_with('\n');
        replay(&mut table, &content, path);
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok((table, Journal::new(file, torn)))
}

fn replay<T: Row>(table: &mut Table<T>, content: &str, path: &Path) {
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Persisted<T>>(line) {
            Ok(persisted) => table.insert(persisted),
            Err(e) => warn!("Skipping line {} of {}: {}", n + 1, path.display(), e),
        }
    }
}
