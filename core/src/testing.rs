//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::buffer::BatchWriter;
use crate::errors::{ConnectError, SchemaError, SourceError, WriteError};
use crate::sink::{Cell, Row, Store};
use crate::source::{MessageBatch, OffsetCursor, Position, Source, SourceMessage};

pub fn message(offset: i64, payload: &str) -> SourceMessage {
    SourceMessage {
        payload: payload.as_bytes().to_vec(),
        key: None,
        topic: "orders".to_string(),
        position: Position::new(0, offset),
        headers: HashMap::new(),
    }
}

pub fn order_json(id: &str) -> String {
    format!(
        r#"{{"order_id":"{id}","user_id":7,"category":"games","price":59.99,"quantity":1,"order_time":"2024-05-01T10:30:00Z","status":"NEW"}}"#
    )
}

/// Valid orders `ORD<first>`..`ORD<first + count - 1>` at matching offsets.
pub fn orders(first: i64, count: i64) -> Vec<SourceMessage> {
    (first..first + count)
        .map(|i| message(i, &order_json(&format!("ORD{i:04}"))))
        .collect()
}

pub fn row(key: &str) -> Row {
    Row {
        key: key.to_string(),
        cells: vec![Cell {
            family: "info".to_string(),
            qualifier: "status".to_string(),
            value: b"NEW".to_vec(),
        }],
    }
}

fn keys(rows: &[Row]) -> Vec<String> {
    rows.iter().map(|r| r.key.clone()).collect()
}

#[derive(Default)]
struct RecordingState {
    fail_remaining: u32,
    flushes: Vec<Vec<String>>,
}

/// Records successful flushes by row key; fails the first `n` writes.
#[derive(Default)]
pub struct RecordingWriter {
    state: Mutex<RecordingState>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(n: u32) -> Self {
        let writer = Self::default();
        writer.state.lock().unwrap().fail_remaining = n;
        writer
    }

    pub fn flushes(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().flushes.clone()
    }
}

impl BatchWriter for RecordingWriter {
    async fn write_batch(&self, _table: &str, rows: &[Row]) -> Result<(), WriteError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(WriteError::Rejected {
                rows: rows.len(),
                status: 503,
                body: "injected".to_string(),
            });
        }
        state.flushes.push(keys(rows));
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    refuse_connections: u32,
    hang_connections: u32,
    connect_calls: u32,
    schema_rejection: Option<String>,
    unavailable_schema: u32,
    hang_schema: u32,
    tables: Vec<(String, String)>,
    create_calls: u32,
    fail_writes: u32,
    hang_writes: u32,
    write_calls: u32,
    flushes: Vec<Vec<String>>,
    cells: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    closed: bool,
}

/// In-memory column store with failure injection. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(self, n: u32) -> Self {
        self.state.lock().unwrap().refuse_connections = n;
        self
    }

    pub fn hang_connections(self, n: u32) -> Self {
        self.state.lock().unwrap().hang_connections = n;
        self
    }

    pub fn reject_schema(self, reason: &str) -> Self {
        self.state.lock().unwrap().schema_rejection = Some(reason.to_string());
        self
    }

    /// The next `n` table listings report the store as unavailable.
    pub fn unavailable_schema(self, n: u32) -> Self {
        self.state.lock().unwrap().unavailable_schema = n;
        self
    }

    pub fn hang_schema(self, n: u32) -> Self {
        self.state.lock().unwrap().hang_schema = n;
        self
    }

    pub fn fail_writes(self, n: u32) -> Self {
        self.state.lock().unwrap().fail_writes = n;
        self
    }

    pub fn hang_writes(self, n: u32) -> Self {
        self.state.lock().unwrap().hang_writes = n;
        self
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.lock().unwrap().connect_calls
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn tables(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tables.clone()
    }

    pub fn write_calls(&self) -> u32 {
        self.state.lock().unwrap().write_calls
    }

    /// Row keys of every acknowledged write, in order.
    pub fn flushes(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().flushes.clone()
    }

    /// Stored contents: row key -> column -> value.
    pub fn contents(&self) -> BTreeMap<String, BTreeMap<String, Vec<u8>>> {
        self.state.lock().unwrap().cells.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Store for MemoryStore {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.connect_calls += 1;
            if state.refuse_connections > 0 {
                state.refuse_connections -= 1;
                return Err(ConnectError::Unreachable {
                    endpoint: "memory".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            if state.hang_connections > 0 {
                state.hang_connections -= 1;
                true
            } else {
                state.closed = false;
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            if state.unavailable_schema > 0 {
                state.unavailable_schema -= 1;
                return Err(SchemaError::Unavailable {
                    reason: "master is initializing".to_string(),
                });
            }
            if state.hang_schema > 0 {
                state.hang_schema -= 1;
                true
            } else {
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        Ok(state.tables.iter().map(|(table, _)| table.clone()).collect())
    }

    async fn create_table(&self, table: &str, column_family: &str) -> Result<(), SchemaError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if let Some(reason) = &state.schema_rejection {
            return Err(SchemaError::Rejected {
                table: table.to_string(),
                reason: reason.clone(),
            });
        }
        if state.tables.iter().any(|(t, _)| t == table) {
            return Err(SchemaError::AlreadyExists {
                table: table.to_string(),
            });
        }
        state
            .tables
            .push((table.to_string(), column_family.to_string()));
        Ok(())
    }

    async fn write_rows(&self, _table: &str, rows: &[Row]) -> Result<(), WriteError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.write_calls += 1;
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(WriteError::Rejected {
                    rows: rows.len(),
                    status: 503,
                    body: "injected".to_string(),
                });
            }
            if state.hang_writes > 0 {
                state.hang_writes -= 1;
                true
            } else {
                for row in rows {
                    let stored = state.cells.entry(row.key.clone()).or_default();
                    for cell in &row.cells {
                        stored.insert(cell.column(), cell.value.clone());
                    }
                }
                state.flushes.push(keys(rows));
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Default)]
struct SourceState {
    batches: VecDeque<Vec<SourceMessage>>,
    commits: Vec<OffsetCursor>,
    fail_commits: u32,
    fail_polls: u32,
    unrecoverable_polls: bool,
    shut_down: bool,
    exhausted: Option<oneshot::Sender<()>>,
}

/// Serves scripted batches, then empty ones. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<SourceState>>,
}

impl ScriptedSource {
    pub fn new(batches: Vec<Vec<SourceMessage>>) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().batches = batches.into();
        source
    }

    pub fn fail_commits(self, n: u32) -> Self {
        self.state.lock().unwrap().fail_commits = n;
        self
    }

    pub fn fail_polls(self, n: u32) -> Self {
        self.state.lock().unwrap().fail_polls = n;
        self
    }

    pub fn unrecoverable_polls(self) -> Self {
        self.state.lock().unwrap().unrecoverable_polls = true;
        self
    }

    /// Resolves once every scripted batch has been handed out.
    pub fn exhausted(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().exhausted = Some(tx);
        rx
    }

    pub fn commits(&self) -> Vec<OffsetCursor> {
        self.state.lock().unwrap().commits.clone()
    }

    /// Highest offset committed for partition 0, if any.
    pub fn committed_offset(&self) -> Option<i64> {
        self.commits().iter().filter_map(|c| c.offset(0)).max()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }
}

impl Source for ScriptedSource {
    async fn next_batch(&self) -> Result<MessageBatch, SourceError> {
        let exhausted = {
            let mut state = self.state.lock().unwrap();
            if state.unrecoverable_polls {
                return Err(SourceError::Unrecoverable("broker gone".into()));
            }
            if state.fail_polls > 0 {
                state.fail_polls -= 1;
                return Err(SourceError::Transient {
                    source: "poll timed out".into(),
                });
            }
            if let Some(batch) = state.batches.pop_front() {
                return Ok(MessageBatch::new(batch));
            }
            state.exhausted.take()
        };
        if let Some(tx) = exhausted {
            let _ = tx.send(());
        }
        tokio::task::yield_now().await;
        Ok(MessageBatch::default())
    }

    async fn commit(&self, cursor: &OffsetCursor) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(SourceError::Transient {
                source: "commit timed out".into(),
            });
        }
        state.commits.push(cursor.clone());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SourceError> {
        self.state.lock().unwrap().shut_down = true;
        Ok(())
    }
}
