pub mod connector;
pub mod hbase;

use crate::errors::{ConnectError, SchemaError, WriteError};

/// One `family:qualifier` value of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn column(&self) -> String {
        format!("{}:{}", self.family, self.qualifier)
    }
}

/// The store side of a record. Writing the same row again overwrites it with
/// identical content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub cells: Vec<Cell>,
}

/// The `Store` trait defines the contract for the column-oriented destination.
///
/// `write_rows` is all-or-nothing from the caller's point of view: a backend
/// that acknowledges only part of a batch must report an error so that none
/// of the rows are considered durable.
///
/// Schema calls report `SchemaError::Unavailable` when the store cannot
/// answer yet; any other `SchemaError` is a definite answer.
#[allow(async_fn_in_trait)]
pub trait Store {
    /// A single connection attempt. Retrying is the connector's job.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    async fn list_tables(&self) -> Result<Vec<String>, SchemaError>;

    async fn create_table(&self, table: &str, column_family: &str) -> Result<(), SchemaError>;

    async fn write_rows(&self, table: &str, rows: &[Row]) -> Result<(), WriteError>;

    async fn close(&mut self);

    /// Human readable address used in log lines.
    fn endpoint(&self) -> String;
}
