use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HBaseOptions;
use crate::errors::{ConnectError, SchemaError, WriteError};
use crate::sink::{Row, Store};

/// Multi-row puts go to `/<table>/<any row key>`; the gateway takes the keys
/// from the cell set.
const BATCH_ROW_PLACEHOLDER: &str = "false-row-key";

/// HBase reached through its REST gateway.
///
/// Keys, columns and values travel base64 encoded in JSON cell sets. A put is
/// applied by the gateway as one request and answered with a single status,
/// so there is no partial acknowledgment to reconcile.
pub struct HBaseStore {
    http: reqwest::Client,
    base_url: String,
    connected: bool,
}

#[derive(Serialize)]
struct CellSetModel {
    #[serde(rename = "Row")]
    rows: Vec<RowModel>,
}

#[derive(Serialize)]
struct RowModel {
    key: String,
    #[serde(rename = "Cell")]
    cells: Vec<CellModel>,
}

#[derive(Serialize)]
struct CellModel {
    column: String,
    #[serde(rename = "$")]
    value: String,
}

#[derive(Serialize)]
struct TableSchemaModel<'a> {
    name: &'a str,
    #[serde(rename = "ColumnSchema")]
    column_schema: Vec<ColumnSchemaModel<'a>>,
}

#[derive(Serialize)]
struct ColumnSchemaModel<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct TableListModel {
    #[serde(default)]
    table: Vec<TableModel>,
}

#[derive(Deserialize)]
struct TableModel {
    name: String,
}

impl HBaseStore {
    pub fn new(options: &HBaseOptions, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_base_url(options.base_url(), connect_timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connected: false,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn cell_set(rows: &[Row]) -> CellSetModel {
        CellSetModel {
            rows: rows
                .iter()
                .map(|row| RowModel {
                    key: STANDARD.encode(row.key.as_bytes()),
                    cells: row
                        .cells
                        .iter()
                        .map(|cell| CellModel {
                            column: STANDARD.encode(cell.column().as_bytes()),
                            value: STANDARD.encode(&cell.value),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Transport failures on schema calls mean the gateway is not answering, not
/// that it refused the request.
fn unavailable(e: reqwest::Error) -> SchemaError {
    SchemaError::Unavailable {
        reason: e.to_string(),
    }
}

impl Store for HBaseStore {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        let resp = self
            .http
            .get(format!("{}/version/cluster", self.base_url))
            .header(ACCEPT, "text/plain")
            .send()
            .await
            .map_err(|e| ConnectError::Unreachable {
                endpoint: self.base_url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConnectError::NotReady {
                endpoint: self.base_url.clone(),
                status: status.as_u16(),
            });
        }

        let version = resp.text().await.unwrap_or_default();
        debug!(endpoint = %self.base_url, version = version.trim(), "HBase REST gateway is up");
        self.connected = true;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let list_error = |reason: String| SchemaError::ListTables { reason };

        let resp = self
            .http
            .get(format!("{}/", self.base_url))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(SchemaError::Unavailable {
                reason: format!("listing tables answered {status}"),
            });
        }
        if !status.is_success() {
            return Err(list_error(format!("status {status}")));
        }

        let tables: TableListModel = resp.json().await.map_err(|e| list_error(e.to_string()))?;
        Ok(tables.table.into_iter().map(|t| t.name).collect())
    }

    async fn create_table(&self, table: &str, column_family: &str) -> Result<(), SchemaError> {
        let schema = TableSchemaModel {
            name: table,
            column_schema: vec![ColumnSchemaModel {
                name: column_family,
            }],
        };

        let resp = self
            .http
            .put(format!("{}/{}/schema", self.base_url, table))
            .header(ACCEPT, "application/json")
            .json(&schema)
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            return Err(SchemaError::AlreadyExists {
                table: table.to_string(),
            });
        }
        if status.is_server_error() {
            return Err(SchemaError::Unavailable {
                reason: format!("creating {table} answered {status}"),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        Err(SchemaError::Rejected {
            table: table.to_string(),
            reason: format!("status {status}: {}", body.trim()),
        })
    }

    async fn write_rows(&self, table: &str, rows: &[Row]) -> Result<(), WriteError> {
        if rows.is_empty() {
            return Ok(());
        }

        let resp = self
            .http
            .put(format!("{}/{}/{}", self.base_url, table, BATCH_ROW_PLACEHOLDER))
            .header(ACCEPT, "application/json")
            .json(&Self::cell_set(rows))
            .send()
            .await
            .map_err(|e| WriteError::Transport {
                rows: rows.len(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WriteError::Rejected {
                rows: rows.len(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        debug!(table, rows = rows.len(), "HBase put acknowledged");
        Ok(())
    }

    async fn close(&mut self) {
        // The REST gateway is stateless; dropping pooled connections is enough.
        self.connected = false;
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}
