use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::buffer::BatchWriter;
use crate::config::ProcessingConfig;
use crate::errors::{ConnectError, SchemaError, WriteError};
use crate::sink::{Row, Store};

#[derive(Debug, Clone, Copy)]
pub struct ConnectSettings {
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    pub write_timeout: Duration,
}

impl From<&ProcessingConfig> for ConnectSettings {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            retry_interval: config.connect_retry_interval(),
            write_timeout: config.write_timeout(),
        }
    }
}

pub struct StoreConnector<K: Store> {
    store: K,
    settings: ConnectSettings,
}

impl<K: Store> StoreConnector<K> {
    pub fn new(store: K, settings: ConnectSettings) -> Self {
        Self { store, settings }
    }

    /// Blocks until the store accepts a connection. Never fails: each attempt
    /// is bounded by the connect timeout and followed by the retry interval.
    pub async fn connect(mut self) -> StoreHandle<K> {
        let endpoint = self.store.endpoint();
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            info!(%endpoint, attempt = attempts, "Connecting to store");

            let result = match timeout(self.settings.connect_timeout, self.store.connect()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout {
                    after: self.settings.connect_timeout,
                }),
            };

            match result {
                Ok(()) => {
                    info!(%endpoint, attempts, "Connected to store");
                    return StoreHandle {
                        store: self.store,
                        settings: self.settings,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(
                        %endpoint,
                        attempt = attempts,
                        error = %e,
                        retry_in = ?self.settings.retry_interval,
                        "Store not ready yet"
                    );
                    sleep(self.settings.retry_interval).await;
                }
            }
        }
    }
}

/// A live connection to the store, owned by a single pipeline.
pub struct StoreHandle<K: Store> {
    store: K,
    settings: ConnectSettings,
    attempts: u64,
}

impl<K: Store> StoreHandle<K> {
    /// Number of attempts `connect` needed.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts
    }

    /// Creates `table` with `column_family` unless it already exists.
    ///
    /// While the store is unavailable (timeouts, transport failures, server
    /// errors) this waits and retries the same way `connect` does. Only a
    /// definite rejection is returned.
    pub async fn ensure_schema(&self, table: &str, column_family: &str) -> Result<(), SchemaError> {
        let endpoint = self.store.endpoint();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let result = match timeout(
                self.settings.connect_timeout,
                self.try_ensure_schema(table, column_family),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SchemaError::Unavailable {
                    reason: format!("no answer within {:?}", self.settings.connect_timeout),
                }),
            };

            match result {
                Err(e) if e.is_transient() => {
                    warn!(
                        %endpoint,
                        attempt,
                        error = %e,
                        retry_in = ?self.settings.retry_interval,
                        "Store not ready for schema operations"
                    );
                    sleep(self.settings.retry_interval).await;
                }
                result => return result,
            }
        }
    }

    async fn try_ensure_schema(&self, table: &str, column_family: &str) -> Result<(), SchemaError> {
        let tables = self.store.list_tables().await?;
        if tables.iter().any(|t| t == table) {
            info!(table, "Table already exists");
            return Ok(());
        }

        info!(table, column_family, "Creating table");
        match self.store.create_table(table, column_family).await {
            Ok(()) => Ok(()),
            Err(SchemaError::AlreadyExists { .. }) => {
                info!(table, "Table was created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn write_batch(&self, table: &str, rows: &[Row]) -> Result<(), WriteError> {
        match timeout(self.settings.write_timeout, self.store.write_rows(table, rows)).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout {
                after: self.settings.write_timeout,
            }),
        }
    }

    pub async fn close(&mut self) {
        self.store.close().await;
        info!(endpoint = %self.store.endpoint(), "Closed store connection");
    }
}

impl<K: Store> BatchWriter for StoreHandle<K> {
    async fn write_batch(&self, table: &str, rows: &[Row]) -> Result<(), WriteError> {
        StoreHandle::write_batch(self, table, rows).await
    }
}
