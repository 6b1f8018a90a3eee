use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub version: u32,
    pub source: KafkaOptions,
    pub sink: HBaseOptions,
    pub processing: ProcessingConfig,
    pub record: RecordConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KafkaOptions {
    /// Comma separated broker list.
    pub bootstrap_servers: String,
    pub topic: String,
    pub consumer_group: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanisms: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_ca_location: Option<String>,
    pub auto_offset_reset: Option<String>,
    pub session_timeout_ms: Option<u32>,
    pub heartbeat_interval_ms: Option<u32>,
    pub max_poll_records: Option<u32>,
    pub poll_timeout_ms: u64,
}

impl Default for KafkaOptions {
    fn default() -> Self {
        Self {
            bootstrap_servers: "kafka:9092".to_string(),
            topic: "orders".to_string(),
            consumer_group: "kafka-to-hbase-batch-v1".to_string(),
            security_protocol: None,
            sasl_mechanisms: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            auto_offset_reset: Some("earliest".to_string()),
            session_timeout_ms: None,
            heartbeat_interval_ms: None,
            max_poll_records: Some(500),
            poll_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HBaseOptions {
    pub host: String,
    /// Port of the HBase REST gateway.
    pub port: u16,
    pub use_tls: bool,
    pub table_name: String,
    pub column_family: String,
}

impl Default for HBaseOptions {
    fn default() -> Self {
        Self {
            host: "hbase".to_string(),
            port: 8080,
            use_tls: false,
            table_name: "orders".to_string(),
            column_family: "info".to_string(),
        }
    }
}

impl HBaseOptions {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterPolicy {
    /// Log the record at warn level and move on.
    LogAndSkip,
    /// Treat the record as fatal and stop the pipeline.
    Fail,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub connect_retry_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Pause before polling again after a transient source error.
    pub source_retry_delay_ms: u64,
    pub dead_letter: DeadLetterPolicy,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            connect_retry_interval_ms: 5000,
            connect_timeout_ms: 10000,
            write_timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
            source_retry_delay_ms: 5000,
            dead_letter: DeadLetterPolicy::LogAndSkip,
        }
    }
}

impl ProcessingConfig {
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn source_retry_delay(&self) -> Duration {
        Duration::from_millis(self.source_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Timestamp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnSpec {
    /// Field name in the payload; also used as the column qualifier.
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordConfig {
    pub row_key_field: String,
    pub columns: Vec<ColumnSpec>,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            row_key_field: "order_id".to_string(),
            columns: vec![
                ColumnSpec::new("user_id", FieldKind::String),
                ColumnSpec::new("category", FieldKind::String),
                ColumnSpec::new("price", FieldKind::Float),
                ColumnSpec::new("quantity", FieldKind::Integer),
                ColumnSpec::new("order_time", FieldKind::Timestamp),
                ColumnSpec::new("status", FieldKind::String),
            ],
        }
    }
}

/// Loads from `config_path` when given, otherwise from the environment, then
/// applies the discrete environment overrides and validates.
pub fn load_config(config_path: Option<&str>) -> Result<IngestConfig, ConfigError> {
    let mut config = match config_path {
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::from_env()?,
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

impl IngestConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content)
    }

    /// Reads YAML from `INGEST_CONFIG`, falling back to the built-in defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("INGEST_CONFIG") {
            Ok(config_str) => Self::from_yaml(&config_str),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Applies the single-value overrides (`KAFKA_TOPIC`, `BATCH_SIZE`, ...).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KAFKA_BOOTSTRAP_SERVERS") {
            self.source.bootstrap_servers = v;
        }
        if let Some(v) = lookup("KAFKA_TOPIC") {
            self.source.topic = v;
        }
        if let Some(v) = lookup("KAFKA_GROUP_ID") {
            self.source.consumer_group = v;
        }
        if let Some(v) = lookup("HBASE_HOST") {
            self.sink.host = v;
        }
        if let Some(v) = lookup("HBASE_PORT") {
            self.sink.port = parse_override("HBASE_PORT", &v)?;
        }
        if let Some(v) = lookup("HBASE_TABLE") {
            self.sink.table_name = v;
        }
        if let Some(v) = lookup("HBASE_CF") {
            self.sink.column_family = v;
        }
        if let Some(v) = lookup("BATCH_SIZE") {
            self.processing.batch_size = parse_override("BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("CONNECT_RETRY_INTERVAL_MS") {
            self.processing.connect_retry_interval_ms =
                parse_override("CONNECT_RETRY_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("CONNECT_TIMEOUT_MS") {
            self.processing.connect_timeout_ms = parse_override("CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("WRITE_TIMEOUT_MS") {
            self.processing.write_timeout_ms = parse_override("WRITE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("WRITE_MAX_RETRIES") {
            self.processing.max_retries = parse_override("WRITE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("WRITE_RETRY_DELAY_MS") {
            self.processing.retry_delay_ms = parse_override("WRITE_RETRY_DELAY_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("source.bootstrap_servers", &self.source.bootstrap_servers),
            ("source.topic", &self.source.topic),
            ("source.consumer_group", &self.source.consumer_group),
            ("sink.host", &self.sink.host),
            ("sink.table_name", &self.sink.table_name),
            ("sink.column_family", &self.sink.column_family),
            ("record.row_key_field", &self.record.row_key_field),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        if self.processing.batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "processing.batch_size must be greater than zero".to_string(),
            });
        }
        if self.processing.connect_retry_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "processing.connect_retry_interval_ms must be greater than zero"
                    .to_string(),
            });
        }
        if self.record.columns.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "record.columns cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        message: format!("{key} has an invalid value: {value}"),
    })
}
