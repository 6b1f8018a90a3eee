use std::time::Duration;

use thiserror::Error;

use crate::buffer::BufferState;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Batch write failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: WriteError,
    },

    #[error("Malformed record: {0}")]
    Malformed(#[from] MalformedRecordError),

    #[error("Batch buffer error: {0}")]
    Buffer(#[from] BufferError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("A transient error occurred, the operation can be retried: {source}")]
    Transient {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unrecoverable error from the source: {0}")]
    Unrecoverable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug)]
pub enum KafkaError {
    #[error("Failed to create consumer: {reason}")]
    ConsumerCreation { reason: String },

    #[error("Failed to subscribe to topic {topic}: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("Failed to consume messages: {reason}")]
    Consumption { reason: String },

    #[error("Failed to commit offsets: {reason}")]
    OffsetCommit { reason: String },
}

/// A single connect attempt failed. Always retried by the connector.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Store at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Store at {endpoint} answered with status {status}")]
    NotReady { endpoint: String, status: u16 },

    #[error("Connect attempt timed out after {after:?}")]
    Timeout { after: Duration },
}

#[derive(Error, Debug)]
pub enum SchemaError {
    /// The store could not answer yet. Retried like a failed connect.
    #[error("Store is unavailable for schema operations: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to list tables: {reason}")]
    ListTables { reason: String },

    #[error("Table {table} already exists")]
    AlreadyExists { table: String },

    #[error("Store rejected creation of table {table}: {reason}")]
    Rejected { table: String, reason: String },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Failed to send batch of {rows} rows: {reason}")]
    Transport { rows: usize, reason: String },

    #[error("Store rejected batch of {rows} rows with status {status}: {body}")]
    Rejected { rows: usize, status: u16, body: String },

    #[error("Batch write timed out after {after:?}")]
    Timeout { after: Duration },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecordError {
    #[error("Payload at partition {partition} offset {offset} is not a JSON object: {reason}")]
    InvalidPayload {
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Row key field '{field}' is empty")]
    EmptyRowKey { field: String },

    #[error("Field '{field}' is not a valid {expected}: {value}")]
    TypeCoercion {
        field: String,
        expected: &'static str,
        value: String,
    },
}

#[derive(Error, Debug)]
pub enum BufferError {
    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("Buffer is not accepting rows while {state:?}")]
    NotAccepting { state: BufferState },
}

pub type Result<T> = std::result::Result<T, IngestionError>;

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Invalid {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Invalid {
            message: err.to_string(),
        }
    }
}

impl SchemaError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SchemaError::Unavailable { .. })
    }
}

impl IngestionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestionError::Source(SourceError::Transient { .. }) => true,
            IngestionError::Source(SourceError::Unrecoverable(_)) => false,
            IngestionError::Write(_) => true,
            IngestionError::Buffer(BufferError::Write(_)) => true,
            _ => false,
        }
    }

    /// Process exit status reported when this error terminates the pipeline.
    pub fn exit_code(&self) -> u8 {
        match self {
            IngestionError::Schema(_) => 2,
            IngestionError::RetriesExhausted { .. } => 3,
            IngestionError::Malformed(_) => 4,
            _ => 1,
        }
    }
}
