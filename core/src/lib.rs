//! Batched Kafka to HBase ingestion.
//!
//! Records are polled from a Kafka topic, mapped to HBase rows, buffered and
//! written in batches. Consumer offsets are committed only after the batch
//! holding those records has been written, which gives at-least-once
//! delivery; rows are keyed by the business key, so redelivered records
//! overwrite themselves with identical content.

pub mod buffer;
pub mod config;
pub mod errors;
pub mod ingestor;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod telemetry;
pub mod transform;

#[cfg(test)]
mod testing;

pub use config::{IngestConfig, load_config};
pub use errors::{IngestionError, Result};
pub use supervisor::{Outcome, Supervisor};
