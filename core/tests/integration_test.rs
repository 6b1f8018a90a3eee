use std::io::Write;

use ingest_core::config::*;
use ingest_core::errors::*;

#[test]
fn test_basic_config_loading() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
version: 1
source:
  bootstrap_servers: "broker-1:9092,broker-2:9092"
  topic: orders
  consumer_group: orders-to-hbase
  max_poll_records: 1000
sink:
  host: hbase-rest
  port: 8080
  table_name: orders
  column_family: info
processing:
  batch_size: 1000
  connect_retry_interval_ms: 5000
  max_retries: 5
  retry_delay_ms: 2000
  dead_letter: log_and_skip
"#
    )
    .unwrap();

    let config = IngestConfig::from_file(file.path().to_str().unwrap()).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.source.bootstrap_servers, "broker-1:9092,broker-2:9092");
    assert_eq!(config.source.max_poll_records, Some(1000));
    assert_eq!(config.sink.base_url(), "http://hbase-rest:8080");
    assert_eq!(config.processing.max_retries, 5);
    assert_eq!(config.processing.dead_letter, DeadLetterPolicy::LogAndSkip);
    // record layout falls back to the orders defaults
    assert_eq!(config.record.row_key_field, "order_id");
}

#[test]
fn test_missing_config_file() {
    let err = IngestConfig::from_file("/definitely/not/here.yaml").unwrap_err();

    assert!(matches!(err, ConfigError::LoadFailed { .. }));
}

#[test]
fn test_malformed_yaml() {
    let err = IngestConfig::from_yaml("source: 42").unwrap_err();

    assert!(matches!(err, ConfigError::Invalid { .. }));
}

#[test]
fn test_error_types() {
    let write_error = WriteError::Transport {
        rows: 1000,
        reason: "connection reset".to_string(),
    };
    let ingest_error = IngestionError::Write(write_error);
    assert!(ingest_error.is_retryable());
    assert_eq!(ingest_error.exit_code(), 1);

    let exhausted = IngestionError::RetriesExhausted {
        attempts: 4,
        last: WriteError::Rejected {
            rows: 1000,
            status: 503,
            body: String::new(),
        },
    };
    assert!(!exhausted.is_retryable());
    assert_eq!(exhausted.exit_code(), 3);

    let schema_error = IngestionError::Schema(SchemaError::Rejected {
        table: "orders".to_string(),
        reason: "permission denied".to_string(),
    });
    assert!(!schema_error.is_retryable());
    assert_eq!(schema_error.exit_code(), 2);

    let malformed = IngestionError::Malformed(MalformedRecordError::MissingField {
        field: "order_id".to_string(),
    });
    assert!(!malformed.is_retryable());
    assert_eq!(malformed.exit_code(), 4);

    let transient = IngestionError::Source(SourceError::Transient {
        source: "poll timed out".into(),
    });
    assert!(transient.is_retryable());

    let unavailable = SchemaError::Unavailable {
        reason: "status 503 Service Unavailable".to_string(),
    };
    assert!(unavailable.is_transient());
    assert!(!SchemaError::ListTables { reason: "status 401".to_string() }.is_transient());

    let config_error = IngestionError::Config(ConfigError::ValidationFailed {
        reason: "Invalid field".to_string(),
    });
    assert!(!config_error.is_retryable());
}
