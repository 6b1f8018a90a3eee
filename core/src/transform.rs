use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};

use crate::config::{ColumnSpec, FieldKind, RecordConfig};
use crate::errors::MalformedRecordError;
use crate::sink::{Cell, Row};
use crate::source::SourceMessage;

/// Accepted besides RFC 3339. Naive values carry no offset and are stored as sent.
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Maps a JSON message onto a row keyed by the business key.
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    row_key_field: String,
    column_family: String,
    columns: Vec<ColumnSpec>,
}

impl RecordTransformer {
    pub fn new(record: &RecordConfig, column_family: &str) -> Self {
        Self {
            row_key_field: record.row_key_field.clone(),
            column_family: column_family.to_string(),
            columns: record.columns.clone(),
        }
    }

    pub fn transform(&self, message: &SourceMessage) -> Result<Row, MalformedRecordError> {
        let invalid = |reason: String| MalformedRecordError::InvalidPayload {
            partition: message.position.partition,
            offset: message.position.offset,
            reason,
        };
        let value: Value =
            serde_json::from_slice(&message.payload).map_err(|e| invalid(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(invalid("expected an object".to_string()));
        };

        let key = self.row_key(&fields)?;
        let mut cells = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match present(&fields, &column.name) {
                Some(value) => cells.push(Cell {
                    family: self.column_family.clone(),
                    qualifier: column.name.clone(),
                    value: encode(&column.name, column.kind, value)?.into_bytes(),
                }),
                None if column.required => {
                    return Err(MalformedRecordError::MissingField {
                        field: column.name.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(Row { key, cells })
    }

    fn row_key(&self, fields: &Map<String, Value>) -> Result<String, MalformedRecordError> {
        let value = present(fields, &self.row_key_field).ok_or_else(|| {
            MalformedRecordError::MissingField {
                field: self.row_key_field.clone(),
            }
        })?;
        let key = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(MalformedRecordError::TypeCoercion {
                    field: self.row_key_field.clone(),
                    expected: "row key",
                    value: other.to_string(),
                });
            }
        };
        if key.is_empty() {
            return Err(MalformedRecordError::EmptyRowKey {
                field: self.row_key_field.clone(),
            });
        }
        Ok(key)
    }
}

/// A field counts as absent when missing or null.
fn present<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|v| !v.is_null())
}

fn encode(field: &str, kind: FieldKind, value: &Value) -> Result<String, MalformedRecordError> {
    let mismatch = |expected: &'static str| MalformedRecordError::TypeCoercion {
        field: field.to_string(),
        expected,
        value: value.to_string(),
    };

    match kind {
        FieldKind::String => match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(mismatch("string")),
        },
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Value::Number(n) => n.as_f64().and_then(integral).ok_or_else(|| mismatch("integer")),
            Value::String(s) if s.trim().parse::<i64>().is_ok() => Ok(s.trim().to_string()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(integral)
                .ok_or_else(|| mismatch("integer")),
            _ => Err(mismatch("integer")),
        },
        FieldKind::Float => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if is_finite_float(s.trim()) => Ok(s.trim().to_string()),
            _ => Err(mismatch("float")),
        },
        FieldKind::Timestamp => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Value::String(s) if is_timestamp(s.trim()) => Ok(s.trim().to_string()),
            _ => Err(mismatch("timestamp")),
        },
    }
}

/// `2.0` is the integer 2; `2.5` is not an integer.
fn integral(f: f64) -> Option<String> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| (f as i64).to_string())
}

fn is_finite_float(s: &str) -> bool {
    s.parse::<f64>().is_ok_and(f64::is_finite)
}

fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || TIMESTAMP_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(s, format).is_ok())
        || s.parse::<i64>().is_ok()
}
