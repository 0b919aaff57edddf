// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Turns value samples into telemetry records.
//!
//! Two shapes can be written into the same record. The legacy shape lives
//! under its own namespace so the two never overwrite each other:
//!
//! | Shape      | Fields |
//! |------------|--------|
//! | legacy     | `opcua.nodevalue.{state, created, node, <type> or value}` |
//! | structured | `event.*`, `sensor.*`, `value.value_<type>` or `value.value`, `value.source_timestamp`, `value.status_code` |
//!
//! A non-array `float64` NaN never reaches a record: its value field is
//! omitted in both shapes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::collector::ValueSample;
use crate::types::{OutputSettings, ValueType, Variant};

/// Provider name written to `event.provider`.
pub const PROVIDER: &str = "opcua";

/// Namespace holding the legacy shape.
pub const LEGACY_NAMESPACE: &str = "opcua.nodevalue";

// =============================================================================
// Record
// =============================================================================

/// One telemetry record: a JSON object with dotted-path access.
///
/// ```
/// use harvest_opcua::formatter::Record;
///
/// let mut record = Record::new();
/// record.put("sensor.id", "ns=2;s=Temp");
/// assert_eq!(record.get("sensor.id").and_then(|v| v.as_str()), Some("ns=2;s=Temp"));
/// assert_eq!(record.to_json_string(), r#"{"sensor":{"id":"ns=2;s=Temp"}}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the field at a dotted path, creating intermediate objects.
    ///
    /// A non-object value in the way is replaced.
    pub fn put(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments = path.split('.').peekable();
        let mut current = &mut self.fields;

        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), value.into());
                return;
            }
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
    }

    /// Returns the field at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Returns `true` if a field exists at the dotted path.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Top-level fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consumes the record into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Compact JSON text, one line.
    pub fn to_json_string(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

// =============================================================================
// EventFormatter
// =============================================================================

/// Formats samples into records.
#[derive(Debug, Clone)]
pub struct EventFormatter {
    endpoint: String,
    output: OutputSettings,
}

impl EventFormatter {
    /// Creates a formatter for records from `endpoint`.
    pub fn new(endpoint: impl Into<String>, output: OutputSettings) -> Self {
        Self {
            endpoint: endpoint.into(),
            output,
        }
    }

    /// Formats every sample, stamping `event.creation` with the current time.
    pub fn format(&self, samples: &[ValueSample]) -> Vec<Record> {
        self.format_at(samples, Utc::now())
    }

    /// Formats every sample with a fixed creation time.
    pub fn format_at(&self, samples: &[ValueSample], now: DateTime<Utc>) -> Vec<Record> {
        samples.iter().map(|s| self.format_sample(s, now)).collect()
    }

    /// Formats one sample.
    pub fn format_sample(&self, sample: &ValueSample, now: DateTime<Utc>) -> Record {
        let mut record = Record::new();
        let value = payload(sample);
        let value_type = sample.node.value_type;

        if self.output.legacy {
            let legacy = |field: &str| format!("{LEGACY_NAMESPACE}.{field}");
            record.put(&legacy("state"), if sample.is_ok() { "OK" } else { "ERROR" });
            record.put(
                &legacy("created"),
                sample.source_timestamp.map(rfc3339).unwrap_or_default(),
            );
            record.put(&legacy("node"), sample.node.label.as_str());
            if let Some(value) = &value {
                record.put(&legacy(legacy_key(value_type)), value.clone());
            }
        }

        if self.output.structured {
            record.put("event.provider", PROVIDER);
            record.put("event.url", self.endpoint.as_str());
            record.put("event.creation", rfc3339(now));
            record.put("event.dataset", sample.node.id.as_str());
            record.put(
                "event.outcome",
                if sample.is_ok() { "success" } else { "failure" },
            );

            record.put("sensor.id", sample.node.id.as_str());
            record.put("sensor.label", sample.node.label.as_str());
            record.put("sensor.name", sample.node.display_name.as_str());
            if !sample.node.path.is_empty() {
                record.put("sensor.path", sample.node.path.as_str());
            }

            if let Some(value) = value {
                record.put(&structured_key(value_type), value);
            }
            if let Some(timestamp) = sample.source_timestamp {
                record.put("value.source_timestamp", rfc3339(timestamp));
            }
            if !sample.status.is_good() {
                record.put("value.status_code", format!("0x{:08X}", sample.status.0));
            }
        }

        record
    }
}

/// The JSON value to write, or `None` when the field must be omitted.
fn payload(sample: &ValueSample) -> Option<Value> {
    match &sample.value {
        Variant::Empty => None,
        v if sample.node.value_type == ValueType::Float64 && v.is_scalar_nan() => None,
        v => Some(v.to_json()),
    }
}

fn legacy_key(value_type: ValueType) -> &'static str {
    if value_type.is_known() {
        value_type.name()
    } else {
        "value"
    }
}

fn structured_key(value_type: ValueType) -> String {
    if value_type.is_known() {
        format!("value.value_{}", value_type.name())
    } else {
        "value.value".to_string()
    }
}

fn rfc3339(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use serde_json::json;

    use crate::catalog::CatalogNode;
    use crate::types::{DataValue, NodeId, StatusCode};

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn node(value_type: ValueType) -> Arc<CatalogNode> {
        Arc::new(
            CatalogNode::new(NodeId::string(2, "Temp"))
                .with_label(Some("boiler.temp"))
                .with_display_name("Temperature")
                .with_path("Objects.Boiler.Temp")
                .with_value_type(value_type),
        )
    }

    fn sample(value_type: ValueType, value: DataValue) -> ValueSample {
        ValueSample::new(node(value_type), value)
    }

    fn formatter(legacy: bool, structured: bool) -> EventFormatter {
        EventFormatter::new(
            "opc.tcp://plc:4840",
            OutputSettings { legacy, structured },
        )
    }

    #[test]
    fn test_record_put_and_get() {
        let mut record = Record::new();
        record.put("value.value_float64", 1.5);
        record.put("value.source_timestamp", "T");
        record.put("state", "OK");

        assert_eq!(record.get("value.value_float64"), Some(&json!(1.5)));
        assert_eq!(record.get("value"), Some(&json!({"value_float64": 1.5, "source_timestamp": "T"})));
        assert!(record.contains("state"));
        assert!(!record.contains("state.inner"));
        assert!(!record.contains("missing"));

        record.put("state.inner", true);
        assert_eq!(record.get("state.inner"), Some(&json!(true)));
    }

    #[test]
    fn test_structured_shape() {
        let sample = sample(
            ValueType::Float64,
            DataValue::good(72.5).with_source_timestamp(timestamp()),
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 1).unwrap();
        let record = formatter(false, true).format_at(&[sample], now).remove(0);

        assert_eq!(
            record.into_value(),
            json!({
                "event": {
                    "provider": "opcua",
                    "url": "opc.tcp://plc:4840",
                    "creation": "2024-03-01T12:00:01Z",
                    "dataset": "ns=2;s=Temp",
                    "outcome": "success"
                },
                "sensor": {
                    "id": "ns=2;s=Temp",
                    "label": "boiler.temp",
                    "name": "Temperature",
                    "path": "Objects.Boiler.Temp"
                },
                "value": {
                    "value_float64": 72.5,
                    "source_timestamp": "2024-03-01T12:00:00Z"
                }
            })
        );
    }

    #[test]
    fn test_legacy_shape() {
        let sample = sample(
            ValueType::Int32,
            DataValue::good(7).with_source_timestamp(timestamp()),
        );
        let record = formatter(true, false).format(&[sample]).remove(0);

        assert_eq!(
            record.into_value(),
            json!({
                "opcua": {
                    "nodevalue": {
                        "state": "OK",
                        "created": "2024-03-01T12:00:00Z",
                        "node": "boiler.temp",
                        "int32": 7
                    }
                }
            })
        );
    }

    #[test]
    fn test_both_shapes_in_one_record() {
        let sample = sample(ValueType::Unknown, DataValue::good("RUN"));
        let record = formatter(true, true).format(&[sample]).remove(0);

        assert_eq!(record.get("opcua.nodevalue.value"), Some(&json!("RUN")));
        assert_eq!(record.get("opcua.nodevalue.node"), Some(&json!("boiler.temp")));
        assert_eq!(record.get("opcua.nodevalue.created"), Some(&json!("")));
        assert_eq!(record.get("value.value"), Some(&json!("RUN")));
        assert!(!record.contains("value.source_timestamp"));
    }

    #[test]
    fn test_both_shapes_keep_every_field() {
        let sample = sample(
            ValueType::Unknown,
            DataValue::bad(StatusCode::BAD_NOT_READABLE).with_source_timestamp(timestamp()),
        );
        let record = formatter(true, true).format(&[sample]).remove(0);

        assert_eq!(record.get("opcua.nodevalue.state"), Some(&json!("ERROR")));
        assert_eq!(
            record.get("opcua.nodevalue.created"),
            Some(&json!("2024-03-01T12:00:00Z"))
        );
        assert_eq!(record.get("value.status_code"), Some(&json!("0x803B0000")));
        assert_eq!(
            record.get("value.source_timestamp"),
            Some(&json!("2024-03-01T12:00:00Z"))
        );
    }

    #[test]
    fn test_bad_status() {
        let sample = sample(ValueType::Float64, DataValue::bad(StatusCode::BAD_NOT_READABLE));
        let record = formatter(true, true).format(&[sample]).remove(0);

        assert_eq!(record.get("opcua.nodevalue.state"), Some(&json!("ERROR")));
        assert_eq!(record.get("event.outcome"), Some(&json!("failure")));
        assert_eq!(record.get("value.status_code"), Some(&json!("0x803B0000")));
        assert!(!record.contains("value.value_float64"));
        assert!(!record.contains("opcua.nodevalue.float64"));
    }

    #[test]
    fn test_uncertain_status_carries_code() {
        let value = DataValue {
            status: StatusCode::UNCERTAIN_LAST_USABLE_VALUE,
            value: Variant::Double(70.0),
            source_timestamp: None,
        };
        let record = formatter(true, true)
            .format(&[sample(ValueType::Float64, value)])
            .remove(0);

        assert_eq!(record.get("event.outcome"), Some(&json!("failure")));
        assert_eq!(record.get("opcua.nodevalue.state"), Some(&json!("ERROR")));
        assert_eq!(record.get("value.status_code"), Some(&json!("0x40900000")));
        assert_eq!(record.get("value.value_float64"), Some(&json!(70.0)));

        let good = sample(ValueType::Float64, DataValue::good(70.0));
        let record = formatter(false, true).format(&[good]).remove(0);
        assert!(!record.contains("value.status_code"));
    }

    #[test]
    fn test_nan_scalar_is_omitted() {
        let sample = sample(ValueType::Float64, DataValue::good(f64::NAN));
        let record = formatter(true, true).format(&[sample]).remove(0);

        assert!(!record.contains("value.value_float64"));
        assert!(!record.contains("opcua.nodevalue.float64"));
        assert_eq!(record.get("event.outcome"), Some(&json!("success")));
    }

    #[test]
    fn test_nan_array_is_kept() {
        let values = Variant::Array(vec![Variant::Double(1.0), Variant::Double(f64::NAN)]);
        let sample = sample(ValueType::Float64, DataValue::good(values));
        let record = formatter(false, true).format(&[sample]).remove(0);

        assert_eq!(record.get("value.value_float64"), Some(&json!([1.0, null])));
    }

    #[test]
    fn test_path_omitted_when_empty() {
        let node = Arc::new(CatalogNode::new(NodeId::numeric(3, 1001)));
        let sample = ValueSample::new(node, DataValue::good(true));
        let record = formatter(false, true).format(&[sample]).remove(0);

        assert!(!record.contains("sensor.path"));
        assert_eq!(record.get("sensor.label"), Some(&json!("ns=3;i=1001")));
        assert_eq!(record.get("value.value"), Some(&json!(true)));
    }

    #[test]
    fn test_one_record_per_sample() {
        let samples: Vec<_> = (0..3)
            .map(|i| sample(ValueType::Int32, DataValue::good(i)))
            .collect();
        assert_eq!(formatter(false, true).format(&samples).len(), 3);
        assert!(formatter(false, true).format(&[]).is_empty());
    }
}
