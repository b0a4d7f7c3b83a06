use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::coerce::{to_boolean, to_integer, to_number, to_text};
use crate::error::{PipelineError, Result};
use crate::header::{normalize_header, HeaderMatch};
use crate::schema::{FieldKind, Schema};
use crate::value::{clean_key, record_from_json, GenericRecord, Value};

/// One row in the canonical shape. `fields` always holds every schema field,
/// already coerced; `extra` keeps columns the schema does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub fields: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: GenericRecord,
}

impl CanonicalRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn number(&self, field: &str) -> f64 {
        self.fields.get(field).and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn flag(&self, field: &str) -> bool {
        self.fields.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn text(&self, field: &str) -> &str {
        self.fields.get(field).and_then(Value::as_str).unwrap_or("")
    }

    /// Flattens schema fields followed by the unmapped extras.
    pub fn to_generic(&self) -> GenericRecord {
        let mut out = self.fields.clone();
        for (key, value) in &self.extra {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
        out
    }
}

pub fn json_shape(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Normalizes a raw JSON payload. Anything but an array is rejected; array
/// elements that are not objects become all-default records so the output
/// stays row-for-row with the input.
pub fn normalize_rows(raw: &JsonValue, schema: &Schema) -> Result<Vec<CanonicalRecord>> {
    let Some(items) = raw.as_array() else {
        return Err(PipelineError::InvalidInput(json_shape(raw).to_string()));
    };
    let rows = items
        .iter()
        .enumerate()
        .map(|(idx, item)| match item {
            JsonValue::Object(map) => record_from_json(map),
            other => {
                tracing::debug!(row = idx, shape = json_shape(other), "non-object row defaulted");
                GenericRecord::new()
            }
        })
        .collect::<Vec<_>>();
    Ok(normalize_records(&rows, schema))
}

pub fn normalize_records(rows: &[GenericRecord], schema: &Schema) -> Vec<CanonicalRecord> {
    rows.iter().map(|row| normalize_record(row, schema)).collect()
}

pub fn normalize_record(row: &GenericRecord, schema: &Schema) -> CanonicalRecord {
    let mut landed: HashMap<&'static str, &Value> = HashMap::new();
    let mut extra = GenericRecord::new();
    for (key, value) in row {
        match schema.map_header(&normalize_header(key)) {
            HeaderMatch::Canonical(field) => {
                // Several source columns can alias one field; the first non-empty wins.
                let replace = landed.get(field).map_or(true, |current| {
                    current.is_empty() && !value.is_empty()
                });
                if replace {
                    landed.insert(field, value);
                }
            }
            HeaderMatch::Raw(_) => {
                extra.insert(clean_key(key), value.clone());
            }
        }
    }
    let mut fields = IndexMap::with_capacity(schema.fields().len());
    for spec in schema.fields() {
        let raw = landed.get(spec.name).copied().unwrap_or(&Value::Null);
        let coerced = match spec.kind {
            FieldKind::Text(fallback) => Value::Text(to_text(raw, fallback)),
            FieldKind::Integer => Value::Number(to_integer(raw)),
            FieldKind::Number => Value::Number(to_number(raw)),
            FieldKind::Flag => Value::Bool(to_boolean(raw)),
        };
        fields.insert(spec.name.to_string(), coerced);
    }
    CanonicalRecord { fields, extra }
}
