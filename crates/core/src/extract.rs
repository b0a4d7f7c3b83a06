use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{PipelineError, Result};
use crate::rows::json_shape;
use crate::value::{record_from_json, GenericRecord};

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid fence regex"));

/// Parses an oracle reply into records. The reply must be a JSON array of
/// objects, optionally wrapped in a Markdown code fence or in a single-key
/// object such as `{"rows": [...]}`. Rows with no non-empty cell are dropped.
pub fn parse_oracle_payload(text: &str) -> Result<Vec<GenericRecord>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::ExtractionFormat("empty response".into()));
    }
    let body = FENCE_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|err| PipelineError::ExtractionFormat(format!("response is not JSON: {err}")))?;
    let items = unwrap_rows(value)?;
    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match item {
            JsonValue::Object(map) => records.push(record_from_json(map)),
            other => {
                tracing::debug!(row = idx, shape = json_shape(other), "skipping non-object row");
            }
        }
    }
    Ok(clean_records(records))
}

fn unwrap_rows(value: JsonValue) -> Result<Vec<JsonValue>> {
    match value {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Object(mut map) if map.len() == 1 => {
            let key = map.keys().next().cloned().unwrap_or_default();
            match map.remove(&key) {
                Some(JsonValue::Array(items)) => Ok(items),
                _ => Err(PipelineError::ExtractionFormat(
                    "expected a JSON array, received object".into(),
                )),
            }
        }
        other => Err(PipelineError::ExtractionFormat(format!(
            "expected a JSON array, received {}",
            json_shape(&other)
        ))),
    }
}

pub fn clean_records(records: Vec<GenericRecord>) -> Vec<GenericRecord> {
    records
        .into_iter()
        .filter(|record| record.values().any(|v| !v.is_empty()))
        .collect()
}
