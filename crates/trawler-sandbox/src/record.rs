//! Validation of the value returned by a strategy.

use rhai::{Array, Dynamic, Map};
use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

/// A single tool record produced by a strategy, after shape validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Any other fields the strategy attached, converted to JSON.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Validate a strategy's return value into records.
///
/// The value must be an array of maps, each with string `name`, `description`
/// and `url`. `tags`, when present, must be an array of strings.
pub(crate) fn validate_output(value: Dynamic, max_records: usize) -> SandboxResult<Vec<ExtractedRecord>> {
    let type_name = value.type_name();
    let items: Array = value.try_cast::<Array>().ok_or_else(|| {
        SandboxError::InvalidOutputShape(format!("expected an array of records, got {type_name}"))
    })?;

    if items.len() > max_records {
        return Err(SandboxError::InvalidOutputShape(format!(
            "strategy returned {} records, limit is {max_records}",
            items.len()
        )));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| validate_record(index, item))
        .collect()
}

fn validate_record(index: usize, item: Dynamic) -> SandboxResult<ExtractedRecord> {
    let type_name = item.type_name();
    let mut map: Map = item.try_cast::<Map>().ok_or_else(|| {
        SandboxError::InvalidOutputShape(format!("record {index} is {type_name}, expected a map"))
    })?;

    let name = take_string(&mut map, index, "name")?;
    let description = take_string(&mut map, index, "description")?;
    let url = take_string(&mut map, index, "url")?;

    let tags = match map.remove("tags") {
        None => Vec::new(),
        Some(tags) if tags.is_unit() => Vec::new(),
        Some(tags) => {
            let arr = tags.try_cast::<Array>().ok_or_else(|| {
                SandboxError::InvalidOutputShape(format!("record {index}: tags must be an array"))
            })?;
            arr.into_iter()
                .map(|t| {
                    t.into_string().map_err(|actual| {
                        SandboxError::InvalidOutputShape(format!(
                            "record {index}: tag is {actual}, expected string"
                        ))
                    })
                })
                .collect::<SandboxResult<Vec<_>>>()?
        }
    };

    let extra = map
        .into_iter()
        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
        .collect();

    Ok(ExtractedRecord {
        name,
        description,
        url,
        tags,
        extra,
    })
}

fn take_string(map: &mut Map, index: usize, field: &str) -> SandboxResult<String> {
    let value = map.remove(field).ok_or_else(|| {
        SandboxError::InvalidOutputShape(format!("record {index} is missing '{field}'"))
    })?;
    value.into_string().map_err(|actual| {
        SandboxError::InvalidOutputShape(format!(
            "record {index}: '{field}' is {actual}, expected string"
        ))
    })
}

/// Convert a script value to JSON.
pub(crate) fn dynamic_to_json(v: Dynamic) -> serde_json::Value {
    if v.is_unit() {
        serde_json::Value::Null
    } else if v.is_bool() {
        serde_json::Value::Bool(v.as_bool().unwrap_or(false))
    } else if v.is_int() {
        serde_json::json!(v.as_int().unwrap_or(0))
    } else if v.is_float() {
        serde_json::json!(v.as_float().unwrap_or(0.0))
    } else if v.is_string() {
        serde_json::Value::String(v.into_string().unwrap_or_default())
    } else if v.is_array() {
        match v.into_array() {
            Ok(arr) => serde_json::Value::Array(arr.into_iter().map(dynamic_to_json).collect()),
            Err(_) => serde_json::Value::Null,
        }
    } else if v.is_map() {
        match v.try_cast::<Map>() {
            Some(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect(),
            ),
            None => serde_json::Value::Null,
        }
    } else {
        serde_json::Value::String(v.to_string())
    }
}
