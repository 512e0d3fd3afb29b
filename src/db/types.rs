//! Result rows and backend value decoding.
//!
//! Rows coming back from any backend are decoded into a `Row` of JSON values so
//! the transaction layer never has to know which driver produced them.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the value's type name into a logical category
//! 2. Driver-specific decoders handle the actual value extraction
//!
//! The type name is taken from the value itself rather than the column, so
//! SQLite expressions such as `COUNT(*)` (which have no declared type) decode
//! by their runtime storage class.

use crate::error::{TxError, TxResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as SqlxRow, TypeInfo, ValueRef};

/// A single result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<JsonValue>,
}

impl Row {
    /// Build a row from parallel column and value lists.
    pub fn new(columns: Vec<String>, values: Vec<JsonValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    /// Value at a column index.
    pub fn get(&self, idx: usize) -> Option<&JsonValue> {
        self.values.get(idx)
    }

    /// Value of the first column with the given name.
    pub fn get_by_name(&self, name: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// First value in the row.
    pub fn front(&self) -> Option<&JsonValue> {
        self.values.first()
    }

    /// Deserialize the value at `idx` into `T`.
    pub fn try_get<T: DeserializeOwned>(&self, idx: usize) -> TxResult<T> {
        let value = self.get(idx).ok_or_else(|| {
            TxError::usage(format!(
                "Column index {} out of bounds (row has {} columns)",
                idx,
                self.len()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            TxError::usage(format!(
                "Cannot convert column '{}' ({}): {}",
                self.columns[idx], value, e
            ))
        })
    }

    /// Convert to a column-name keyed JSON map.
    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Null,
}

/// Classify a type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }
    if lower.contains("decimal") || lower == "numeric" {
        return TypeCategory::Decimal;
    }
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

/// Encode binary data as base64 text.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Driver Row Conversion
// =============================================================================

/// Conversion from a driver row into a `Row`.
pub trait IntoRow {
    fn to_row(&self) -> Row;
}

macro_rules! impl_into_row {
    ($row:ty, $decoder:path) => {
        impl IntoRow for $row {
            fn to_row(&self) -> Row {
                let columns = self
                    .columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect();
                let values = (0..self.columns().len())
                    .map(|idx| {
                        let category = match self.try_get_raw(idx) {
                            Ok(raw) if raw.is_null() => TypeCategory::Null,
                            Ok(raw) => categorize_type(raw.type_info().name()),
                            Err(_) => TypeCategory::Null,
                        };
                        $decoder(self, idx, category)
                    })
                    .collect();
                Row::new(columns, values)
            }
        }
    };
}

impl_into_row!(MySqlRow, mysql::decode_column);
impl_into_row!(PgRow, postgres::decode_column);
impl_into_row!(SqliteRow, sqlite::decode_column);

// =============================================================================
// Driver-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Null => JsonValue::Null,
            TypeCategory::Integer => {
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                decode_text(row, idx)
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(float_value)
                .unwrap_or_else(|| decode_text(row, idx)),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Decimal | TypeCategory::Text => decode_text(row, idx),
        }
    }

    // Text protocol: DECIMAL and temporal values arrive as strings
    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Null => JsonValue::Null,
            TypeCategory::Integer => {
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
                    return JsonValue::Number(v.into());
                }
                JsonValue::Null
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => {
                if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                    return float_value(v);
                }
                if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                    return float_value(v as f64);
                }
                JsonValue::Null
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Decimal | TypeCategory::Text => row
                .try_get_unchecked::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Null => JsonValue::Null,
            TypeCategory::Integer | TypeCategory::Boolean => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float | TypeCategory::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json | TypeCategory::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}
