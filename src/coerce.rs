//! Record → row coercion against a resolved schema.
//!
//! Coercion is lossy on purpose: a value that cannot be converted to its
//! column's type becomes null and is counted, it never fails the row.

use crate::schema::{ColumnType, SchemaDescriptor};
use crate::types::AircraftRecord;
use serde_json::Value;

/// A typed scalar ready for the destination.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One row, with exactly one value per descriptor column, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedRow {
    values: Vec<TypedValue>,
}

impl CoercedRow {
    /// A row of nulls sized to the schema.
    pub fn nulls(schema: &SchemaDescriptor) -> Self {
        Self {
            values: vec![TypedValue::Null; schema.len()],
        }
    }

    pub fn values(&self) -> &[TypedValue] {
        &self.values
    }

    /// Value for a destination column, by its exact name.
    pub fn get<'a>(&'a self, schema: &SchemaDescriptor, column: &str) -> Option<&'a TypedValue> {
        schema
            .columns()
            .iter()
            .position(|c| c.name == column)
            .map(|idx| &self.values[idx])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of coercing one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub row: CoercedRow,
    /// Source fields with no destination column, in record order.
    pub unmapped: Vec<String>,
    /// Non-empty values that had to be nulled.
    pub failures: usize,
}

/// Map a record onto the schema.
pub fn coerce(schema: &SchemaDescriptor, record: &AircraftRecord) -> Coerced {
    let mut row = CoercedRow::nulls(schema);
    let mut unmapped = Vec::new();
    let mut failures = 0;

    for (field, value) in record.fields() {
        let Some((idx, column)) = schema.lookup(field) else {
            unmapped.push(field.to_string());
            continue;
        };

        match coerce_value(column.ty, value) {
            Some(typed) => row.values[idx] = typed,
            None => {
                row.values[idx] = TypedValue::Null;
                if !is_blank(value) {
                    failures += 1;
                }
            }
        }
    }

    if !unmapped.is_empty() {
        tracing::trace!(
            "{} fields not in destination: {}",
            unmapped.len(),
            unmapped.join(",")
        );
    }

    Coerced {
        row,
        unmapped,
        failures,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Convert one raw value to a column type. `None` means null, either because
/// the input was empty/null or because it could not be converted.
pub fn coerce_value(ty: ColumnType, value: &Value) -> Option<TypedValue> {
    if is_blank(value) {
        return None;
    }

    match ty {
        ColumnType::Bool => to_bool(value).map(TypedValue::Bool),
        ColumnType::Int2 => to_int(value, i16::MIN.into(), i16::MAX.into()).map(TypedValue::Int),
        ColumnType::Int4 => to_int(value, i32::MIN.into(), i32::MAX.into()).map(TypedValue::Int),
        ColumnType::Int8 => to_int(value, i64::MIN, i64::MAX).map(TypedValue::Int),
        ColumnType::Float4 => to_float(value)
            .filter(|f| f.abs() <= f64::from(f32::MAX))
            .map(TypedValue::Float),
        ColumnType::Float8 => to_float(value).map(TypedValue::Float),
        ColumnType::Text => Some(TypedValue::Text(to_text(value))),
        ColumnType::Unsupported(_) => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_int(value: &Value, min: i64, max: i64) -> Option<i64> {
    let n = match value {
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => {
                let f = n.as_f64()?.trunc();
                if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
                    return None;
                }
                f as i64
            }
        },
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (min..=max).contains(&n).then_some(n)
}

fn to_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
