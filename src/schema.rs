//! Destination schema discovery.
//!
//! The destination table's columns are not known until the database is
//! asked. [`SchemaDescriptor::resolve`] asks once, and the resulting value is
//! shared read-only (behind an `Arc`) with every worker.

use crate::destination::{Destination, DestinationError};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to describe destination table: {0}")]
    Describe(#[from] DestinationError),
    #[error("Destination table has no columns")]
    NoColumns,
}

/// Column type as declared by the destination, keyed by PostgreSQL type oid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Unsupported(u32),
}

impl ColumnType {
    pub const fn from_oid(oid: u32) -> Self {
        match oid {
            16 => Self::Bool,
            21 => Self::Int2,
            23 => Self::Int4,
            20 => Self::Int8,
            700 => Self::Float4,
            701 => Self::Float8,
            25 | 1042 | 1043 => Self::Text,
            other => Self::Unsupported(other),
        }
    }

    pub const fn oid(&self) -> u32 {
        match self {
            Self::Bool => 16,
            Self::Int2 => 21,
            Self::Int4 => 23,
            Self::Int8 => 20,
            Self::Float4 => 700,
            Self::Float8 => 701,
            Self::Text => 25,
            Self::Unsupported(oid) => *oid,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int2 => f.write_str("int2"),
            Self::Int4 => f.write_str("int4"),
            Self::Int8 => f.write_str("int8"),
            Self::Float4 => f.write_str("float4"),
            Self::Float8 => f.write_str("float8"),
            Self::Text => f.write_str("text"),
            Self::Unsupported(oid) => write!(f, "oid {}", oid),
        }
    }
}

/// Raw column metadata as reported by the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: u32,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }
}

/// A destination column the loader writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name exactly as the destination spells it.
    pub name: String,
    pub ty: ColumnType,
}

/// Lower-cased source field name → destination column.
///
/// Columns keep the table's declared order; every coerced row carries one
/// value per column in that order.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnSpec>,
    by_key: HashMap<String, usize>,
}

impl SchemaDescriptor {
    /// Query the destination once and build the descriptor.
    pub async fn resolve<D: Destination + ?Sized>(destination: &D) -> Result<Self, SchemaError> {
        let info = destination.describe().await?;
        let descriptor = Self::from_columns(info);
        if descriptor.is_empty() {
            return Err(SchemaError::NoColumns);
        }

        let unsupported: Vec<String> = descriptor
            .columns
            .iter()
            .filter(|c| matches!(c.ty, ColumnType::Unsupported(_)))
            .map(|c| format!("{} ({})", c.name, c.ty))
            .collect();
        if !unsupported.is_empty() {
            tracing::warn!(
                "{} columns have unsupported types and will always be null: {}",
                unsupported.len(),
                unsupported.join(", ")
            );
        }

        tracing::info!("Resolved {} destination columns", descriptor.len());
        Ok(descriptor)
    }

    /// Build from column metadata. On a lower-case collision the first
    /// column wins and later ones are left out.
    pub fn from_columns<I: IntoIterator<Item = ColumnInfo>>(info: I) -> Self {
        let mut columns = Vec::new();
        let mut by_key = HashMap::new();

        for ColumnInfo { name, type_oid } in info {
            let key = name.to_lowercase();
            if by_key.contains_key(&key) {
                tracing::warn!("Column {} collides with an earlier column, skipping", name);
                continue;
            }
            by_key.insert(key, columns.len());
            columns.push(ColumnSpec {
                name,
                ty: ColumnType::from_oid(type_oid),
            });
        }

        Self { columns, by_key }
    }

    /// Look up a source field. The field is lower-cased before lookup.
    pub fn lookup(&self, field: &str) -> Option<(usize, &ColumnSpec)> {
        let idx = match self.by_key.get(field) {
            Some(idx) => *idx,
            None => *self.by_key.get(&field.to_lowercase())?,
        };
        Some((idx, &self.columns[idx]))
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
