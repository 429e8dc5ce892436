//! Relational destination for coerced rows.
//!
//! The loader only needs three things from the database: the table's column
//! metadata, a bulk-copy path and a multi-row insert path. [`Destination`]
//! is that surface; [`PgDestination`] implements it over a PostgreSQL pool.

use crate::coerce::{CoercedRow, TypedValue};
use crate::schema::{ColumnInfo, ColumnType, SchemaDescriptor};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Column, Executor, PgPool, Postgres, QueryBuilder, Statement};
use thiserror::Error;

/// PostgreSQL refuses statements with more bind parameters than this.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Bulk copy rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Destination: Send + Sync + 'static {
    /// Column metadata of the destination table. No rows are read.
    async fn describe(&self) -> Result<Vec<ColumnInfo>, DestinationError>;

    /// Bulk-copy a tab-delimited payload (see [`crate::bulk::encode_copy_payload`]).
    /// Returns the number of rows the destination accepted.
    async fn copy_rows(&self, columns: &[&str], payload: String) -> Result<u64, DestinationError>;

    /// Multi-row insert for small batches.
    async fn insert_rows(
        &self,
        schema: &SchemaDescriptor,
        rows: &[CoercedRow],
    ) -> Result<u64, DestinationError>;
}

/// Double-quote an SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_list<'a, I: IntoIterator<Item = &'a str>>(columns: I) -> String {
    columns
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `COPY` statement for a tab-delimited CSV stream where an empty unquoted
/// field is null.
pub fn copy_statement(table: &str, columns: &[&str]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER E'\\t', NULL '')",
        quote_ident(table),
        column_list(columns.iter().copied())
    )
}

/// PostgreSQL destination table.
///
/// Every call checks out its own pooled connection and runs in its own
/// transaction; the pool size caps concurrent connections.
#[derive(Debug, Clone)]
pub struct PgDestination {
    pool: PgPool,
    table: String,
}

impl PgDestination {
    /// Connect lazily; the first query opens the first connection.
    pub fn connect_lazy(options: PgConnectOptions, table: String, max_connections: u32) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_lazy_with(options);
        Self { pool, table }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn describe(&self) -> Result<Vec<ColumnInfo>, DestinationError> {
        let sql = format!("SELECT * FROM {} LIMIT 0", quote_ident(&self.table));
        let mut conn = self.pool.acquire().await?;
        let statement = (&mut *conn).prepare(sql.as_str()).await?;

        let columns = statement
            .columns()
            .iter()
            .map(|c| {
                let oid = c.type_info().oid().map(|oid| oid.0).unwrap_or(0);
                ColumnInfo::new(c.name(), oid)
            })
            .collect();

        Ok(columns)
    }

    async fn copy_rows(&self, columns: &[&str], payload: String) -> Result<u64, DestinationError> {
        let statement = copy_statement(&self.table, columns);
        let mut tx = self.pool.begin().await?;

        let mut copy = tx.copy_in_raw(&statement).await?;
        copy.send(payload.as_bytes()).await?;
        let rows = copy.finish().await?;

        tx.commit().await?;
        Ok(rows)
    }

    async fn insert_rows(
        &self,
        schema: &SchemaDescriptor,
        rows: &[CoercedRow],
    ) -> Result<u64, DestinationError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let prefix = format!(
            "INSERT INTO {} ({}) ",
            quote_ident(&self.table),
            column_list(schema.column_names())
        );
        let chunk_rows = (MAX_BIND_PARAMS / schema.len().max(1)).max(1);

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in rows.chunks(chunk_rows) {
            let mut builder = QueryBuilder::<Postgres>::new(prefix.as_str());
            builder.push_values(chunk, |mut b, row| {
                for (column, value) in schema.columns().iter().zip(row.values()) {
                    push_typed(&mut b, column.ty, value);
                }
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

/// Bind a value with the column's own SQL type, so nulls are typed too.
fn push_typed(b: &mut Separated<'_, '_, Postgres, &'static str>, ty: ColumnType, value: &TypedValue) {
    match ty {
        ColumnType::Bool => {
            b.push_bind(match value {
                TypedValue::Bool(v) => Some(*v),
                _ => None,
            });
        }
        ColumnType::Int2 => {
            b.push_bind(match value {
                TypedValue::Int(v) => i16::try_from(*v).ok(),
                _ => None,
            });
        }
        ColumnType::Int4 => {
            b.push_bind(match value {
                TypedValue::Int(v) => i32::try_from(*v).ok(),
                _ => None,
            });
        }
        ColumnType::Int8 => {
            b.push_bind(match value {
                TypedValue::Int(v) => Some(*v),
                _ => None,
            });
        }
        ColumnType::Float4 => {
            b.push_bind(match value {
                TypedValue::Float(v) => Some(*v as f32),
                _ => None,
            });
        }
        ColumnType::Float8 => {
            b.push_bind(match value {
                TypedValue::Float(v) => Some(*v),
                _ => None,
            });
        }
        ColumnType::Text => {
            b.push_bind(match value {
                TypedValue::Text(v) => Some(v.clone()),
                _ => None,
            });
        }
        ColumnType::Unsupported(_) => {
            b.push("NULL");
        }
    }
}
