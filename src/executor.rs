//! Query execution against the target database.
//!
//! The executor only ever sees statements that passed the validator.
//! Failure kind matters to the caller: errors raised by the database
//! itself (unknown column, type mismatch, syntax it would not parse)
//! are [`PipelineError::ExecutionFailed`] and feed the repair loop,
//! while pool and IO failures are
//! [`PipelineError::CollaboratorUnavailable`] and end the turn.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::models::RowSet;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<RowSet, PipelineError>;
}

/// Default ceiling on rows returned from a single statement.
const DEFAULT_MAX_ROWS: usize = 1000;

/// Executor over a SQLite connection pool. Result sets are truncated at
/// the row ceiling so an unbounded `SELECT *` cannot exhaust memory.
pub struct SqliteExecutor {
    pool: SqlitePool,
    max_rows: usize,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_row_limit(pool, DEFAULT_MAX_ROWS)
    }

    pub fn with_row_limit(pool: SqlitePool, max_rows: usize) -> Self {
        Self { pool, max_rows }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> Result<RowSet, PipelineError> {
        let mut rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_error)?;

        if rows.len() > self.max_rows {
            warn!(
                returned = rows.len(),
                max_rows = self.max_rows,
                "result set truncated at row ceiling"
            );
            rows.truncate(self.max_rows);
        }

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            decoded.push(decode_row(row));
        }

        debug!(rows = decoded.len(), "query executed");
        Ok(RowSet {
            columns,
            rows: decoded,
        })
    }
}

fn classify_error(err: sqlx::Error) -> PipelineError {
    match err {
        sqlx::Error::Database(db) => PipelineError::ExecutionFailed {
            message: db.message().to_string(),
        },
        // Decode and column errors also mean the statement, not the
        // infrastructure, is at fault.
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => PipelineError::ExecutionFailed {
            message: err.to_string(),
        },
        other => {
            warn!(error = %other, "database connection failure");
            PipelineError::unavailable(other.to_string())
        }
    }
}

/// Decode one row into JSON values, column by column, keyed on the
/// declared SQLite type of each value.
fn decode_row(row: &SqliteRow) -> Vec<serde_json::Value> {
    row.columns()
        .iter()
        .map(|col| {
            let i = col.ordinal();
            let Ok(value) = row.try_get_raw(i) else {
                return serde_json::Value::Null;
            };
            if value.is_null() {
                return serde_json::Value::Null;
            }
            match value.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(i)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                "REAL" | "NUMERIC" => row
                    .try_get::<f64, _>(i)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                "BOOLEAN" => row
                    .try_get::<bool, _>(i)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                "BLOB" => serde_json::Value::String("<blob>".to_string()),
                _ => row
                    .try_get::<String, _>(i)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
            }
        })
        .collect()
}
