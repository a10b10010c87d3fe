//! Typed query execution over the pool.

use std::time::Duration;

use serde::de::DeserializeOwned;

use partsgate_core::{Error, Result};

use crate::factory::SqlParam;
use crate::pool::Pool;

/// SQL text longer than this is truncated in error messages.
const SQL_PREVIEW_LEN: usize = 120;

/// Rows decoded into `T`, with timing.
#[derive(Debug, Clone)]
pub struct TypedQueryResult<T> {
    /// Decoded rows.
    pub rows: Vec<T>,
    /// Number of rows returned.
    pub count: usize,
    /// Wall-clock time the query took.
    pub execution_time: Duration,
}

/// Runs parameterized queries for business-logic callers.
///
/// Delegates to the [`Pool`] and normalizes driver failures into errors
/// carrying the truncated SQL text and elapsed time. Parameter values never
/// appear in errors or logs.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Pool,
}

impl QueryExecutor {
    /// Creates an executor over the given pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Runs a query and decodes each row into `T`.
    ///
    /// # Errors
    ///
    /// Pool lifecycle errors pass through unchanged; driver and decode
    /// failures map to [`Error::Database`] with the truncated SQL text and
    /// elapsed milliseconds.
    pub async fn execute_query<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<TypedQueryResult<T>> {
        let started = std::time::Instant::now();
        let result = self
            .pool
            .execute_query(sql, params)
            .await
            .map_err(|e| normalize(e, sql, started.elapsed()))?;

        let mut rows = Vec::with_capacity(result.rows.len());
        for row in result.rows {
            let decoded = serde_json::from_value(row).map_err(|e| {
                Error::database(format!(
                    "row decode failed after {} ms: {} (sql: {})",
                    result.execution_time.as_millis(),
                    e,
                    truncate_sql(sql),
                ))
            })?;
            rows.push(decoded);
        }

        Ok(TypedQueryResult {
            count: rows.len(),
            rows,
            execution_time: result.execution_time,
        })
    }

    /// Best-effort single-row lookup: returns the first row, or `None` both
    /// when the query matches nothing and when it fails.
    ///
    /// Failures are logged at warn and swallowed; use
    /// [`execute_query`](Self::execute_query) where errors must propagate.
    pub async fn query_optional<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Option<T> {
        match self.execute_query::<T>(sql, params).await {
            Ok(result) => result.rows.into_iter().next(),
            Err(e) => {
                tracing::warn!("Optional lookup degraded to no match: {}", e);
                None
            }
        }
    }
}

/// Adds SQL and timing context to database errors; pool lifecycle errors
/// pass through so callers can still classify them.
fn normalize(error: Error, sql: &str, elapsed: Duration) -> Error {
    match error {
        Error::Database { message } => Error::database(format!(
            "query failed after {} ms: {} (sql: {})",
            elapsed.as_millis(),
            message,
            truncate_sql(sql),
        )),
        other => other,
    }
}

fn truncate_sql(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.len() <= SQL_PREVIEW_LEN {
        trimmed.to_string()
    } else {
        let mut end = SQL_PREVIEW_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
