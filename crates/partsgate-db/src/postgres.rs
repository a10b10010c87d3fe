//! `tokio-postgres` adapter for the factory seam.

use serde_json::{Map, Value, json};
use time::format_description::well_known::Rfc3339;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

use async_trait::async_trait;

use partsgate_core::{Error, Result};

use crate::config::DatabaseConfig;
use crate::factory::{ConnectionFactory, PooledConnection, SqlParam};

/// Opens PostgreSQL sessions from the pool configuration.
pub struct PgConnectionFactory {
    config: DatabaseConfig,
}

impl PgConnectionFactory {
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn PooledConnection>> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .password(&self.config.password)
            .dbname(&self.config.dbname);
        // An unreachable server must not hang the connect past the acquire
        // deadline; the pool enforces the same bound on its side.
        if let Some(timeout) = self.config.acquire_timeout() {
            pg.connect_timeout(timeout);
        }

        let (client, connection) = pg.connect(NoTls).await.map_err(|e| {
            Error::database(format!(
                "failed to connect to {}: {e}",
                self.config.connect_info()
            ))
        })?;

        // The connection future performs the actual socket I/O; it resolves
        // once the client is dropped.
        let io_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("Postgres connection task ended: {}", e);
            }
        });

        tracing::debug!("Opened connection to {}", self.config.connect_info());
        Ok(Box::new(PgConnection { client, io_task }))
    }
}

/// One live PostgreSQL session.
pub struct PgConnection {
    client: Client,
    io_task: tokio::task::JoinHandle<()>,
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

#[async_trait]
impl PooledConnection for PgConnection {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Value>> {
        let pg_params: Vec<&(dyn ToSql + Sync)> = params.iter().map(as_pg_param).collect();
        let rows = self
            .client
            .query(sql, &pg_params)
            .await
            .map_err(|e| Error::database(format!("query failed: {e}")))?;

        rows.iter().map(row_to_json).collect()
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| Error::database(format!("ping failed: {e}")))?;
        Ok(())
    }
}

static NULL_PARAM: Option<&str> = None;

fn as_pg_param(param: &SqlParam) -> &(dyn ToSql + Sync) {
    match param {
        SqlParam::Null => &NULL_PARAM,
        SqlParam::Bool(v) => v,
        SqlParam::Int(v) => v,
        SqlParam::Float(v) => v,
        SqlParam::Text(v) => v,
        SqlParam::Uuid(v) => v,
        SqlParam::Timestamp(v) => v,
        SqlParam::Json(v) => v,
    }
}

/// Converts one row into a JSON object keyed by column name.
///
/// Columns with types outside the mapped set fall back to their text
/// representation; a column that cannot be read at all becomes `null`.
fn row_to_json(row: &Row) -> Result<Value> {
    let mut object = Map::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(i)
                .map(|v| v.map_or(Value::Null, Value::Bool)),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(i)
                .map(|v| v.map_or(Value::Null, |n| json!(n))),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(i)
                .map(|v| v.map_or(Value::Null, |n| json!(n))),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(i)
                .map(|v| v.map_or(Value::Null, |n| json!(n))),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(i)
                .map(|v| v.map_or(Value::Null, |n| json!(n))),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(i)
                .map(|v| v.map_or(Value::Null, |n| json!(n))),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<Value>>(i)
                .map(|v| v.unwrap_or(Value::Null)),
            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(i)
                .map(|v| v.map_or(Value::Null, |u| json!(u.to_string()))),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<time::OffsetDateTime>>(i)
                .map(|v| format_timestamp(v.map(|t| t.format(&Rfc3339)))),
            Type::TIMESTAMP => row
                .try_get::<_, Option<time::PrimitiveDateTime>>(i)
                .map(|v| format_timestamp(v.map(|t| t.assume_utc().format(&Rfc3339)))),
            Type::DATE => row
                .try_get::<_, Option<time::Date>>(i)
                .map(|v| v.map_or(Value::Null, |d| json!(d.to_string()))),
            _ => row
                .try_get::<_, Option<String>>(i)
                .map(|v| v.map_or(Value::Null, Value::String)),
        };

        let value = match value {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(
                    "Column {} ({}) could not be read: {}",
                    column.name(),
                    column.type_(),
                    e
                );
                Value::Null
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn format_timestamp(
    formatted: Option<std::result::Result<String, time::error::Format>>,
) -> Value {
    match formatted {
        Some(Ok(text)) => Value::String(text),
        Some(Err(_)) | None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_param_maps_to_typed_none() {
        // Exercise the match arms; the dyn ToSql values are opaque, so
        // this only asserts the mapping is total and does not panic.
        let params = [
            SqlParam::Null,
            SqlParam::Bool(true),
            SqlParam::Int(5),
            SqlParam::Float(1.25),
            SqlParam::Text("brake pad".to_string()),
            SqlParam::Json(json!({ "oem": true })),
        ];
        let mapped: Vec<&(dyn ToSql + Sync)> = params.iter().map(as_pg_param).collect();
        assert_eq!(mapped.len(), params.len());
    }
}
