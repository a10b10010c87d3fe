//! The driver seam the pool is built over.
//!
//! The pool never talks to a database driver directly; it creates sessions
//! through a [`ConnectionFactory`] and runs queries through the
//! [`PooledConnection`] objects it hands out. Production uses the
//! `tokio-postgres` factory in [`crate::postgres`]; tests plug in an
//! in-memory factory.

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use partsgate_core::Result;

/// A positional SQL parameter.
///
/// Parameters cross the factory seam as this enum so the pool and executor
/// stay driver-agnostic; the Postgres adapter maps each variant onto a typed
/// `tokio-postgres` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(OffsetDateTime),
    Json(Value),
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for SqlParam {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<OffsetDateTime> for SqlParam {
    fn from(value: OffsetDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Value> for SqlParam {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl<T> From<Option<T>> for SqlParam
where
    T: Into<SqlParam>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One live database session owned by the pool.
///
/// Dropping a connection closes its session; there is no separate detach
/// step.
#[async_trait]
pub trait PooledConnection: Send + Sync {
    /// Runs a parameterized query, returning one JSON object per row keyed
    /// by column name.
    ///
    /// # Errors
    ///
    /// Returns a database error on any driver-level failure.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Value>>;

    /// Checks that the session is still usable.
    ///
    /// # Errors
    ///
    /// Returns a database error if the session is broken.
    async fn ping(&self) -> Result<()>;
}

/// Creates database sessions for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns a database error if the server is unreachable or rejects the
    /// credentials.
    async fn connect(&self) -> Result<Box<dyn PooledConnection>>;
}
