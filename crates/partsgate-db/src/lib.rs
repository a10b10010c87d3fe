//! Bounded connection pool and query executor for the pricing/stock
//! database.
//!
//! The pool is hand-built over the [`ConnectionFactory`] seam so its
//! contract (strict-FIFO waiter handoff on release, acquire deadlines,
//! idle eviction down to `min`) stays driver-independent. Production wires
//! in [`PgConnectionFactory`]; tests use an in-memory factory.
//!
//! Callers run queries through [`QueryExecutor`], which decodes rows into
//! typed structs and keeps SQL parameter values out of errors and logs.

pub mod config;
pub mod executor;
pub mod factory;
pub mod pool;
pub mod postgres;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::DatabaseConfig;
pub use executor::{QueryExecutor, TypedQueryResult};
pub use factory::{ConnectionFactory, PooledConnection, SqlParam};
pub use pool::{Pool, PoolGuard, PoolInfo, QueryResult};
pub use postgres::PgConnectionFactory;
