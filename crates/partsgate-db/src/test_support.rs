//! In-memory connection factory for pool and executor tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use partsgate_core::{Error, Result};

use crate::factory::{ConnectionFactory, PooledConnection, SqlParam};

/// Factory producing scripted in-memory connections.
///
/// Connections answer a few recognized statements:
/// - `SELECT 1` → one row `{"?column?": 1}`
/// - `SELECT id` → one row `{"id": <connection number>}`
/// - `SELECT parts` → two part rows
/// - `SELECT fail` → a database error
/// - `SELECT sleep` → blocks for 300 ms before answering
pub struct MockFactory {
    created: AtomicUsize,
    pings: Arc<AtomicUsize>,
    fail_connects: AtomicUsize,
    stall_connects: AtomicUsize,
    /// Connections closed so far (incremented on drop).
    pub dropped: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            pings: Arc::new(AtomicUsize::new(0)),
            fail_connects: AtomicUsize::new(0),
            stall_connects: AtomicUsize::new(0),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` connect calls hang for 5 seconds before
    /// completing.
    pub fn stall_next_connects(&self, n: usize) {
        self.stall_connects.store(n, Ordering::SeqCst);
    }

    /// Connections opened so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Pings answered so far across all connections.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MockConnection {
    id: usize,
    pings: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self) -> Result<Box<dyn PooledConnection>> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::database("mock connect refused"));
        }
        let stalled = self.stall_connects.load(Ordering::SeqCst);
        if stalled > 0 {
            self.stall_connects.store(stalled - 1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockConnection {
            id,
            pings: Arc::clone(&self.pings),
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

#[async_trait]
impl PooledConnection for MockConnection {
    async fn query(&self, sql: &str, _params: &[SqlParam]) -> Result<Vec<Value>> {
        match sql {
            "SELECT 1" => Ok(vec![json!({ "?column?": 1 })]),
            "SELECT id" => Ok(vec![json!({ "id": self.id })]),
            "SELECT parts" => Ok(vec![
                json!({ "part_no": "1J0-615-301", "price": 42.5, "in_stock": 12 }),
                json!({ "part_no": "1J0-698-151", "price": 18.0, "in_stock": 0 }),
            ]),
            "SELECT fail" => Err(Error::database("mock query refused")),
            "SELECT sleep" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(vec![json!({ "slept": true })])
            }
            _ => Err(Error::database("mock has no answer for that statement")),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
