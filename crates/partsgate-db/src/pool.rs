//! Bounded connection pool with strict-FIFO waiter handoff.
//!
//! The pool keeps at most `max` live connections (leased + idle + in-flight
//! creates). Idle connections are reused first-in-first-out, which spreads
//! usage evenly; callers that arrive while all capacity is leased join a
//! waiter queue that is satisfied strictly in arrival order. A release with
//! waiters present hands the connection directly to the oldest waiter,
//! bypassing the idle list, so a burst of releases never triggers a
//! reconnect herd.
//!
//! All structural state (idle list, waiter queue, lease counters, lifecycle)
//! lives under one mutex that is never held across an await point.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use partsgate_core::{Error, Result};

use crate::config::DatabaseConfig;
use crate::factory::{ConnectionFactory, PooledConnection, SqlParam};

type Conn = Box<dyn PooledConnection>;

/// Point-in-time pool counters. Best-effort: values may be stale by the
/// time the caller reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    /// Live connections, leased plus idle.
    pub total_connections: usize,
    /// Connections currently leased out.
    pub active_connections: usize,
    /// Connections parked in the idle list.
    pub idle_connections: usize,
}

/// Rows and timing from one pool-level query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// One JSON object per row, keyed by column name.
    pub rows: Vec<Value>,
    /// Number of rows returned.
    pub count: usize,
    /// Wall-clock time the query took.
    pub execution_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    Destroyed,
}

struct IdleConn {
    conn: Conn,
    since: Instant,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Conn>,
}

struct PoolState {
    lifecycle: Lifecycle,
    idle: VecDeque<IdleConn>,
    waiters: VecDeque<Waiter>,
    leased: usize,
    pending_creates: usize,
    next_waiter_id: u64,
}

impl PoolState {
    fn live_total(&self) -> usize {
        self.leased + self.idle.len() + self.pending_creates
    }
}

struct PoolInner {
    factory: Arc<dyn ConnectionFactory>,
    config: DatabaseConfig,
    state: Mutex<PoolState>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded pool of database connections.
///
/// Cheap to clone; clones share the same state. Lifecycle is
/// `Uninitialized → Ready → Destroyed`; `acquire`, `execute_query`, and
/// `health_check` are valid only while `Ready`.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool. No connections are opened until [`initialize`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid configuration.
    ///
    /// [`initialize`]: Self::initialize
    pub fn new(config: DatabaseConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Uninitialized,
                    idle: VecDeque::new(),
                    waiters: VecDeque::new(),
                    leased: 0,
                    pending_creates: 0,
                    next_waiter_id: 0,
                }),
                reaper: Mutex::new(None),
            }),
        })
    }

    /// Opens the initial connections, probes liveness, and makes the pool
    /// ready.
    ///
    /// At least one connection is opened and pinged even when `min` is 0;
    /// a pool that cannot reach its database must not come up. With
    /// `min == 0` the probe connection is closed again afterwards, so the
    /// pool starts empty.
    ///
    /// # Errors
    ///
    /// Returns a database error if any initial connection or the liveness
    /// probe fails; everything created so far is torn down.
    pub async fn initialize(&self) -> Result<()> {
        {
            let state = self.inner.state();
            match state.lifecycle {
                Lifecycle::Uninitialized => {}
                Lifecycle::Ready => {
                    return Err(Error::database("pool is already initialized"));
                }
                Lifecycle::Destroyed => {
                    return Err(Error::pool_closed("initialize on a destroyed pool"));
                }
            }
        }

        tracing::info!(
            "Initializing connection pool for {} (min={}, max={})",
            self.inner.config.connect_info(),
            self.inner.config.min,
            self.inner.config.max,
        );

        let initial = self.inner.config.min.max(1);
        let mut created: Vec<Conn> = Vec::with_capacity(initial as usize);
        for _ in 0..initial {
            match self.inner.factory.connect().await {
                Ok(conn) => created.push(conn),
                Err(e) => {
                    tracing::error!("Pool initialization failed: {}", e);
                    drop(created);
                    return Err(e);
                }
            }
        }

        if let Err(e) = created[0].ping().await {
            tracing::error!("Pool liveness probe failed: {}", e);
            drop(created);
            return Err(e);
        }

        // The probe connection is only kept when `min` asks for one.
        if self.inner.config.min == 0 {
            created.clear();
        }

        {
            let mut state = self.inner.state();
            state.lifecycle = Lifecycle::Ready;
            let now = Instant::now();
            state
                .idle
                .extend(created.into_iter().map(|conn| IdleConn { conn, since: now }));
        }

        let handle = self.spawn_reaper();
        *self.inner.reaper() = Some(handle);

        tracing::debug!("Connection pool ready");
        Ok(())
    }

    /// Leases a connection, honoring the configured acquire deadline.
    ///
    /// An idle connection is reused (oldest first) when one exists; a new
    /// one is created while capacity remains; otherwise the caller queues
    /// behind earlier waiters and resumes when a connection is handed to it.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool is destroyed, now or while
    ///   waiting.
    /// - [`Error::PoolTimeout`] if the deadline expires while queued or
    ///   while a new connection is being opened.
    /// - [`Error::Database`] if the pool is not initialized or a new
    ///   connection cannot be opened.
    pub async fn acquire(&self) -> Result<PoolGuard> {
        self.acquire_with_deadline(self.inner.config.acquire_timeout())
            .await
    }

    /// Leases a connection under an explicit deadline, overriding the
    /// configured one.
    ///
    /// # Errors
    ///
    /// See [`acquire`](Self::acquire).
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> Result<PoolGuard> {
        self.acquire_with_deadline(Some(timeout)).await
    }

    async fn acquire_with_deadline(&self, deadline: Option<Duration>) -> Result<PoolGuard> {
        enum Plan {
            Granted(Conn),
            Create,
            Wait(oneshot::Receiver<Conn>, u64),
        }

        let plan = {
            let mut state = self.inner.state();
            match state.lifecycle {
                Lifecycle::Uninitialized => {
                    return Err(Error::database("pool is not initialized"));
                }
                Lifecycle::Destroyed => {
                    return Err(Error::pool_closed("acquire on a destroyed pool"));
                }
                Lifecycle::Ready => {}
            }

            if let Some(entry) = state.idle.pop_front() {
                state.leased += 1;
                Plan::Granted(entry.conn)
            } else if state.live_total() < self.inner.config.max as usize {
                state.pending_creates += 1;
                Plan::Create
            } else {
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter { id, tx });
                Plan::Wait(rx, id)
            }
        };

        match plan {
            Plan::Granted(conn) => Ok(self.guard(conn)),
            Plan::Create => self.create_for_lease(deadline).await,
            Plan::Wait(rx, id) => self.wait_for_handoff(rx, id, deadline).await,
        }
    }

    /// Opens a new connection for the calling lease, under the acquire
    /// deadline; the creation slot was already reserved under the lock.
    async fn create_for_lease(&self, deadline: Option<Duration>) -> Result<PoolGuard> {
        let started = Instant::now();
        let connected = match deadline {
            None => self.inner.factory.connect().await,
            Some(limit) => match tokio::time::timeout(limit, self.inner.factory.connect()).await {
                Ok(connected) => connected,
                Err(_) => {
                    self.inner.release_create_slot();
                    let waited = started.elapsed().as_millis() as u64;
                    tracing::debug!("Acquire timed out after {} ms opening a connection", waited);
                    return Err(Error::pool_timeout(waited));
                }
            },
        };

        match connected {
            Ok(conn) => {
                let mut state = self.inner.state();
                state.pending_creates -= 1;
                if state.lifecycle == Lifecycle::Destroyed {
                    drop(state);
                    drop(conn);
                    return Err(Error::pool_closed("pool destroyed while connecting"));
                }
                state.leased += 1;
                drop(state);
                tracing::debug!("Opened new pooled connection");
                Ok(self.guard(conn))
            }
            Err(e) => {
                self.inner.release_create_slot();
                Err(e)
            }
        }
    }

    async fn wait_for_handoff(
        &self,
        rx: oneshot::Receiver<Conn>,
        id: u64,
        deadline: Option<Duration>,
    ) -> Result<PoolGuard> {
        let started = Instant::now();
        let mut watch = WaiterWatch {
            inner: Arc::clone(&self.inner),
            id,
            rx,
            armed: true,
        };

        let outcome = match deadline {
            None => (&mut watch.rx).await,
            Some(limit) => match tokio::time::timeout(limit, &mut watch.rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Deadline expired while queued; the watch removes the
                    // waiter entry (or re-routes a racing handoff) on drop.
                    drop(watch);
                    let waited = started.elapsed().as_millis() as u64;
                    tracing::debug!("Acquire timed out after {} ms in the waiter queue", waited);
                    return Err(Error::pool_timeout(waited));
                }
            },
        };

        watch.armed = false;
        match outcome {
            Ok(conn) => Ok(self.guard(conn)),
            // The sender only drops when the pool is destroyed.
            Err(_) => Err(Error::pool_closed(
                "pool destroyed while waiting for a connection",
            )),
        }
    }

    /// Runs one query under the configured query deadline, releasing the
    /// connection on every exit path.
    ///
    /// A timed-out connection is torn down rather than reused: its session
    /// may still be executing server-side. A clean driver error releases
    /// the connection back to the pool.
    ///
    /// # Errors
    ///
    /// Acquire errors pass through; driver failures and query timeouts map
    /// to [`Error::Database`].
    pub async fn execute_query(&self, sql: &str, params: &[SqlParam]) -> Result<QueryResult> {
        let mut guard = self.acquire().await?;
        let started = Instant::now();
        let timeout = self.inner.config.query_timeout();

        match tokio::time::timeout(timeout, guard.query(sql, params)).await {
            Ok(Ok(rows)) => {
                let count = rows.len();
                Ok(QueryResult {
                    rows,
                    count,
                    execution_time: started.elapsed(),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                guard.mark_broken();
                Err(Error::database(format!(
                    "query timed out after {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Runs a trivial query and reports whether it succeeded.
    pub async fn health_check(&self) -> bool {
        match self.execute_query("SELECT 1", &[]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Pool health check failed: {}", e);
                false
            }
        }
    }

    /// Returns a point-in-time snapshot of the pool counters.
    #[must_use]
    pub fn pool_info(&self) -> PoolInfo {
        let state = self.inner.state();
        PoolInfo {
            total_connections: state.leased + state.idle.len(),
            active_connections: state.leased,
            idle_connections: state.idle.len(),
        }
    }

    /// Destroys the pool immediately.
    ///
    /// New `acquire` calls fail fast, every queued waiter is rejected with
    /// a pool-closed error, all idle connections are closed, and the idle
    /// reaper stops. Outstanding leases remain the caller's responsibility;
    /// releasing one after destroy closes that connection.
    pub async fn destroy(&self) {
        let (idle, waiters, leased) = {
            let mut state = self.inner.state();
            if state.lifecycle == Lifecycle::Destroyed {
                return;
            }
            state.lifecycle = Lifecycle::Destroyed;
            let idle: Vec<IdleConn> = state.idle.drain(..).collect();
            // Dropping the senders wakes every waiter with a closed error.
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
            (idle, waiters, state.leased)
        };

        if let Some(handle) = self.inner.reaper().take() {
            handle.abort();
        }

        let rejected = waiters.len();
        drop(waiters);
        let closed = idle.len();
        drop(idle);

        tracing::info!(
            "Connection pool destroyed ({} idle closed, {} waiters rejected, {} still leased)",
            closed,
            rejected,
            leased,
        );
    }

    /// Waits up to `grace` for outstanding leases to return, then destroys
    /// the pool.
    pub async fn destroy_with_grace(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            let leased = self.inner.state().leased;
            if leased == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Destroying pool with {} connections still leased after {:?} grace",
                    leased,
                    grace,
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.destroy().await;
    }

    fn guard(&self, conn: Conn) -> PoolGuard {
        PoolGuard {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
            broken: false,
        }
    }

    /// Background task that closes idle connections unused beyond the idle
    /// timeout, never dropping the pool below `min`.
    fn spawn_reaper(&self) -> JoinHandle<()> {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let idle_timeout = self.inner.config.idle_timeout();
        let period = (idle_timeout / 2).max(Duration::from_millis(50));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.reap_idle(idle_timeout);
            }
        })
    }
}

impl PoolInner {
    /// Locks the pool state, recovering from a poisoned lock: the state
    /// structures stay consistent because no panic can occur between two
    /// counter updates.
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reaper(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reaper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes a connection coming back from a lease: oldest live waiter
    /// first, idle list second, teardown when the pool is gone or the
    /// connection is broken.
    fn release(self: &Arc<Self>, conn: Conn, broken: bool) {
        let mut state = self.state();

        if state.lifecycle == Lifecycle::Destroyed {
            state.leased -= 1;
            drop(state);
            drop(conn);
            return;
        }

        if broken {
            state.leased -= 1;
            let respawn =
                !state.waiters.is_empty() && state.live_total() < self.config.max as usize;
            if respawn {
                state.pending_creates += 1;
            }
            drop(state);
            drop(conn);
            tracing::debug!("Closed broken pooled connection");
            if respawn {
                self.spawn_create_for_waiter();
            }
            return;
        }

        // Direct handoff: the connection stays leased, it just changes
        // hands. A waiter whose receiver is gone is skipped.
        let mut conn = conn;
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => match waiter.tx.send(conn) {
                    Ok(()) => return,
                    Err(returned) => conn = returned,
                },
                None => {
                    state.leased -= 1;
                    state.idle.push_back(IdleConn {
                        conn,
                        since: Instant::now(),
                    });
                    return;
                }
            }
        }
    }

    /// Gives back a reserved creation slot whose connect failed or timed
    /// out. Queued waiters were counting on that capacity, so a replacement
    /// create is spawned for them while room remains.
    fn release_create_slot(self: &Arc<Self>) {
        let respawn = {
            let mut state = self.state();
            state.pending_creates -= 1;
            let respawn = state.lifecycle == Lifecycle::Ready
                && !state.waiters.is_empty()
                && state.live_total() < self.config.max as usize;
            if respawn {
                state.pending_creates += 1;
            }
            respawn
        };
        if respawn {
            self.spawn_create_for_waiter();
        }
    }

    /// Removes an abandoned waiter; if the handoff won the race, the
    /// connection it received is re-routed instead of leaking.
    fn abandon_waiter(self: &Arc<Self>, id: u64, rx: &mut oneshot::Receiver<Conn>) {
        let removed = {
            let mut state = self.state();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != id);
            state.waiters.len() != before
        };
        if !removed
            && let Ok(conn) = rx.try_recv()
        {
            self.release(conn, false);
        }
    }

    /// Opens a replacement connection for the oldest waiter after a broken
    /// release or failed create freed capacity. The creation slot was
    /// already reserved under the lock.
    fn spawn_create_for_waiter(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.factory.connect().await {
                Ok(conn) => inner.install_created(conn),
                Err(e) => {
                    let mut state = inner.state();
                    state.pending_creates -= 1;
                    drop(state);
                    tracing::warn!("Replacement connection failed: {}", e);
                }
            }
        });
    }

    /// Installs a freshly created (never leased) connection: oldest live
    /// waiter first, else the idle list.
    fn install_created(self: &Arc<Self>, conn: Conn) {
        let mut state = self.state();
        state.pending_creates -= 1;

        if state.lifecycle == Lifecycle::Destroyed {
            drop(state);
            drop(conn);
            return;
        }

        let mut conn = conn;
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => match waiter.tx.send(conn) {
                    Ok(()) => {
                        state.leased += 1;
                        return;
                    }
                    Err(returned) => conn = returned,
                },
                None => {
                    state.idle.push_back(IdleConn {
                        conn,
                        since: Instant::now(),
                    });
                    return;
                }
            }
        }
    }

    fn reap_idle(self: &Arc<Self>, idle_timeout: Duration) {
        let expired = {
            let mut state = self.state();
            if state.lifecycle != Lifecycle::Ready {
                return;
            }
            let mut expired = Vec::new();
            while state.live_total() > self.config.min as usize {
                // Stalest entries sit at the front.
                let front_expired = state
                    .idle
                    .front()
                    .is_some_and(|entry| entry.since.elapsed() >= idle_timeout);
                if !front_expired {
                    break;
                }
                if let Some(entry) = state.idle.pop_front() {
                    expired.push(entry);
                }
            }
            expired
        };

        if !expired.is_empty() {
            tracing::debug!("Reaped {} idle connections", expired.len());
        }
        drop(expired);
    }
}

/// Cleanup for an acquire future abandoned while queued: dropped futures
/// and expired deadlines must not leak a waiter slot or a handed-off
/// connection.
struct WaiterWatch {
    inner: Arc<PoolInner>,
    id: u64,
    rx: oneshot::Receiver<Conn>,
    armed: bool,
}

impl Drop for WaiterWatch {
    fn drop(&mut self) {
        if self.armed {
            let inner = Arc::clone(&self.inner);
            inner.abandon_waiter(self.id, &mut self.rx);
        }
    }
}

/// RAII lease on a pooled connection.
///
/// Dropping the guard returns the connection to the pool (or to the oldest
/// waiter); a guard marked broken tears the connection down instead.
pub struct PoolGuard {
    conn: Option<Conn>,
    inner: Arc<PoolInner>,
    broken: bool,
}

impl PoolGuard {
    /// Runs a parameterized query on the leased connection.
    ///
    /// # Errors
    ///
    /// Returns a database error on any driver-level failure.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Value>> {
        self.connection().query(sql, params).await
    }

    /// Checks the leased connection is still usable.
    ///
    /// # Errors
    ///
    /// Returns a database error if the session is broken.
    pub async fn ping(&self) -> Result<()> {
        self.connection().ping().await
    }

    /// Marks the connection as unusable; it is torn down on release
    /// instead of returning to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn connection(&self) -> &dyn PooledConnection {
        // Invariant: the connection is only taken in drop.
        self.conn
            .as_deref()
            .expect("pooled connection already released")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.release(conn, self.broken);
        }
    }
}
