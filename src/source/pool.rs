//! Bounded connection pool
//!
//! Connections are created lazily up to the pool capacity and handed out as
//! [`PooledConnection`] guards that return themselves on drop. When every
//! connection is in use, `acquire` blocks until one is released; exhaustion
//! never fails. A connection whose scan failed is discarded rather than
//! returned, which frees its slot for a fresh one.

use crate::error::PoolError;
use crate::source::{SourceConnection, SourceConnector};
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened over the pool's lifetime
    pub created: u64,

    /// Connections dropped after a failure
    pub discarded: u64,

    /// Successful acquisitions
    pub acquired: u64,

    /// Acquisitions that had to wait for a release
    pub waits: u64,

    /// Connections currently checked out
    pub in_use: usize,

    /// Highest simultaneous checkout
    pub peak_in_use: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    discarded: AtomicU64,
    acquired: AtomicU64,
    waits: AtomicU64,
}

struct PoolState {
    /// Open connections not checked out
    idle: Vec<Box<dyn SourceConnection>>,

    /// Open connections, idle or checked out, plus ones being opened
    open: usize,

    /// Checked out
    in_use: usize,

    peak_in_use: usize,
}

/// Pool of source connections shared by all workers
pub struct ConnectionPool {
    connector: Arc<dyn SourceConnector>,
    capacity: usize,
    state: Mutex<PoolState>,
    released: Condvar,
    counters: Counters,
}

impl ConnectionPool {
    /// Create an empty pool; connections are opened on demand
    pub fn new(connector: Arc<dyn SourceConnector>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            connector,
            capacity,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(capacity),
                open: 0,
                in_use: 0,
                peak_in_use: 0,
            }),
            released: Condvar::new(),
            counters: Counters::default(),
        })
    }

    /// Maximum number of open connections
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connection target, for messages
    pub fn target(&self) -> &str {
        self.connector.target()
    }

    /// Acquire a connection, waiting as long as it takes
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, PoolError> {
        self.acquire_inner(None)
    }

    /// Acquire a connection, giving up at `deadline`
    pub fn acquire_until(self: &Arc<Self>, deadline: Instant) -> Result<PooledConnection, PoolError> {
        self.acquire_inner(Some(deadline))
    }

    fn acquire_inner(self: &Arc<Self>, deadline: Option<Instant>) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();
        let mut waited = false;
        let mut state = self.state.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                self.check_out(&mut state, waited);
                return Ok(self.hand_out(conn));
            }

            if state.open < self.capacity {
                // Reserve the slot, then connect without holding the lock
                state.open += 1;
                self.check_out(&mut state, waited);
                drop(state);

                return match self.connector.connect() {
                    Ok(conn) => {
                        let created = self.counters.created.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!(database = self.target(), created, "Opened pooled connection");
                        Ok(self.hand_out(conn))
                    }
                    Err(e) => {
                        let mut state = self.state.lock();
                        state.open -= 1;
                        state.in_use -= 1;
                        drop(state);
                        self.released.notify_one();
                        Err(PoolError::Connect(e))
                    }
                };
            }

            waited = true;
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                        && state.open >= self.capacity
                    {
                        return Err(PoolError::DeadlineExceeded {
                            waited: started.elapsed(),
                        });
                    }
                }
                None => self.released.wait(&mut state),
            }
        }
    }

    fn check_out(&self, state: &mut PoolState, waited: bool) {
        state.in_use += 1;
        state.peak_in_use = state.peak_in_use.max(state.in_use);
        if waited {
            self.counters.waits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn hand_out(self: &Arc<Self>, conn: Box<dyn SourceConnection>) -> PooledConnection {
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        PooledConnection::new(conn, Arc::clone(self))
    }

    fn release(&self, conn: Box<dyn SourceConnection>) {
        {
            let mut state = self.state.lock();
            state.in_use -= 1;
            state.idle.push(conn);
        }
        trace!("Connection returned to pool");
        self.released.notify_one();
    }

    fn discard(&self, conn: Box<dyn SourceConnection>) {
        drop(conn);
        {
            let mut state = self.state.lock();
            state.in_use -= 1;
            state.open -= 1;
        }
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        debug!("Discarded pooled connection");
        self.released.notify_one();
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            waits: self.counters.waits.load(Ordering::Relaxed),
            in_use: state.in_use,
            peak_in_use: state.peak_in_use,
        }
    }
}

/// A pooled connection with automatic return to the pool on drop
pub struct PooledConnection {
    /// The connection (Option for taking on drop)
    conn: Option<Box<dyn SourceConnection>>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    fn new(conn: Box<dyn SourceConnection>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Close the connection instead of returning it to the pool
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn SourceConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect("connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
