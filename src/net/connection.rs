//! Connection slots and lifecycle tracking.
//!
//! # Responsibilities
//! - Per-slot identity (`object_id`) and reuse counter (`allocation_count`)
//! - Per-allocation details (remote address, accept time, transport, socket id)
//! - Track live connection tasks so a stopping listener can drain them

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::net::pool::PoolShared;
use crate::statistics::timestamp_ms;

/// Global atomic counter for socket ids.
/// Relaxed ordering is enough since only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one accepted socket, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How the socket is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Plain => "http",
            Transport::Tls => "https",
        }
    }
}

/// Snapshot of an allocated slot, handed to the pipeline.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub object_id: usize,
    pub allocation_count: u64,
    pub remote_addr: SocketAddr,
    pub accepted_at: Instant,
    /// Wall clock accept time in milliseconds since the Unix epoch.
    pub accepted_at_ms: u64,
    pub transport: Transport,
    pub socket: ConnectionId,
}

impl ConnectionInfo {
    /// Remote IP as text, the key used by blacklists and sessions.
    pub fn client_ip(&self) -> String {
        self.remote_addr.ip().to_string()
    }

    /// Log id combining slot and reuse count, e.g. `3:17`.
    pub fn log_id(&self) -> String {
        format!("{}:{}", self.object_id, self.allocation_count)
    }
}

/// One reusable pool slot.
///
/// Created when the pool is built and dropped with it. The back reference to
/// the pool is weak: a slot never keeps its pool alive.
#[derive(Debug)]
pub struct Connection {
    object_id: usize,
    allocation_count: AtomicU64,
    attachment: Mutex<Option<ConnectionInfo>>,
    pool: Weak<PoolShared>,
}

impl Connection {
    pub(crate) fn new(object_id: usize, pool: Weak<PoolShared>) -> Self {
        Self {
            object_id,
            allocation_count: AtomicU64::new(0),
            attachment: Mutex::new(None),
            pool,
        }
    }

    pub fn object_id(&self) -> usize {
        self.object_id
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.load(Ordering::Acquire)
    }

    pub(crate) fn mark_allocated(&self) -> u64 {
        self.allocation_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attach(&self, remote_addr: SocketAddr, transport: Transport) -> ConnectionInfo {
        let info = ConnectionInfo {
            object_id: self.object_id,
            allocation_count: self.allocation_count(),
            remote_addr,
            accepted_at: Instant::now(),
            accepted_at_ms: timestamp_ms(),
            transport,
            socket: ConnectionId::new(),
        };
        *self.attachment.lock().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
        info
    }

    /// Clear per-request state and hand the slot back to its pool.
    fn release(&self) {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = self.pool.upgrade() {
            pool.push_free(self.object_id);
        }
    }
}

/// An allocated slot. Dropping the lease releases the slot.
#[derive(Debug)]
pub struct ConnectionLease {
    connection: Arc<Connection>,
}

impl ConnectionLease {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn object_id(&self) -> usize {
        self.connection.object_id()
    }

    pub fn allocation_count(&self) -> u64 {
        self.connection.allocation_count()
    }

    /// Bind an accepted socket to this slot.
    pub fn attach(&self, remote_addr: SocketAddr, transport: Transport) -> ConnectionInfo {
        self.connection.attach(remote_addr, transport)
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.connection.info()
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.connection.release();
    }
}

/// Counts live connection tasks so a listener can wait for them on stop.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until no connection is live. Returns false if `timeout` ran out first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }
}

/// Guard that tracks one connection task's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(conn = %self.id, "Connection closed");
    }
}
