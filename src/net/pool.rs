//! Fixed-capacity connection slot pool.
//!
//! The pool is the server's only admission control. An accept loop must hold
//! a [`ConnectionLease`] before it accepts a socket, so at most `capacity`
//! connections are ever served concurrently.
//!
//! # Design Decisions
//! - Slots are built once per pool generation; a capacity change builds a new pool
//! - Free slots are handed out in FIFO order so reuse spreads over all slots
//! - Waiting callers back off with jitter and wake early on release
//! - Starvation past the configured ceiling raises an alarm but keeps waiting

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::connection::{Connection, ConnectionLease};
use crate::observability::metrics;
use crate::observability::Telemetry;
use crate::resilience::backoff::Backoff;

/// Backoff bounds while waiting for a free slot.
const ACQUIRE_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACQUIRE_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// State shared between the pool and its slots.
#[derive(Debug)]
pub(crate) struct PoolShared {
    capacity: usize,
    free: Mutex<VecDeque<usize>>,
    released: Notify,
}

impl PoolShared {
    fn free(&self) -> MutexGuard<'_, VecDeque<usize>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_free(&self, object_id: usize) {
        let allocated = {
            let mut free = self.free();
            free.push_back(object_id);
            self.capacity.saturating_sub(free.len())
        };
        metrics::set_pool_allocated(allocated);
        self.released.notify_one();
    }
}

/// A generation of connection slots.
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<Arc<Connection>>,
    shared: Arc<PoolShared>,
    waits: Telemetry,
    starvation_alarms: Telemetry,
}

impl ConnectionPool {
    /// Build `capacity` free slots.
    pub fn build(capacity: usize) -> Self {
        let shared = Arc::new(PoolShared {
            capacity,
            free: Mutex::new((0..capacity).collect()),
            released: Notify::new(),
        });
        let slots = (0..capacity)
            .map(|object_id| Arc::new(Connection::new(object_id, Arc::downgrade(&shared))))
            .collect();

        tracing::debug!(capacity, "Connection pool built");
        Self {
            slots,
            shared,
            waits: Telemetry::new(),
            starvation_alarms: Telemetry::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn allocated(&self) -> usize {
        self.capacity().saturating_sub(self.shared.free().len())
    }

    pub fn available(&self) -> usize {
        self.shared.free().len()
    }

    /// Number of times an acquire had to wait for a slot.
    pub fn waits(&self) -> u64 {
        self.waits.value()
    }

    pub fn starvation_alarms(&self) -> u64 {
        self.starvation_alarms.value()
    }

    /// Take a free slot, or `None` when all slots are allocated.
    pub fn acquire(&self) -> Option<ConnectionLease> {
        let (object_id, allocated) = {
            let mut free = self.shared.free();
            let object_id = free.pop_front()?;
            (object_id, self.capacity().saturating_sub(free.len()))
        };
        let connection = Arc::clone(&self.slots[object_id]);
        let allocation_count = connection.mark_allocated();
        metrics::set_pool_allocated(allocated);
        tracing::trace!(object_id, allocation_count, "Connection slot allocated");
        Some(ConnectionLease::new(connection))
    }

    /// Wait for a free slot.
    ///
    /// Retries with capped backoff and wakes early when a slot is released.
    /// Each time the wait exceeds `max_wait` an alarm is logged and counted,
    /// then waiting continues. Returns `None` only when `shutdown` fires.
    pub async fn acquire_wait(
        &self,
        max_wait: Duration,
        shutdown: &mut ShutdownSignal,
    ) -> Option<ConnectionLease> {
        if let Some(lease) = self.acquire() {
            return Some(lease);
        }
        self.waits.increment();

        let mut backoff = Backoff::new(ACQUIRE_BACKOFF_BASE, ACQUIRE_BACKOFF_MAX);
        let mut waited_since_alarm = Duration::ZERO;
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            let delay = backoff.next_delay();
            let started = tokio::time::Instant::now();

            tokio::select! {
                _ = self.shared.released.notified() => {}
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return None,
            }

            if let Some(lease) = self.acquire() {
                return Some(lease);
            }

            waited_since_alarm += started.elapsed();
            if !max_wait.is_zero() && waited_since_alarm >= max_wait {
                waited_since_alarm = Duration::ZERO;
                self.starvation_alarms.increment();
                metrics::record_pool_starvation();
                tracing::error!(
                    capacity = self.capacity(),
                    max_wait_secs = max_wait.as_secs_f64(),
                    "No free connection slot within the configured wait, still waiting"
                );
            }
        }
    }
}
