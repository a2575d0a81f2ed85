//! Wrapping telemetry counters.
//!
//! Counters wrap to zero once they pass [`TELEMETRY_WRAP`] and never go
//! below zero. They are shared by every connection worker, so all updates are
//! single atomic read-modify-write operations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};

/// Largest value a counter holds before wrapping back to zero.
pub const TELEMETRY_WRAP: u64 = 999_999;

/// A thread-safe counter with wrap-at-N and floor-at-zero semantics.
#[derive(Debug, Default)]
pub struct Telemetry {
    value: AtomicU64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one. Returns the new value.
    pub fn increment(&self) -> u64 {
        let previous = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(if v >= TELEMETRY_WRAP { 0 } else { v + 1 })
            })
            .unwrap_or_default();
        if previous >= TELEMETRY_WRAP {
            0
        } else {
            previous + 1
        }
    }

    /// Decrement by one, stopping at zero. Returns the new value.
    pub fn decrement(&self) -> u64 {
        let previous = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl Serialize for Telemetry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.value())
    }
}
