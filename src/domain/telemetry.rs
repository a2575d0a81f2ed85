//! Per-domain and server-wide telemetry counters.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::observability::Telemetry;

/// Response code tallies of one domain.
#[derive(Debug, Default, Serialize)]
pub struct DomainTelemetry {
    pub nof_200: Telemetry,
    pub nof_400: Telemetry,
    pub nof_403: Telemetry,
    pub nof_404: Telemetry,
    pub nof_500: Telemetry,
    pub nof_501: Telemetry,
    pub nof_blacklisted_accesses: Telemetry,
}

impl DomainTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter tracking `code`, if that code is tracked.
    pub fn counter(&self, code: u16) -> Option<&Telemetry> {
        match code {
            200 => Some(&self.nof_200),
            400 => Some(&self.nof_400),
            403 => Some(&self.nof_403),
            404 => Some(&self.nof_404),
            500 => Some(&self.nof_500),
            501 => Some(&self.nof_501),
            _ => None,
        }
    }

    /// Count one response with `code`. Untracked codes are ignored.
    pub fn count(&self, code: u16) {
        if let Some(counter) = self.counter(code) {
            counter.increment();
        }
    }

    pub fn reset(&self) {
        for (_, counter) in self.entries() {
            counter.reset();
        }
    }

    /// Name and counter pairs for status pages.
    pub fn entries(&self) -> [(&'static str, &Telemetry); 7] {
        [
            ("nof_200", &self.nof_200),
            ("nof_400", &self.nof_400),
            ("nof_403", &self.nof_403),
            ("nof_404", &self.nof_404),
            ("nof_500", &self.nof_500),
            ("nof_501", &self.nof_501),
            ("nof_blacklisted_accesses", &self.nof_blacklisted_accesses),
        ]
    }
}

/// Run state of one listener, shown on the admin status page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListenerStatus {
    NotRunning,
    Starting,
    Running,
    Stopping,
    /// HTTPS only: no usable certificate.
    NoCertificate,
    Error,
}

impl ListenerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerStatus::NotRunning => "not running",
            ListenerStatus::Starting => "starting",
            ListenerStatus::Running => "running",
            ListenerStatus::Stopping => "stopping",
            ListenerStatus::NoCertificate => "no certificate",
            ListenerStatus::Error => "error",
        }
    }
}

/// Server-wide counters.
#[derive(Debug)]
pub struct ServerTelemetry {
    pub nof_accepted_connections: Telemetry,
    pub nof_blacklisted_accesses: Telemetry,
    pub nof_unknown_domain: Telemetry,
    http_status: Mutex<ListenerStatus>,
    https_status: Mutex<ListenerStatus>,
}

impl Default for ServerTelemetry {
    fn default() -> Self {
        Self {
            nof_accepted_connections: Telemetry::new(),
            nof_blacklisted_accesses: Telemetry::new(),
            nof_unknown_domain: Telemetry::new(),
            http_status: Mutex::new(ListenerStatus::NotRunning),
            https_status: Mutex::new(ListenerStatus::NotRunning),
        }
    }
}

impl ServerTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http_status(&self) -> ListenerStatus {
        *self.http_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn https_status(&self) -> ListenerStatus {
        *self.https_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_http_status(&self, status: ListenerStatus) {
        *self.http_status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn set_https_status(&self, status: ListenerStatus) {
        *self.https_status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}
