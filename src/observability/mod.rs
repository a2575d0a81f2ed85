//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection workers and pipeline stages produce:
//!     → telemetry.rs (wrapping counters shown on the admin status page)
//!     → metrics.rs (Prometheus counters and gauges)
//!     → logging.rs (structured log events)
//! ```
//!
//! # Design Decisions
//! - Telemetry counters live on the domain and server context, metrics are global
//! - Log fields carry the connection log id so lines correlate to one request lifetime

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use telemetry::Telemetry;
