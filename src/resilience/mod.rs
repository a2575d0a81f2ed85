//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop with no free connection slot:
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → retry acquire until a slot frees up or the listener stops
//!
//! Failed accept (e.g. out of file descriptors):
//!     → backoff.rs, reset after the next successful accept
//! ```

pub mod backoff;

pub use backoff::Backoff;
