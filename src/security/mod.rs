//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted socket:
//!     → server blacklist (before any domain is known)
//!     → domain resolution
//!     → domain blacklist
//!     → pipeline
//! ```
//!
//! # Design Decisions
//! - A `close` entry drops the socket without writing a byte
//! - 401 and 503 entries get a minimal fixed response

pub mod blacklist;

pub use blacklist::{Action, Blacklist};
