//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop (listener.rs)
//!     → pool.rs (acquire a connection slot first)
//!     → accept socket, server blacklist check
//!     → tls.rs (handshake with the SNI certificate resolver, HTTPS only)
//!     → connection.rs (attach socket to slot, track for drain)
//!     → hand off to the HTTP layer
//!
//! Slot states:
//!     Free → Allocated → Free (allocation_count bumps on every acquire)
//! ```
//!
//! # Design Decisions
//! - The pool is the only admission control, no separate rate limiter
//! - Each connection tracked so a stopping listener can drain it
//! - Certificate problems disable HTTPS, never the process

pub mod connection;
pub mod listener;
pub mod pool;
pub mod tls;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionLease, ConnectionTracker, Transport};
pub use listener::{Listener, ListenerError};
pub use pool::ConnectionPool;
