//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → ServerContext → Server::run
//!
//! Server (server.rs):
//!     start HTTP → start HTTPS (certificate permitting) → session sweep
//!     ControlCommand::Restart → stop, drain, rebuild pool + pipelines, start
//!     ControlCommand::Quit / Ctrl-C → stop, drain, return
//!
//! Shutdown (shutdown.rs):
//!     One watch channel per listener → accept loop and connections stop
//!
//! Control (control.rs):
//!     Admin command → delayed ControlCommand → server loop
//! ```
//!
//! # Design Decisions
//! - Admin actions never stop listeners from a request worker
//! - Every stop is bounded: accept loop first, then in-flight connections
//! - HTTPS failures never prevent HTTP from running

pub mod control;
pub mod server;
pub mod shutdown;

pub use control::{ControlCommand, ControlHandle, ControlReceiver};
pub use server::{Server, ServerError};
pub use shutdown::{Shutdown, ShutdownSignal};
