//! Multi-domain HTTP/HTTPS origin server.
//!
//! Static sites are served per domain through a configurable pipeline of
//! named stages. A built-in admin interface under `/serveradmin` edits
//! parameters, domains, blacklists and pipelines at runtime.

pub mod admin;
pub mod config;
pub mod context;
pub mod domain;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod security;
pub mod session;
pub mod statistics;

#[cfg(test)]
mod testing;

pub use config::schema::ServerConfig;
pub use context::{Collaborators, ServerContext};
pub use lifecycle::Server;
