//! Statistics subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline stage
//!     → Mutation (mutation.rs)
//!     → StatisticsChannel::submit (channel.rs, never blocks)
//!     → worker thread
//!     → StatisticsStore::persist (store.rs)
//!     → on_error callback on failure
//! ```

pub mod channel;
pub mod mutation;
pub mod store;

pub use channel::StatisticsChannel;
pub use mutation::{timestamp_ms, Mutation, MutationKind};
pub use store::{JsonLinesStore, StatisticsError, StatisticsStore};
