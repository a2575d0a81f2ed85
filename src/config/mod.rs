//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig
//!     → ServerContext (parameters behind an ArcSwap, domains in the registry)
//!
//! Admin "Save*" command:
//!     ServerContext snapshot → loader::save_config → same file
//! Admin "Read*" command:
//!     loader::load_config → replace parameters / domains / blacklist
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Parameter changes take effect for new connections; listener and pool
//!   changes need a restart

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, save_config, ConfigError, ConfigSource};
pub use schema::{
    default_services, DomainConfig, ObservabilityConfig, ParameterError, ServerConfig,
    ServerParameters, DEFAULT_SERVICES,
};
pub use validation::{validate_config, ValidationError};
