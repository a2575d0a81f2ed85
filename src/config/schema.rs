//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits so the admin interface can write the running
//! configuration back to the same TOML file it was loaded from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::Action;

/// Stage list given to domains that do not name their own.
pub const DEFAULT_SERVICES: &[&str] = &[
    "get-session",
    "only-get-or-post",
    "decode-post-form-urlencoded",
    "get-resource-path-from-url",
    "get-file-at-resource-path",
    "record-outcome",
];

pub fn default_services() -> Vec<String> {
    DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect()
}

/// Root configuration for the origin server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Server-wide parameters.
    pub parameters: ServerParameters,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Server-wide blacklist, checked before any domain is known.
    pub blacklist: BTreeMap<String, Action>,

    /// Hosted domains.
    pub domains: Vec<DomainConfig>,
}

/// Server parameters. Every field can be changed at runtime by name.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerParameters {
    /// Address both listeners bind to.
    pub bind_address: String,

    /// Plain HTTP port. Zero picks an ephemeral port.
    pub http_port: u16,

    /// HTTPS port. Zero picks an ephemeral port.
    pub https_port: u16,

    /// Connection pool capacity.
    pub max_accepted_connections: usize,

    /// How long an accept loop waits for a free slot before raising an alarm.
    pub max_wait_for_pending_connections_secs: u64,

    /// Idle keep-alive connections are closed after this long.
    pub keep_alive_inactivity_timeout_ms: u64,

    /// Upper bound on pipeline execution for one request.
    pub response_client_timeout_secs: u64,

    /// Largest request body accepted, in bytes.
    pub client_message_buffer_size: usize,

    /// How long a stopping listener waits for in-flight connections.
    pub listener_drain_timeout_secs: u64,

    /// Directory with the admin site. Empty means not set up yet.
    pub admin_site_root: String,

    /// Session timeout for the admin pseudo-domain.
    pub admin_session_timeout_secs: u64,

    /// Directory with the server-level certificate and key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_dir: Option<PathBuf>,

    /// Directory under which new domains get their root.
    pub domains_dir: PathBuf,

    /// File receiving one JSON line per mutation.
    pub statistics_file: PathBuf,

    /// Interval of the expired-session sweep. Zero disables it.
    pub session_sweep_interval_secs: u64,

    /// Domain serving requests that carry no Host header.
    pub default_domain: String,

    /// Extra diagnostics in logs and responses.
    pub debug_mode: bool,
}

impl Default for ServerParameters {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 6678,
            https_port: 6679,
            max_accepted_connections: 20,
            max_wait_for_pending_connections_secs: 30,
            keep_alive_inactivity_timeout_ms: 5_000,
            response_client_timeout_secs: 10,
            client_message_buffer_size: 32 * 1024,
            listener_drain_timeout_secs: 60,
            admin_site_root: String::new(),
            admin_session_timeout_secs: 600,
            certificate_dir: None,
            domains_dir: PathBuf::from("domains"),
            statistics_file: PathBuf::from("statistics.jsonl"),
            session_sweep_interval_secs: 300,
            default_domain: String::new(),
            debug_mode: false,
        }
    }
}

/// Error type for runtime parameter updates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("unknown parameter: {0}")]
    Unknown(String),
    #[error("invalid value {value:?} for parameter {name}")]
    Invalid { name: String, value: String },
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ParameterError> {
    value.trim().parse().map_err(|_| ParameterError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl ServerParameters {
    /// Update one parameter from its textual form.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ParameterError> {
        match name {
            "bind_address" => self.bind_address = value.trim().to_string(),
            "http_port" => self.http_port = parse(name, value)?,
            "https_port" => self.https_port = parse(name, value)?,
            "max_accepted_connections" => self.max_accepted_connections = parse(name, value)?,
            "max_wait_for_pending_connections_secs" => {
                self.max_wait_for_pending_connections_secs = parse(name, value)?
            }
            "keep_alive_inactivity_timeout_ms" => {
                self.keep_alive_inactivity_timeout_ms = parse(name, value)?
            }
            "response_client_timeout_secs" => self.response_client_timeout_secs = parse(name, value)?,
            "client_message_buffer_size" => self.client_message_buffer_size = parse(name, value)?,
            "listener_drain_timeout_secs" => self.listener_drain_timeout_secs = parse(name, value)?,
            "admin_site_root" => self.admin_site_root = value.trim().to_string(),
            "admin_session_timeout_secs" => self.admin_session_timeout_secs = parse(name, value)?,
            "certificate_dir" => {
                let value = value.trim();
                self.certificate_dir = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "domains_dir" => self.domains_dir = PathBuf::from(value.trim()),
            "statistics_file" => self.statistics_file = PathBuf::from(value.trim()),
            "session_sweep_interval_secs" => self.session_sweep_interval_secs = parse(name, value)?,
            "default_domain" => self.default_domain = value.trim().to_lowercase(),
            "debug_mode" => self.debug_mode = parse(name, value)?,
            other => return Err(ParameterError::Unknown(other.to_string())),
        }
        Ok(())
    }

    /// Name and current value of every parameter, in declaration order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("bind_address", self.bind_address.clone()),
            ("http_port", self.http_port.to_string()),
            ("https_port", self.https_port.to_string()),
            ("max_accepted_connections", self.max_accepted_connections.to_string()),
            (
                "max_wait_for_pending_connections_secs",
                self.max_wait_for_pending_connections_secs.to_string(),
            ),
            (
                "keep_alive_inactivity_timeout_ms",
                self.keep_alive_inactivity_timeout_ms.to_string(),
            ),
            ("response_client_timeout_secs", self.response_client_timeout_secs.to_string()),
            ("client_message_buffer_size", self.client_message_buffer_size.to_string()),
            ("listener_drain_timeout_secs", self.listener_drain_timeout_secs.to_string()),
            ("admin_site_root", self.admin_site_root.clone()),
            ("admin_session_timeout_secs", self.admin_session_timeout_secs.to_string()),
            (
                "certificate_dir",
                self.certificate_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("domains_dir", self.domains_dir.display().to_string()),
            ("statistics_file", self.statistics_file.display().to_string()),
            ("session_sweep_interval_secs", self.session_sweep_interval_secs.to_string()),
            ("default_domain", self.default_domain.clone()),
            ("debug_mode", self.debug_mode.to_string()),
        ]
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_inactivity_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_client_timeout_secs)
    }

    pub fn max_wait_for_pending_connections(&self) -> Duration {
        Duration::from_secs(self.max_wait_for_pending_connections_secs)
    }

    pub fn listener_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.listener_drain_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "origin_server=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// One hosted domain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DomainConfig {
    /// Host name, lowercase. Unique.
    pub name: String,

    /// Directory served for this domain.
    pub root: PathBuf,

    pub enabled: bool,

    /// Also answer for `www.<name>`.
    pub www_included: bool,

    /// Session timeout in seconds. Zero disables sessions.
    pub session_timeout_secs: u64,

    /// Ordered pipeline stage names.
    pub services: Vec<String>,

    /// Directory with this domain's own certificate and key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_dir: Option<PathBuf>,

    /// Keep a tally of URL paths that answered 404.
    pub four04_log_enabled: bool,

    /// Domain-scope blacklist, checked after host resolution.
    pub blacklist: BTreeMap<String, Action>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            root: PathBuf::new(),
            enabled: true,
            www_included: false,
            session_timeout_secs: 600,
            services: default_services(),
            certificate_dir: None,
            four04_log_enabled: false,
            blacklist: BTreeMap::new(),
        }
    }
}
